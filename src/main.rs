//! Commissioner CLI entry point

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use meshcop_commissioner::{
    AppConfig, Commissioner, DefaultCrypto, DisconnectedTransport, Error, Interpreter, Result,
};

fn print_usage(program: &str) {
    println!("usage:\n    {} <config-file>", program);
}

/// Slot the SIGINT handler dereferences; only an atomic load and store
/// happen in signal context.
static ABORT_SLOT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_sigint(_signum: libc::c_int) {
    if let Some(flag) = ABORT_SLOT.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn init_logger(config: &AppConfig) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .map_err(|err| {
            Error::NotFound(format!("cannot open log file {}: {}", config.log_file, err))
        })?;
    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(())
}

fn run(config_file: &str) -> Result<()> {
    let config = AppConfig::from_file(config_file)?;
    init_logger(&config)?;
    // fatal when the named credentials are absent or malformed
    let _credentials = config.load_credentials()?;

    // The DTLS/CoAP stack is a linked backend; this build carries none.
    log::warn!("no secure-session backend is linked; network commands will fail");

    let commissioner = Commissioner::new(
        &config.id,
        config.enable_ccm,
        &config.domain_name,
        Duration::from_secs(config.keepalive_interval),
        Box::new(DisconnectedTransport),
        Box::new(DefaultCrypto),
    )?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let _ = ABORT_SLOT.set(interrupted.clone());
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }

    let mut interpreter = Interpreter::new(commissioner, interrupted);
    interpreter.run();
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("commissioner");

    match args.get(1).map(String::as_str) {
        None | Some("-h") | Some("--help") => {
            print_usage(program);
            ExitCode::SUCCESS
        }
        Some("-v") | Some("--version") => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(config_file) => match run(config_file) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("start commissioner CLI failed: {}", err);
                ExitCode::FAILURE
            }
        },
    }
}
