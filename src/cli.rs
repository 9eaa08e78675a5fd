//! Interactive command interpreter
//!
//! One command per line against a running engine. The engine sits behind a
//! mutex so a background ticker can keep the session alive (keepalives,
//! event draining) while the prompt blocks on stdin. `SIGINT` lands in an
//! atomic slot; the loop translates it into an abort of all in-flight
//! requests, plus a resignation when a session is active.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::border_agent::BorderAgentDiscovery;
use crate::commissioner::Commissioner;
use crate::config::{parse_hex, read_pem_file};
use crate::dataset::{Channel, ChannelMaskEntry};
use crate::error::{Error, Result};
use crate::joiner::{JoinerCredential, JoinerType};
use crate::persistence::{self, NetworkData};

const HELP: &str = "\
commands:
  start <ba-addr> <ba-port>              petition the Border Agent
  stop                                   resign the session
  active                                 print whether the session is active
  sessionid                              print the assigned session id
  borderagent [locator|discover]         border agent info
  joiner enable <type> <eui64> <pskd> [url]
  joiner enableall <type> <pskd> [url]
  joiner disable <type> <eui64>
  joiner disableall <type>
  joiner commissioned <type> <eui64>
  steeringdata <type>                    print steering data of a joiner type
  joinerport <type> [port]               get or set the joiner UDP port
  opdataset get <active|pending>         dump a cached operational dataset
  opdataset set channel <page> <number> <delay-ms>
  opdataset set panid <panid> <delay-ms>
  opdataset set masterkey <hex16> <delay-ms>
  opdataset set meshlocalprefix <hex8> <delay-ms>
  opdataset set networkname <name>
  opdataset set extpanid <hex8>
  opdataset set channelmask <page> <mask>
  opdataset set pskc <hex16>
  opdataset set securitypolicy <rotation> <flags-hex>
  commdataset get                        dump the cached commissioner dataset
  bbrdataset get                         dump the cached BBR dataset (CCM)
  bbrdataset set trihostname <name>
  bbrdataset set reghostname <name>
  announce <mask> <count> <period-ms> <dst>
  panid query <mask> <panid> <dst>
  panid conflict <panid>
  energy scan <mask> <count> <period> <duration> <dst>
  energy report [addr]
  mlr <addr> [addr...] <timeout-s>       register multicast listeners
  token request <addr> <port>
  token set <token-file> <cert-file>
  token print
  reenroll <dst>                         CCM re-enrollment
  domainreset <dst>                      CCM domain reset
  migrate <dst> <network-name>           CCM migration
  network save <path>                    save network data as JSON
  domainname                             print the CCM domain name
  help                                   this text
  exit";

/// The REPL around a [`Commissioner`].
pub struct Interpreter {
    commissioner: Arc<Mutex<Commissioner>>,
    discovery: Option<Box<dyn BorderAgentDiscovery>>,
    interrupted: Arc<AtomicBool>,
    should_exit: bool,
}

impl Interpreter {
    pub fn new(commissioner: Commissioner, interrupted: Arc<AtomicBool>) -> Self {
        Self {
            commissioner: Arc::new(Mutex::new(commissioner)),
            discovery: None,
            interrupted,
            should_exit: false,
        }
    }

    /// Attach an mDNS browser for `borderagent discover`.
    pub fn set_discovery(&mut self, discovery: Box<dyn BorderAgentDiscovery>) {
        self.discovery = Some(discovery);
    }

    fn engine(&self) -> MutexGuard<'_, Commissioner> {
        match self.commissioner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("commissioner lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Run the prompt until `exit` or end of input.
    pub fn run(&mut self) {
        let ticker_engine = Arc::downgrade(&self.commissioner);
        let ticker = std::thread::spawn(move || loop {
            let Some(engine) = ticker_engine.upgrade() else {
                break;
            };
            if let Ok(mut guard) = engine.lock() {
                guard.tick();
            }
            drop(engine);
            std::thread::sleep(Duration::from_secs(1));
        });

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        while !self.should_exit {
            print!("> ");
            let _ = io::stdout().flush();
            let Some(Ok(line)) = lines.next() else {
                break;
            };
            self.handle_interrupt();
            match self.execute(&line) {
                Ok(output) if output.is_empty() => println!("[done]"),
                Ok(output) => {
                    println!("{}", output);
                    println!("[done]");
                }
                Err(err) => println!("[failed] {}", err),
            }
        }

        self.engine().stop();
        drop(ticker);
    }

    /// Translate a pending SIGINT into abort + resign.
    pub fn handle_interrupt(&mut self) {
        if !self.interrupted.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut engine = self.engine();
        engine.abort_requests();
        if engine.is_active() {
            if let Err(err) = engine.resign() {
                log::warn!("resign after interrupt failed: {}", err);
            }
        }
    }

    /// Run one command line and return its printable output.
    pub fn execute(&mut self, line: &str) -> Result<String> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = args.first() else {
            return Ok(String::new());
        };
        match command {
            "help" => Ok(HELP.to_string()),
            "exit" => {
                self.should_exit = true;
                Ok(String::new())
            }
            "start" => {
                let (addr, port) = (arg(&args, 1)?, parse_u16(arg(&args, 2)?)?);
                let mut existing = String::new();
                match self.engine().start(&mut existing, addr, port) {
                    Ok(()) => Ok(String::new()),
                    Err(err @ Error::Rejected { .. }) if !existing.is_empty() => {
                        Err(Error::InvalidState(format!(
                            "{} (held by commissioner '{}')",
                            err, existing
                        )))
                    }
                    Err(err) => Err(err),
                }
            }
            "stop" => {
                self.engine().stop();
                Ok(String::new())
            }
            "active" => Ok(self.engine().is_active().to_string()),
            "sessionid" => Ok(self.engine().get_session_id()?.to_string()),
            "borderagent" => self.execute_borderagent(&args),
            "joiner" => self.execute_joiner(&args),
            "steeringdata" => {
                let joiner_type = parse_joiner_type(arg(&args, 1)?)?;
                Ok(hex::encode(self.engine().get_steering_data(joiner_type)?))
            }
            "joinerport" => {
                let joiner_type = parse_joiner_type(arg(&args, 1)?)?;
                match args.get(2) {
                    Some(port) => {
                        self.engine()
                            .set_joiner_udp_port(joiner_type, parse_u16(port)?)?;
                        Ok(String::new())
                    }
                    None => Ok(self.engine().get_joiner_udp_port(joiner_type)?.to_string()),
                }
            }
            "opdataset" => self.execute_opdataset(&args),
            "commdataset" => match arg(&args, 1)? {
                "get" => {
                    let engine = self.engine();
                    let json =
                        persistence::commissioner_to_json(engine.cached_commissioner_dataset());
                    Ok(serde_json::to_string_pretty(&json)?)
                }
                other => Err(unknown_subcommand("commdataset", other)),
            },
            "bbrdataset" => self.execute_bbrdataset(&args),
            "announce" => {
                let mask = parse_u32(arg(&args, 1)?)?;
                let count = parse_u8(arg(&args, 2)?)?;
                let period = Duration::from_millis(u64::from(parse_u16(arg(&args, 3)?)?));
                self.engine()
                    .announce_begin(mask, count, period, arg(&args, 4)?)?;
                Ok(String::new())
            }
            "panid" => self.execute_panid(&args),
            "energy" => self.execute_energy(&args),
            "mlr" => {
                if args.len() < 3 {
                    return Err(Error::InvalidArgs(
                        "mlr <addr> [addr...] <timeout-s>".into(),
                    ));
                }
                let timeout = Duration::from_secs(u64::from(parse_u32(args[args.len() - 1])?));
                let addrs: Vec<String> =
                    args[1..args.len() - 1].iter().map(|s| s.to_string()).collect();
                self.engine().register_multicast_listener(&addrs, timeout)?;
                Ok(String::new())
            }
            "token" => self.execute_token(&args),
            "reenroll" => {
                self.engine().reenroll(arg(&args, 1)?)?;
                Ok(String::new())
            }
            "domainreset" => {
                self.engine().domain_reset(arg(&args, 1)?)?;
                Ok(String::new())
            }
            "migrate" => {
                self.engine().migrate(arg(&args, 1)?, arg(&args, 2)?)?;
                Ok(String::new())
            }
            "network" => match arg(&args, 1)? {
                "save" => {
                    let engine = self.engine();
                    let network_data = NetworkData {
                        active_dataset: engine.cached_active_dataset().clone(),
                        pending_dataset: engine.cached_pending_dataset().clone(),
                        commissioner_dataset: engine.cached_commissioner_dataset().clone(),
                        bbr_dataset: engine.cached_bbr_dataset().clone(),
                    };
                    persistence::save_network_data(arg(&args, 2)?, &network_data)?;
                    Ok(String::new())
                }
                other => Err(unknown_subcommand("network", other)),
            },
            "domainname" => Ok(self.engine().domain_name().to_string()),
            other => Err(Error::InvalidArgs(format!(
                "unknown command: {} (try 'help')",
                other
            ))),
        }
    }

    fn execute_borderagent(&mut self, args: &[&str]) -> Result<String> {
        match args.get(1).copied().unwrap_or("locator") {
            "locator" => {
                let locator = self.engine().get_border_agent_locator()?;
                Ok(format!("{:#06X}", locator))
            }
            "discover" => {
                let Some(discovery) = self.discovery.as_mut() else {
                    return Err(Error::InvalidState(
                        "no mDNS discovery backend configured".into(),
                    ));
                };
                let mut engine = match self.commissioner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let agents = engine.discover(discovery.as_mut())?;
                let mut out = String::new();
                for ba in agents {
                    out.push_str(&format!(
                        "{} [{}]:{}\n",
                        ba.network_name, ba.addr, ba.port
                    ));
                }
                Ok(out.trim_end().to_string())
            }
            other => Err(unknown_subcommand("borderagent", other)),
        }
    }

    fn execute_joiner(&mut self, args: &[&str]) -> Result<String> {
        let sub = arg(args, 1)?;
        match sub {
            "enable" => {
                let joiner_type = parse_joiner_type(arg(args, 2)?)?;
                let eui64 = parse_eui64(arg(args, 3)?)?;
                let pskd = arg(args, 4)?;
                let url = args.get(5).copied().unwrap_or("");
                self.engine().enable_joiner(
                    joiner_type,
                    eui64,
                    JoinerCredential::Pskd(pskd.to_string()),
                    url,
                )?;
                Ok(String::new())
            }
            "enableall" => {
                let joiner_type = parse_joiner_type(arg(args, 2)?)?;
                let pskd = arg(args, 3)?;
                let url = args.get(4).copied().unwrap_or("");
                self.engine().enable_all_joiners(
                    joiner_type,
                    JoinerCredential::Pskd(pskd.to_string()),
                    url,
                )?;
                Ok(String::new())
            }
            "disable" => {
                let joiner_type = parse_joiner_type(arg(args, 2)?)?;
                self.engine()
                    .disable_joiner(joiner_type, parse_eui64(arg(args, 3)?)?)?;
                Ok(String::new())
            }
            "disableall" => {
                self.engine()
                    .disable_all_joiners(parse_joiner_type(arg(args, 2)?)?)?;
                Ok(String::new())
            }
            "commissioned" => {
                let joiner_type = parse_joiner_type(arg(args, 2)?)?;
                let eui64 = parse_eui64(arg(args, 3)?)?;
                Ok(self
                    .engine()
                    .is_joiner_commissioned(joiner_type, eui64)
                    .to_string())
            }
            other => Err(unknown_subcommand("joiner", other)),
        }
    }

    fn execute_opdataset(&mut self, args: &[&str]) -> Result<String> {
        match arg(args, 1)? {
            "get" => {
                let engine = self.engine();
                let json = match arg(args, 2)? {
                    "active" => persistence::active_to_json(engine.cached_active_dataset()),
                    "pending" => persistence::pending_to_json(engine.cached_pending_dataset()),
                    other => return Err(unknown_subcommand("opdataset get", other)),
                };
                Ok(serde_json::to_string_pretty(&json)?)
            }
            "set" => match arg(args, 2)? {
                "channel" => {
                    let channel = Channel {
                        page: parse_u8(arg(args, 3)?)?,
                        number: parse_u16(arg(args, 4)?)?,
                    };
                    let delay = Duration::from_millis(u64::from(parse_u32(arg(args, 5)?)?));
                    self.engine().set_channel(channel, delay)?;
                    Ok(String::new())
                }
                "panid" => {
                    let pan_id = parse_u16(arg(args, 3)?)?;
                    let delay = Duration::from_millis(u64::from(parse_u32(arg(args, 4)?)?));
                    self.engine().set_pan_id(pan_id, delay)?;
                    Ok(String::new())
                }
                "masterkey" => {
                    let key: [u8; 16] = parse_hex(arg(args, 3)?)?
                        .as_slice()
                        .try_into()
                        .map_err(|_| {
                            Error::InvalidArgs("master key must be 32 hex characters".into())
                        })?;
                    let delay = Duration::from_millis(u64::from(parse_u32(arg(args, 4)?)?));
                    self.engine().set_network_master_key(key, delay)?;
                    Ok(String::new())
                }
                "meshlocalprefix" => {
                    let prefix: [u8; 8] = parse_hex(arg(args, 3)?)?
                        .as_slice()
                        .try_into()
                        .map_err(|_| {
                            Error::InvalidArgs("mesh-local prefix must be a /64".into())
                        })?;
                    let delay = Duration::from_millis(u64::from(parse_u32(arg(args, 4)?)?));
                    self.engine().set_mesh_local_prefix(prefix, delay)?;
                    Ok(String::new())
                }
                "networkname" => {
                    self.engine().set_network_name(arg(args, 3)?)?;
                    Ok(String::new())
                }
                "extpanid" => {
                    let ext: [u8; 8] = parse_hex(arg(args, 3)?)?
                        .as_slice()
                        .try_into()
                        .map_err(|_| {
                            Error::InvalidArgs("extended PAN ID must be 16 hex characters".into())
                        })?;
                    self.engine().set_extended_pan_id(ext)?;
                    Ok(String::new())
                }
                "channelmask" => {
                    let mask = vec![ChannelMaskEntry {
                        page: parse_u8(arg(args, 3)?)?,
                        masks: parse_u32(arg(args, 4)?)?,
                    }];
                    self.engine().set_channel_mask(mask)?;
                    Ok(String::new())
                }
                "pskc" => {
                    let pskc: [u8; 16] = parse_hex(arg(args, 3)?)?
                        .as_slice()
                        .try_into()
                        .map_err(|_| Error::InvalidArgs("PSKc must be 32 hex characters".into()))?;
                    self.engine().set_pskc(pskc)?;
                    Ok(String::new())
                }
                "securitypolicy" => {
                    let policy = crate::dataset::SecurityPolicy {
                        rotation_time: parse_u16(arg(args, 3)?)?,
                        flags: parse_hex(arg(args, 4)?)?,
                    };
                    self.engine().set_security_policy(policy)?;
                    Ok(String::new())
                }
                other => Err(unknown_subcommand("opdataset set", other)),
            },
            other => Err(unknown_subcommand("opdataset", other)),
        }
    }

    fn execute_bbrdataset(&mut self, args: &[&str]) -> Result<String> {
        match arg(args, 1)? {
            "get" => {
                let engine = self.engine();
                let json = persistence::bbr_to_json(engine.cached_bbr_dataset());
                Ok(serde_json::to_string_pretty(&json)?)
            }
            "set" => match arg(args, 2)? {
                "trihostname" => {
                    self.engine().set_tri_hostname(arg(args, 3)?)?;
                    Ok(String::new())
                }
                "reghostname" => {
                    self.engine().set_registrar_hostname(arg(args, 3)?)?;
                    Ok(String::new())
                }
                other => Err(unknown_subcommand("bbrdataset set", other)),
            },
            other => Err(unknown_subcommand("bbrdataset", other)),
        }
    }

    fn execute_panid(&mut self, args: &[&str]) -> Result<String> {
        match arg(args, 1)? {
            "query" => {
                let mask = parse_u32(arg(args, 2)?)?;
                let pan_id = parse_u16(arg(args, 3)?)?;
                self.engine().pan_id_query(mask, pan_id, arg(args, 4)?)?;
                Ok(String::new())
            }
            "conflict" => {
                let pan_id = parse_u16(arg(args, 2)?)?;
                Ok(self.engine().has_pan_id_conflict(pan_id).to_string())
            }
            other => Err(unknown_subcommand("panid", other)),
        }
    }

    fn execute_energy(&mut self, args: &[&str]) -> Result<String> {
        match arg(args, 1)? {
            "scan" => {
                let mask = parse_u32(arg(args, 2)?)?;
                let count = parse_u8(arg(args, 3)?)?;
                let period = parse_u16(arg(args, 4)?)?;
                let duration = parse_u16(arg(args, 5)?)?;
                self.engine()
                    .energy_scan(mask, count, period, duration, arg(args, 6)?)?;
                Ok(String::new())
            }
            "report" => {
                let engine = self.engine();
                match args.get(2) {
                    Some(addr) => {
                        let report = engine.energy_report(addr).ok_or_else(|| {
                            Error::NotFound(format!("no energy report from {}", addr))
                        })?;
                        Ok(hex::encode(&report.energy_list))
                    }
                    None => {
                        let mut out = String::new();
                        for (addr, report) in engine.energy_reports() {
                            out.push_str(&format!(
                                "{}: {}\n",
                                addr,
                                hex::encode(&report.energy_list)
                            ));
                        }
                        Ok(out.trim_end().to_string())
                    }
                }
            }
            other => Err(unknown_subcommand("energy", other)),
        }
    }

    fn execute_token(&mut self, args: &[&str]) -> Result<String> {
        match arg(args, 1)? {
            "request" => {
                let addr = arg(args, 2)?;
                let port = parse_u16(arg(args, 3)?)?;
                self.engine().request_token(addr, port)?;
                Ok(String::new())
            }
            "set" => {
                let token = std::fs::read(arg(args, 2)?)?;
                let cert = read_pem_file(arg(args, 3)?)?;
                self.engine().set_token(token, &cert)?;
                Ok(String::new())
            }
            "print" => {
                let engine = self.engine();
                Ok(hex::encode(engine.token()))
            }
            other => Err(unknown_subcommand("token", other)),
        }
    }
}

fn arg<'a>(args: &[&'a str], index: usize) -> Result<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| Error::InvalidArgs("too few arguments (try 'help')".into()))
}

fn unknown_subcommand(command: &str, sub: &str) -> Error {
    Error::InvalidArgs(format!("unknown {} subcommand: {}", command, sub))
}

fn parse_joiner_type(text: &str) -> Result<JoinerType> {
    match text {
        "meshcop" => Ok(JoinerType::MeshCoP),
        "ae" => Ok(JoinerType::Ae),
        "nmkp" => Ok(JoinerType::Nmkp),
        _ => Err(Error::InvalidArgs(format!(
            "bad joiner type: {} (meshcop|ae|nmkp)",
            text
        ))),
    }
}

/// EUI-64 as hex, with or without a `0x` prefix.
fn parse_eui64(text: &str) -> Result<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidArgs(format!("bad EUI-64: {}", text)))
}

fn parse_u8(text: &str) -> Result<u8> {
    parse_number(text).and_then(|n| {
        u8::try_from(n).map_err(|_| Error::InvalidArgs(format!("value out of range: {}", text)))
    })
}

fn parse_u16(text: &str) -> Result<u16> {
    parse_number(text).and_then(|n| {
        u16::try_from(n).map_err(|_| Error::InvalidArgs(format!("value out of range: {}", text)))
    })
}

fn parse_u32(text: &str) -> Result<u32> {
    parse_number(text).and_then(|n| {
        u32::try_from(n).map_err(|_| Error::InvalidArgs(format!("value out of range: {}", text)))
    })
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number(text: &str) -> Result<u64> {
    let result = match text.strip_prefix("0x") {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse(),
    };
    result.map_err(|_| Error::InvalidArgs(format!("bad number: {}", text)))
}
