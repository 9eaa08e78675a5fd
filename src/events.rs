//! Unsolicited event plumbing
//!
//! The transport's I/O worker never touches engine state. Whatever arrives
//! unsolicited is wrapped in a [`TransportEvent`] and pushed onto an mpsc
//! queue; the application thread drains the queue through
//! [`EventDispatcher`] and applies the updates itself. That single funnel is
//! what serializes dataset refreshes against synchronous GETs and makes the
//! conflict/report maps safe to read without further locking.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::dataset::ChannelMask;

/// One unsolicited message from the network.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// MGMT_DATASET_CHANGED: the operational datasets moved under us
    DatasetChanged,
    /// MGMT_PANID_CONFLICT answer to an earlier PAN-ID query
    PanIdConflict {
        peer_addr: String,
        channel_mask: ChannelMask,
        pan_id: u16,
    },
    /// MGMT_ED_REPORT answer to an earlier energy scan
    EnergyReport {
        peer_addr: String,
        channel_mask: ChannelMask,
        energy_list: Vec<u8>,
    },
}

/// Application-thread end of the event queue.
#[derive(Debug)]
pub struct EventDispatcher {
    rx: Receiver<TransportEvent>,
}

impl EventDispatcher {
    /// A connected (sender, dispatcher) pair; the sender goes to the
    /// transport.
    pub fn channel() -> (Sender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// The next queued event, if one is waiting.
    pub fn try_next(&self) -> Option<TransportEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // transport dropped its sender; nothing more will arrive
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_drain_in_arrival_order() {
        let (tx, dispatcher) = EventDispatcher::channel();
        tx.send(TransportEvent::DatasetChanged).unwrap();
        tx.send(TransportEvent::PanIdConflict {
            peer_addr: "fd00::2".into(),
            channel_mask: vec![],
            pan_id: 0xDEAD,
        })
        .unwrap();

        assert!(matches!(
            dispatcher.try_next(),
            Some(TransportEvent::DatasetChanged)
        ));
        assert!(matches!(
            dispatcher.try_next(),
            Some(TransportEvent::PanIdConflict { pan_id: 0xDEAD, .. })
        ));
        assert!(dispatcher.try_next().is_none());
    }

    #[test]
    fn test_disconnected_sender_is_quiet() {
        let (tx, dispatcher) = EventDispatcher::channel();
        drop(tx);
        assert!(dispatcher.try_next().is_none());
    }
}
