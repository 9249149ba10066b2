//! Event distribution (C7): the sole cross-module callback mechanism.
//!
//! A process-wide registry maps a [`Group`] to an ordered list of handlers. `register` appends;
//! `trigger` invokes every handler for that group synchronously, in registration order. There is
//! no queuing and no filtering by subtype — handlers branch on the subtype themselves. The
//! registry is built once at startup and is read-only from then on, so `trigger` needs no
//! synchronization beyond what the caller's own context already provides.

use crate::Error;
use heapless::Vec;

/// Maximum handlers a single group can hold. The registry is static, so this only needs to cover
/// however many subsystems actually subscribe in a given firmware image.
pub const MAX_HANDLERS_PER_GROUP: usize = 4;

/// Stable group identifiers, matching the published event groups in the external interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// ESB link events: `TxSuccess`, `TxFailed`, `DataReady`, `AckSent`, `InvalidOperation`.
    Nrf24,
    /// Heart-rate-measurement GATT notification decode events.
    BleServiceHrm,
}

const GROUP_COUNT: usize = 2;

impl Group {
    fn index(self) -> usize {
        match self {
            Group::Nrf24 => 0,
            Group::BleServiceHrm => 1,
        }
    }
}

/// Subtypes for [`Group::Nrf24`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nrf24Event {
    TxSuccess = 0,
    TxFailed = 1,
    DataReady = 2,
    AckSent = 3,
    InvalidOperation = 4,
}

/// A registered handler. `payload` is `None` for events with no data (`NULL` in the original
/// firmware), or `Some` pointing at the 32-byte RX buffer for `DataReady`.
pub type Handler = fn(subtype: u8, payload: Option<&[u8]>);

/// The event registry. Construct once at startup, `register` every handler, then hand out
/// `&'static` references (or keep it behind a single global, as the firmware's other
/// singletons do) so that IRQ context can call `trigger` without taking a lock.
pub struct EventBus {
    groups: [Vec<Handler, MAX_HANDLERS_PER_GROUP>; GROUP_COUNT],
}

impl EventBus {
    pub const fn new() -> Self {
        EventBus {
            groups: [Vec::new(), Vec::new()],
        }
    }

    /// Appends `handler` to `group`'s handler list. Intended to be called only during
    /// application init, before any `trigger` call.
    pub fn register(&mut self, group: Group, handler: Handler) -> Result<(), Error> {
        self.groups[group.index()]
            .push(handler)
            .map_err(|_| Error::QueueFull)
    }

    /// Synchronously invokes every handler registered for `group`, in registration order.
    /// Handlers run on the caller's stack frame and must not block.
    pub fn trigger(&self, group: Group, subtype: u8, payload: Option<&[u8]>) {
        for handler in self.groups[group.index()].iter() {
            handler(subtype, payload);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static CALLS: AtomicU32 = AtomicU32::new(0);

    fn handler_a(_subtype: u8, _payload: Option<&[u8]>) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn handler_b(_subtype: u8, _payload: Option<&[u8]>) {
        CALLS.fetch_add(10, Ordering::SeqCst);
    }

    #[test]
    fn trigger_invokes_all_handlers_in_order() {
        CALLS.store(0, Ordering::SeqCst);
        let mut bus = EventBus::new();
        bus.register(Group::Nrf24, handler_a).unwrap();
        bus.register(Group::Nrf24, handler_b).unwrap();
        bus.trigger(Group::Nrf24, Nrf24Event::TxSuccess as u8, None);
        assert_eq!(CALLS.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn groups_are_independent() {
        CALLS.store(0, Ordering::SeqCst);
        let mut bus = EventBus::new();
        bus.register(Group::Nrf24, handler_a).unwrap();
        bus.trigger(Group::BleServiceHrm, 0, None);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_past_capacity_is_rejected() {
        let mut bus = EventBus::new();
        for _ in 0..MAX_HANDLERS_PER_GROUP {
            bus.register(Group::Nrf24, handler_a).unwrap();
        }
        assert_eq!(bus.register(Group::Nrf24, handler_a), Err(Error::QueueFull));
    }
}
