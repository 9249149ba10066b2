//! Shared error taxonomy.
//!
//! Register-level radio and timer access is infallible (the hardware is assumed sane); these
//! variants cover the application-facing entry points that can be rejected per the propagation
//! policy in the design notes: interrupt-context failures are reported through
//! [`crate::event::EventBus`], while main-context failures return one of these.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `Scheduler::start` rejected a 17th concurrent timer.
    LimitReached,
    /// `EsbLink::send` was called while not in TX mode.
    InvalidOperation,
    /// The TX FIFO had no room for another packet.
    QueueFull,
    /// `start` was called on a node that is already running.
    AlreadyRunning,
    /// An operation that requires `start()` to have run was attempted first.
    NotInitialized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::LimitReached => "maximum number of active timers reached",
            Error::InvalidOperation => "operation not valid in the current mode",
            Error::QueueFull => "queue is full",
            Error::AlreadyRunning => "already running",
            Error::NotInitialized => "not initialized",
        };
        f.write_str(s)
    }
}
