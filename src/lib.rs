//! Soft-timer scheduler and ESB/BLE/mesh radio stack for nRF5x Cortex-M parts.
//!
//! Seven pieces compose the firmware: a monotonic tick source ([`tick`]) backs a soft-timer
//! scheduler ([`timer`]), which drives retransmission for the proprietary Enhanced-ShockBurst-style
//! link ([`esb`]) built on the shared radio HAL ([`radio`]). A non-connectable BLE advertiser and
//! scanner ([`ble`]) and an octal-tree mesh router ([`mesh`]) sit on top of the same radio and link
//! respectively. Cross-module notifications run through a static event registry ([`event`]); every
//! fallible entry point returns [`Error`].
//!
//! Everything outside [`tick`] and [`radio`]'s register-banging impls is plain logic and is
//! covered by host-runnable `#[cfg(test)]` modules; the chip-specific pieces are kept thin and
//! reached only through the [`tick::TickSource`] seam so those tests never touch real hardware.

#![no_std]

pub mod ble;
pub mod error;
pub mod esb;
pub mod event;
pub mod mesh;
pub mod radio;
pub mod tick;
pub mod timer;

pub use error::Error;
