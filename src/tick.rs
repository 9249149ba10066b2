//! Monotonic Tick Source (C1): a free-running 24-bit counter at 32768 Hz with one compare
//! channel and an interrupt, backing the soft-timer scheduler in [`crate::timer`].
//!
//! The hardware has a documented quirk: programming the compare register to the current
//! counter value or `current + 1` may not generate a COMPARE event. This module does not paper
//! over that — it's [`crate::timer::Scheduler`]'s job to never arm closer than `H_MIN` ticks out.

#[cfg(feature = "51")]
use nrf51_pac as pac;

#[cfg(feature = "52810")]
use nrf52810_pac as pac;

#[cfg(feature = "52832")]
use nrf52832_pac as pac;

#[cfg(feature = "52833")]
use nrf52833_pac as pac;

#[cfg(feature = "52840")]
use nrf52840_pac as pac;

/// A 24-bit tick count. Arithmetic on raw values is modulo [`TICK_MODULUS`]; use
/// [`forward_distance`] rather than plain subtraction when comparing two ticks.
pub type Tick = u32;

/// One past the counter's maximum value (2^24).
pub const TICK_MODULUS: u32 = 1 << 24;
pub const TICK_MASK: u32 = TICK_MODULUS - 1;

/// Counter frequency in Hz.
pub const TICK_HZ: u32 = 32_768;

/// Converts whole milliseconds to ticks at 32768 Hz.
pub const fn ms_to_ticks(ms: u32) -> Tick {
    ((ms as u64 * TICK_HZ as u64) / 1000) as Tick & TICK_MASK
}

/// Converts whole microseconds to ticks at 32768 Hz.
pub const fn us_to_ticks(us: u32) -> Tick {
    ((us as u64 * TICK_HZ as u64) / 1_000_000) as Tick & TICK_MASK
}

/// Forward (modular) distance from `from` to `to`, i.e. how many ticks from now until `to`
/// elapses, assuming `to` is within one full counter period ahead of `from`.
pub fn forward_distance(from: Tick, to: Tick) -> u32 {
    to.wrapping_sub(from) & TICK_MASK
}

mod sealed {
    pub trait Sealed {}
}

/// A 24-bit, 32768 Hz counter with one compare channel. Implemented for the chip's RTC
/// peripheral; the scheduler only ever talks to this trait, never to the register block
/// directly, so it can be driven by a host-side fake in tests.
pub trait TickSource: sealed::Sealed {
    /// Enables the counter's interrupt and starts it free-running from zero.
    fn start(&mut self);

    /// Current counter value.
    fn now(&self) -> Tick;

    /// Programs the compare register to fire at `deadline`. Does not clear a pending event.
    fn arm(&mut self, deadline: Tick);

    /// Clears the compare-match event so the interrupt does not immediately retrigger.
    fn clear_compare_event(&mut self);
}

macro_rules! impl_tick_source {
    ( $($ty:ty),+ ) => {
        $(
            impl TickSource for $ty {
                fn start(&mut self) {
                    self.prescaler.write(|w| unsafe { w.prescaler().bits(0) });
                    self.intenset.write(|w| w.compare1().set());
                    self.tasks_start.write(|w| unsafe { w.bits(1) });
                }

                fn now(&self) -> Tick {
                    self.counter.read().bits() & TICK_MASK
                }

                fn arm(&mut self, deadline: Tick) {
                    self.cc[1].write(|w| unsafe { w.bits(deadline & TICK_MASK) });
                }

                fn clear_compare_event(&mut self) {
                    self.events_compare[1].write(|w| unsafe { w.bits(0) });
                }
            }

            impl sealed::Sealed for $ty {}
        )+
    };
}

#[cfg(not(feature = "51"))]
impl_tick_source!(pac::RTC0, pac::RTC1, pac::RTC2);

#[cfg(feature = "51")]
impl_tick_source!(pac::RTC0, pac::RTC1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_conversion_matches_frequency() {
        assert_eq!(ms_to_ticks(1000), TICK_HZ);
        assert_eq!(ms_to_ticks(100), 3276);
    }

    #[test]
    fn us_conversion_rounds_down() {
        assert_eq!(us_to_ticks(1_000_000), TICK_HZ);
        assert_eq!(us_to_ticks(1000), 32);
    }

    #[test]
    fn forward_distance_wraps() {
        assert_eq!(forward_distance(TICK_MASK - 1, 1), 3);
        assert_eq!(forward_distance(10, 20), 10);
        assert_eq!(forward_distance(20, 10), TICK_MODULUS - 10);
    }
}
