//! Radio HAL (C3): a parameterised state machine over the 2.4 GHz radio peripheral.
//!
//! All reconfiguration — frequency, data rate, packet format, addressing, CRC, whitening — is
//! only valid while the radio reports [`RadioState::Disabled`]; [`Radio::enable`] blocks on the
//! ramp-up ready event, and [`Radio::start`] is non-blocking for RX but blocks until
//! end-of-packet for TX. [`crate::esb`] and [`crate::ble`] are both built on top of this and
//! never touch the register block directly.

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

use core::sync::atomic::{compiler_fence, Ordering};

use crate::Error;

/// Mirrors the peripheral's `STATE` register. Transient `*Disable` states collapse to
/// [`RadioState::Disabled`] since nothing in this stack acts on them directly — every caller
/// already blocks on the `DISABLED` event before observing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Disabled,
    RxRampUp,
    RxIdle,
    Rx,
    TxRampUp,
    TxIdle,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Mbps1,
    Mbps2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// CRC length in bytes (0 disables), polynomial and initial value, all masked to 24 bits by the
/// peripheral.
pub struct CrcConfig {
    pub len: u8,
    pub poly: u32,
    pub init: u32,
}

/// One 4-byte `BASE` pair plus the 8-entry `PREFIX` table, together giving 8 logical addresses.
/// `balen` is the base address length in bytes (3 or 4); the on-air address is `balen + 1` bytes
/// once the 1-byte prefix is appended — 5 bytes for ESB, 4 for a standard BLE access address.
pub struct AddressConfig {
    pub base0: [u8; 4],
    pub base1: [u8; 4],
    pub prefixes: [u8; 8],
    pub balen: u8,
}

pub struct PacketConfig {
    pub max_payload_len: u8,
    pub data_rate: DataRate,
    pub endian: Endian,
    pub whitening: bool,
}

/// Reverses bit order within each byte of `value` while leaving byte order untouched: the radio
/// transmits address bytes MSB-first but ESB/BLE addresses are specified LSB-first.
#[inline]
fn reverse_bits_per_byte(value: u32) -> u32 {
    value.reverse_bits().swap_bytes()
}

pub struct Radio {
    radio: pac::RADIO,
}

impl Radio {
    pub fn new(radio: pac::RADIO) -> Self {
        Radio { radio }
    }

    pub fn state(&self) -> RadioState {
        use RadioState::*;
        match self.radio.state.read().bits() {
            1 => RxRampUp,
            2 => RxIdle,
            3 => Rx,
            9 => TxRampUp,
            10 => TxIdle,
            11 => Tx,
            _ => Disabled,
        }
    }

    /// Programs frequency, packet format, addressing, CRC and whitening. Only valid while
    /// `Disabled`.
    pub fn configure(
        &mut self,
        rf_channel: u8,
        packet: &PacketConfig,
        addrs: &AddressConfig,
        crc: &CrcConfig,
        whitening_iv: u8,
    ) -> Result<(), Error> {
        if self.state() != RadioState::Disabled {
            return Err(Error::InvalidOperation);
        }

        self.radio.mode.write(|w| match packet.data_rate {
            DataRate::Mbps1 => w.mode().nrf_1mbit(),
            DataRate::Mbps2 => w.mode().nrf_2mbit(),
        });

        let len_bits = if packet.max_payload_len <= 32 { 6 } else { 8 };
        unsafe {
            self.radio
                .pcnf0
                .write(|w| w.lflen().bits(len_bits).s1len().bits(1));

            self.radio.pcnf1.write(|w| {
                let w = w
                    .maxlen()
                    .bits(packet.max_payload_len)
                    .balen()
                    .bits(addrs.balen)
                    .statlen()
                    .bits(0)
                    .whiteen()
                    .bit(packet.whitening);
                match packet.endian {
                    Endian::Little => w.endian().little(),
                    Endian::Big => w.endian().big(),
                }
            });

            self.radio
                .crccnf
                .write(|w| w.len().bits(crc.len).skipaddr().clear_bit());
            self.radio.crcpoly.write(|w| w.bits(crc.poly & 0x00FF_FFFF));
            self.radio.crcinit.write(|w| w.bits(crc.init & 0x00FF_FFFF));

            let base0 = reverse_bits_per_byte(u32::from_le_bytes(addrs.base0));
            let base1 = reverse_bits_per_byte(u32::from_le_bytes(addrs.base1));
            let mut prefix0 = [0u8; 4];
            let mut prefix1 = [0u8; 4];
            prefix0.copy_from_slice(&addrs.prefixes[0..4]);
            prefix1.copy_from_slice(&addrs.prefixes[4..8]);
            let prefix0 = reverse_bits_per_byte(u32::from_le_bytes(prefix0));
            let prefix1 = reverse_bits_per_byte(u32::from_le_bytes(prefix1));

            self.radio.base0.write(|w| w.bits(base0));
            self.radio.base1.write(|w| w.bits(base1));
            self.radio.prefix0.write(|w| w.bits(prefix0));
            self.radio.prefix1.write(|w| w.bits(prefix1));

            self.radio.datawhiteiv.write(|w| w.bits(whitening_iv as u32));
            self.radio.frequency.write(|w| w.frequency().bits(rf_channel));
        }

        self.radio.shorts.write(|w| {
            w.ready_start()
                .enabled()
                .end_disable()
                .enabled()
                .address_rssistart()
                .enabled()
                .disabled_rssistop()
                .enabled()
        });

        Ok(())
    }

    /// Reprograms just the logical-address-0 base and prefix byte, leaving everything else from
    /// the last [`Self::configure`] call untouched. Used by the mesh router to retarget each send
    /// at a different next hop without a full reconfigure. Only valid while `Disabled`.
    pub fn set_tx_address(&mut self, base: [u8; 4], prefix: u8) -> Result<(), Error> {
        if self.state() != RadioState::Disabled {
            return Err(Error::InvalidOperation);
        }
        unsafe {
            let base0 = reverse_bits_per_byte(u32::from_le_bytes(base));
            self.radio.base0.write(|w| w.bits(base0));
            let mut prefix0 = self.radio.prefix0.read().bits();
            prefix0 = (prefix0 & 0xFFFF_FF00) | prefix.reverse_bits() as u32;
            self.radio.prefix0.write(|w| w.bits(prefix0));
        }
        Ok(())
    }

    /// Selects which logical address a TX uses, and which logical addresses RX matches against.
    /// Unlike [`Self::configure`] this is valid in any state; the link layers call it per
    /// transaction.
    pub fn select_addresses(&mut self, tx_logical: u8, rx_mask: u8) {
        unsafe {
            self.radio.txaddress.write(|w| w.txaddress().bits(tx_logical));
            self.radio.rxaddresses.write(|w| w.bits(rx_mask as u32));
        }
    }

    pub fn set_packet_ptr(&mut self, ptr: *const u8) {
        compiler_fence(Ordering::Release);
        unsafe {
            self.radio.packetptr.write(|w| w.bits(ptr as u32));
        }
    }

    /// `disable -> enable(mode)`: blocks until ramp-up completes and the radio reports READY.
    pub fn enable(&mut self, mode: Mode) {
        self.disable();
        self.clear_ready_event();
        match mode {
            Mode::Rx => self.radio.tasks_rxen.write(|w| unsafe { w.bits(1) }),
            Mode::Tx => self.radio.tasks_txen.write(|w| unsafe { w.bits(1) }),
        }
        while self.radio.events_ready.read().bits() == 0 {}
        self.clear_ready_event();
    }

    /// Starts the current mode. Non-blocking for RX; blocks until end-of-packet for TX (the
    /// `end_disable` short then returns the radio to `Disabled` automatically).
    pub fn start(&mut self, mode: Mode) {
        compiler_fence(Ordering::Release);
        self.radio.tasks_start.write(|w| unsafe { w.bits(1) });
        if mode == Mode::Tx {
            while self.radio.events_end.read().bits() == 0 {}
            self.clear_end_event();
        }
    }

    pub fn disable(&mut self) {
        self.radio.tasks_disable.write(|w| unsafe { w.bits(1) });
        while self.radio.events_disabled.read().bits() == 0 {}
        self.clear_disabled_event();
        compiler_fence(Ordering::Acquire);
    }

    pub fn crc_ok(&self) -> bool {
        let ok = self.radio.crcstatus.read().crcstatus().is_crcok();
        compiler_fence(Ordering::Acquire);
        ok
    }

    /// Logical address the last received packet matched, from `RXMATCH`.
    pub fn received_address(&self) -> u8 {
        self.radio.rxmatch.read().bits() as u8
    }

    pub fn enable_end_interrupt(&mut self) {
        self.radio.intenset.write(|w| w.end().set());
    }

    pub fn disable_end_interrupt(&mut self) {
        self.radio.intenclr.write(|w| w.end().clear());
    }

    pub fn clear_end_event(&mut self) {
        self.radio.events_end.write(|w| unsafe { w.bits(0) });
    }

    pub fn clear_ready_event(&mut self) {
        self.radio.events_ready.write(|w| unsafe { w.bits(0) });
    }

    pub fn clear_disabled_event(&mut self) {
        self.radio.events_disabled.write(|w| unsafe { w.bits(0) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reversal_keeps_byte_order_but_flips_bits() {
        // 0x01 0x02 0x03 0x04 (LE u32 0x0403_0201) -> each byte bit-reversed in place.
        let word = u32::from_le_bytes([0x01, 0x02, 0x03, 0x04]);
        let reversed = reverse_bits_per_byte(word);
        let bytes = reversed.to_le_bytes();
        assert_eq!(bytes[0], 0x01u8.reverse_bits());
        assert_eq!(bytes[1], 0x02u8.reverse_bits());
        assert_eq!(bytes[2], 0x03u8.reverse_bits());
        assert_eq!(bytes[3], 0x04u8.reverse_bits());
    }

    #[test]
    fn double_reversal_is_identity() {
        let word = 0xDEAD_BEEFu32;
        assert_eq!(reverse_bits_per_byte(reverse_bits_per_byte(word)), word);
    }
}
