//! BLE Broadcaster/Scanner (C5): non-connectable advertising and passive scanning on the three
//! advertising channels, channel-hopping every cycle. Grounded in `nrf52_ble.c`
//! (`assemble_pdu`/`ble_advertise`/`hop_channel`) and the CRC24/whitening IV conventions from
//! `rubble`'s `link/crc.rs` and `ble/phy.rs`.

use crate::radio::{self, AddressConfig, CrcConfig, DataRate, Endian, PacketConfig, Radio};
use crate::Error;

/// Logical advertising channel numbers, in hop order.
pub const ADV_CHANNELS: [u8; 3] = [37, 38, 39];
/// Radio `FREQUENCY` register values (offset from 2400 MHz) for each entry in [`ADV_CHANNELS`].
pub const ADV_RF_CHANNELS: [u8; 3] = [2, 26, 80];

pub const ADV_ACCESS_ADDRESS: [u8; 4] = [0x8E, 0x89, 0xBE, 0xD6];
pub const BLE_CRC_POLY: u32 = 0x0100_065B & 0x00FF_FFFF;
pub const BLE_CRC_INIT: u32 = 0x0055_5555 & 0x00FF_FFFF;

pub const ADV_INTERVAL_MS: u32 = 100;
pub const SCAN_INTERVAL_MS: u32 = 300;

const ADV_HEADER_NONCONN_IND: u8 = 0x22;
const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_SERVICE_DATA: u8 = 0x16;

/// Maximum TLV payload behind the 6-byte MAC, per the Bluetooth advertising PDU limit.
pub const MAX_ADV_PAYLOAD: usize = 31;
pub const PDU_BUF_LEN: usize = 2 + 6 + MAX_ADV_PAYLOAD;

/// BLE Link-Layer CRC24, preset with the channel's CRC init value.
pub fn crc24(data: &[u8], preset: u32) -> u32 {
    let poly = BLE_CRC_POLY & 0x00FF_FFFF;
    let mut crc = preset & 0x00FF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            let msb = crc & 0x0080_0000 != 0;
            crc <<= 1;
            if msb {
                crc ^= poly;
            }
        }
    }
    crc & 0x00FF_FFFF
}

fn push_tlv(buf: &mut [u8], offset: usize, kind: u8, data: &[u8]) -> usize {
    buf[offset] = (data.len() + 1) as u8;
    buf[offset + 1] = kind;
    buf[offset + 2..offset + 2 + data.len()].copy_from_slice(data);
    offset + 2 + data.len()
}

/// Fills `buf` with a non-connectable advertising PDU (header, length, MAC, then
/// Flags → Complete Local Name → Service Data TLVs) and returns the total PDU length.
pub fn assemble_pdu(
    buf: &mut [u8; PDU_BUF_LEN],
    mac_address: [u8; 6],
    flags: u8,
    name: &[u8],
    service_uuid: u16,
    service_counter: u8,
) -> usize {
    let mut offset = 2 + 6;
    offset = push_tlv(buf, offset, AD_TYPE_FLAGS, &[flags]);
    offset = push_tlv(buf, offset, AD_TYPE_COMPLETE_LOCAL_NAME, name);
    let service_data = [
        (service_uuid & 0xFF) as u8,
        (service_uuid >> 8) as u8,
        service_counter,
    ];
    offset = push_tlv(buf, offset, AD_TYPE_SERVICE_DATA, &service_data);

    buf[2..8].copy_from_slice(&mac_address);
    let payload_len = (offset - 2 - 6) as u8;
    buf[0] = ADV_HEADER_NONCONN_IND;
    buf[1] = payload_len + 6;
    offset
}

/// Static advertising content; `flags` and `service_counter` are refreshed on every cycle, the
/// rest is fixed at init.
pub struct AdvConfig {
    pub mac_address: [u8; 6],
    pub flags: u8,
    pub name: &'static [u8],
    pub service_uuid: u16,
}

fn packet_config(whitening: bool) -> PacketConfig {
    PacketConfig {
        max_payload_len: (PDU_BUF_LEN - 2) as u8,
        data_rate: DataRate::Mbps1,
        endian: Endian::Little,
        whitening,
    }
}

fn address_config() -> AddressConfig {
    AddressConfig {
        base0: [ADV_ACCESS_ADDRESS[1], ADV_ACCESS_ADDRESS[2], ADV_ACCESS_ADDRESS[3], 0],
        base1: [0; 4],
        prefixes: [ADV_ACCESS_ADDRESS[0], ADV_ACCESS_ADDRESS[0], 0, 0, 0, 0, 0, 0],
        // 4-byte BLE access address: 3-byte base + 1-byte prefix, unlike ESB's 5-byte address.
        balen: 3,
    }
}

fn crc_config() -> CrcConfig {
    CrcConfig {
        len: 3,
        poly: BLE_CRC_POLY,
        init: BLE_CRC_INIT,
    }
}

/// Advertiser half of C5. Owns the radio while advertising; [`Self::advertise`] is meant to be
/// wired to a periodic [`crate::timer::Scheduler`] timer at [`ADV_INTERVAL_MS`].
pub struct BleAdvertiser {
    radio: Radio,
    config: AdvConfig,
    channel_idx: usize,
    service_counter: u8,
    pdu_buf: [u8; PDU_BUF_LEN],
}

impl BleAdvertiser {
    pub fn new(radio: Radio, config: AdvConfig) -> Self {
        BleAdvertiser {
            radio,
            config,
            channel_idx: 0,
            service_counter: 0,
            pdu_buf: [0; PDU_BUF_LEN],
        }
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.radio.configure(
            ADV_RF_CHANNELS[0],
            &packet_config(true),
            &address_config(),
            &crc_config(),
            ADV_CHANNELS[0],
        )
    }

    /// Runs one advertise cycle: bumps the service-data counter, assembles the PDU, transmits it
    /// (blocking through end-of-packet), then hops to the next channel. The original firmware
    /// masks interrupts around the equivalent of this whole body to protect the shared scratch
    /// buffer; `cortex_m::interrupt::free` does the same here.
    pub fn advertise(&mut self) {
        cortex_m::interrupt::free(|_| {
            self.service_counter = self.service_counter.wrapping_add(1);
            let len = assemble_pdu(
                &mut self.pdu_buf,
                self.config.mac_address,
                self.config.flags,
                self.config.name,
                self.config.service_uuid,
                self.service_counter,
            );

            self.radio.select_addresses(0, 0);
            self.radio.set_packet_ptr(self.pdu_buf.as_ptr());
            self.radio.enable(radio::Mode::Tx);
            self.radio.start(radio::Mode::Tx);
            let _ = len;

            self.hop_channel();
        });
    }

    fn hop_channel(&mut self) {
        self.channel_idx = (self.channel_idx + 1) % ADV_CHANNELS.len();
        #[cfg(feature = "log")]
        log::trace!("advertising hopped to channel {}", ADV_CHANNELS[self.channel_idx]);
        // Reconfiguring frequency/whitening requires `Disabled`; the `end_disable` short already
        // left the radio there after `advertise`'s blocking TX.
        let _ = self.radio.configure(
            ADV_RF_CHANNELS[self.channel_idx],
            &packet_config(true),
            &address_config(),
            &crc_config(),
            ADV_CHANNELS[self.channel_idx],
        );
    }
}

/// Delivers a raw received PDU buffer to the application. No TLV decoding happens here — the
/// spec only asks for non-connectable advertising, not a GAP parser.
pub type ScanHandler = fn(&[u8]);

/// Scanner half of C5: periodically starts one RX on the current channel, then hops.
pub struct BleScanner {
    radio: Radio,
    channel_idx: usize,
    handler: ScanHandler,
    rx_buf: [u8; PDU_BUF_LEN],
}

impl BleScanner {
    pub fn new(radio: Radio, handler: ScanHandler) -> Self {
        BleScanner {
            radio,
            channel_idx: 0,
            handler,
            rx_buf: [0; PDU_BUF_LEN],
        }
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.radio.configure(
            ADV_RF_CHANNELS[0],
            &packet_config(true),
            &address_config(),
            &crc_config(),
            ADV_CHANNELS[0],
        )
    }

    /// One scan tick: start RX on the current channel, then hop for the next tick.
    pub fn scan_tick(&mut self) {
        self.radio.select_addresses(0, 0b01);
        self.radio.set_packet_ptr(self.rx_buf.as_ptr());
        self.radio.enable(radio::Mode::Rx);
        self.radio.enable_end_interrupt();
        self.radio.start(radio::Mode::Rx);

        self.channel_idx = (self.channel_idx + 1) % ADV_CHANNELS.len();
    }

    /// Called from the radio end-of-packet interrupt while scanning.
    pub fn on_radio_end_event(&mut self) {
        if self.radio.crc_ok() {
            (self.handler)(&self.rx_buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc24_of_empty_data_is_the_preset() {
        assert_eq!(crc24(&[], BLE_CRC_INIT), BLE_CRC_INIT & 0x00FF_FFFF);
    }

    #[test]
    fn crc24_changes_with_input() {
        let a = crc24(&[0x01, 0x02, 0x03], BLE_CRC_INIT);
        let b = crc24(&[0x01, 0x02, 0x04], BLE_CRC_INIT);
        assert_ne!(a, b);
        assert!(a <= 0x00FF_FFFF);
    }

    #[test]
    fn assemble_pdu_lays_out_header_and_mac() {
        let mut buf = [0u8; PDU_BUF_LEN];
        let mac = [0xA7, 0x05, 0xD5, 0x7C, 0xBB, 0xFB];
        let len = assemble_pdu(&mut buf, mac, 0x06, b"node", 0x180D, 3);
        assert_eq!(buf[0], ADV_HEADER_NONCONN_IND);
        assert_eq!(&buf[2..8], &mac);
        assert!(len <= PDU_BUF_LEN);
    }

    #[test]
    fn assemble_pdu_orders_tlvs_flags_name_service_data() {
        let mut buf = [0u8; PDU_BUF_LEN];
        let mac = [0; 6];
        assemble_pdu(&mut buf, mac, 0x06, b"x", 0x180D, 1);
        // Flags TLV starts right after header+len+mac.
        assert_eq!(buf[8], 2); // length: type + 1 data byte
        assert_eq!(buf[9], AD_TYPE_FLAGS);
        assert_eq!(buf[10], 0x06);
        // Complete Local Name TLV follows.
        assert_eq!(buf[11], 2); // length: type + "x"
        assert_eq!(buf[12], AD_TYPE_COMPLETE_LOCAL_NAME);
        assert_eq!(buf[13], b'x');
        // Service Data TLV follows.
        assert_eq!(buf[14], 4); // length: type + uuid(2) + counter(1)
        assert_eq!(buf[15], AD_TYPE_SERVICE_DATA);
    }

    #[test]
    fn channel_hop_cycles_through_three_channels() {
        let mut idx = 0usize;
        let mut seen = heapless::Vec::<u8, 8>::new();
        for _ in 0..7 {
            seen.push(ADV_CHANNELS[idx]).unwrap();
            idx = (idx + 1) % ADV_CHANNELS.len();
        }
        assert_eq!(
            seen.as_slice(),
            &[37, 38, 39, 37, 38, 39, 37]
        );
    }
}
