//! ESB Link (C4): the proprietary Enhanced-ShockBurst-style link — PID-tagged packets, a bounded
//! TX FIFO, and timer-driven automatic retransmit/acknowledge built on [`crate::timer::Scheduler`]
//! and [`crate::radio::Radio`].
//!
//! Grounded in `nrf24.c`: `tx_fifo_push`/`tx_fifo_execute` become [`TxFifo`] and
//! [`EsbLink::dispatch_next`], `auto_retransmit_handler` becomes [`EsbLink::on_retransmit_tick`],
//! and `nrf24_handle_packet` becomes [`EsbLink::on_radio_end_event`]. The original hands dispatch
//! off to a software interrupt (`NRF_EGU1->TASKS_TRIGGER`); since no EGU HAL is in scope here,
//! dispatch is called directly from the three places that used to trigger it.

use crate::event::{EventBus, Group, Nrf24Event};
use crate::radio::{self, AddressConfig, CrcConfig, DataRate, Endian, Mode as RadioMode, PacketConfig, Radio};
use crate::tick::ms_to_ticks;
use crate::timer::{Scheduler, TimerId};
use crate::tick::TickSource;
use crate::Error;

pub const PAYLOAD_LEN: usize = 32;
pub const TX_FIFO_DEPTH: usize = 16;
pub const MAX_RETRIES: u8 = 15;
pub const RETRANSMIT_PERIOD_MS: u32 = 1;

const ESB_CRC_POLY: u32 = 0x1_1021;
const ESB_CRC_INIT: u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Tx,
    Rx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Tx,
    WaitAck,
}

/// A single ESB packet: up to [`PAYLOAD_LEN`] bytes, tagged with a 2-bit sequence number and a
/// no-ack flag. `Copy` so the TX FIFO can be a plain fixed array.
#[derive(Clone, Copy)]
pub struct Packet {
    pub pid: u8,
    pub no_ack: bool,
    pub len: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl Packet {
    const fn empty() -> Self {
        Packet {
            pid: 0,
            no_ack: false,
            len: 0,
            payload: [0; PAYLOAD_LEN],
        }
    }

    /// Software-side view of the on-air `S0 (length:6, pid:2) | S1 (no_ack:1) | payload` layout.
    fn write_air_buffer(&self, out: &mut [u8; PAYLOAD_LEN + 2]) {
        out[0] = (self.len << 2) | (self.pid & 0x03);
        out[1] = self.no_ack as u8;
        out[2..2 + self.len as usize].copy_from_slice(&self.payload[..self.len as usize]);
    }

    fn read_air_buffer(buf: &[u8; PAYLOAD_LEN + 2]) -> Self {
        let len = buf[0] >> 2;
        let pid = buf[0] & 0x03;
        let no_ack = buf[1] & 0x01 == 0x01;
        let mut payload = [0u8; PAYLOAD_LEN];
        let n = (len as usize).min(PAYLOAD_LEN);
        payload[..n].copy_from_slice(&buf[2..2 + n]);
        Packet {
            pid,
            no_ack,
            len,
            payload,
        }
    }
}

/// Ring buffer of [`Packet`]s with capacity [`TX_FIFO_DEPTH`]. Unlike the original, the tail
/// only advances once the in-flight packet's outcome (success or failure) is known, rather than
/// at dispatch time — avoiding a window where a fresh push could overwrite a packet still
/// in flight.
struct TxFifo {
    buf: [Packet; TX_FIFO_DEPTH],
    head: usize,
    tail: usize,
    count: usize,
}

impl TxFifo {
    const fn new() -> Self {
        TxFifo {
            buf: [Packet::empty(); TX_FIFO_DEPTH],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, packet: Packet) -> Result<(), Error> {
        if self.count == TX_FIFO_DEPTH {
            #[cfg(feature = "log")]
            log::warn!("tx fifo full at depth {}, dropping packet", TX_FIFO_DEPTH);
            return Err(Error::QueueFull);
        }
        self.buf[self.head] = packet;
        self.head = (self.head + 1) % TX_FIFO_DEPTH;
        self.count += 1;
        Ok(())
    }

    fn peek(&self) -> Option<&Packet> {
        if self.count == 0 {
            None
        } else {
            Some(&self.buf[self.tail])
        }
    }

    /// Call once the in-flight packet at `tail` has either succeeded or exhausted retries.
    fn complete(&mut self) {
        if self.count > 0 {
            self.tail = (self.tail + 1) % TX_FIFO_DEPTH;
            self.count -= 1;
        }
    }
}

/// The ESB link layer. Owns the radio and the TX FIFO; the application wires
/// [`Self::on_retransmit_tick`] to a periodic [`crate::timer::Scheduler`] timer and
/// [`Self::on_radio_end_event`] to the radio's end-of-packet interrupt.
pub struct EsbLink {
    radio: Radio,
    fifo: TxFifo,
    mode: LinkMode,
    state: State,
    seq: u8,
    retries: u8,
    prev_pid: u8,
    tx_buf: [u8; PAYLOAD_LEN + 2],
    ack_buf: [u8; PAYLOAD_LEN + 2],
    rx_buf: [u8; PAYLOAD_LEN + 2],
}

impl EsbLink {
    pub fn new(radio: Radio) -> Self {
        EsbLink {
            radio,
            fifo: TxFifo::new(),
            mode: LinkMode::Rx,
            state: State::Idle,
            seq: 0,
            retries: 0,
            prev_pid: 4, // not a valid 2-bit PID, so the first receive is never treated as a dup
            tx_buf: [0; PAYLOAD_LEN + 2],
            ack_buf: [0; PAYLOAD_LEN + 2],
            rx_buf: [0; PAYLOAD_LEN + 2],
        }
    }

    /// Programs the radio for the ESB packet format: big-endian, no whitening, 1 Mbps, a 2-byte
    /// CCITT-style CRC seeded the way the original firmware seeds it.
    pub fn init(&mut self, rf_channel: u8, tx_address: [u8; 5], rx_address: [u8; 5]) -> Result<(), Error> {
        let addrs = AddressConfig {
            base0: [tx_address[1], tx_address[2], tx_address[3], tx_address[4]],
            base1: [rx_address[1], rx_address[2], rx_address[3], rx_address[4]],
            prefixes: [tx_address[0], rx_address[0], 0, 0, 0, 0, 0, 0],
            balen: 4, // 5-byte on-air address: 4-byte base + 1-byte prefix
        };
        let packet = PacketConfig {
            max_payload_len: PAYLOAD_LEN as u8,
            data_rate: DataRate::Mbps1,
            endian: Endian::Big,
            whitening: false,
        };
        let crc = CrcConfig {
            len: 2,
            poly: ESB_CRC_POLY,
            init: ESB_CRC_INIT,
        };
        self.radio.configure(rf_channel, &packet, &addrs, &crc, 0)
    }

    /// Retargets the link's TX peer (logical address 0) without touching the RX address or any
    /// other radio setting. Used by the mesh router, which picks a new next hop per send.
    pub fn set_peer_address(&mut self, physical_address: [u8; 5]) -> Result<(), Error> {
        self.radio.disable();
        self.radio.set_tx_address(
            [
                physical_address[1],
                physical_address[2],
                physical_address[3],
                physical_address[4],
            ],
            physical_address[0],
        )
    }

    /// Sets the link's current direction. RX immediately starts listening; TX just records the
    /// logical address used to hear acknowledgements.
    pub fn set_mode(&mut self, mode: LinkMode) {
        self.mode = mode;
        #[cfg(feature = "log")]
        log::trace!("esb link mode set to {:?}", mode);
        match mode {
            LinkMode::Rx => {
                self.radio.select_addresses(0, 0b10);
                self.radio.set_packet_ptr(self.rx_buf.as_ptr());
                self.radio.enable(radio::Mode::Rx);
                self.radio.enable_end_interrupt();
                self.radio.start(radio::Mode::Rx);
            }
            LinkMode::Tx => {
                self.radio.select_addresses(0, 0b01);
            }
        }
    }

    /// Queues `data` for transmission. Only valid while in [`LinkMode::Tx`].
    pub fn send<T: TickSource>(
        &mut self,
        data: &[u8],
        bus: &EventBus,
        scheduler: &mut Scheduler<T>,
        retransmit_timer: TimerId,
    ) -> Result<(), Error> {
        if self.mode != LinkMode::Tx {
            bus.trigger(Group::Nrf24, Nrf24Event::InvalidOperation as u8, None);
            return Err(Error::InvalidOperation);
        }
        let len = data.len().min(PAYLOAD_LEN) as u8;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..len as usize].copy_from_slice(&data[..len as usize]);

        let packet = Packet {
            pid: self.seq & 0x03,
            no_ack: false,
            len,
            payload,
        };
        self.seq = self.seq.wrapping_add(1);

        let was_empty = self.fifo.is_empty();
        self.fifo.push(packet)?;
        if was_empty {
            self.dispatch_next(scheduler, retransmit_timer);
        }
        Ok(())
    }

    /// Pops the FIFO's head packet onto the air and arms the retransmit timer. No-op if empty.
    fn dispatch_next<T: TickSource>(&mut self, scheduler: &mut Scheduler<T>, retransmit_timer: TimerId) {
        if self.fifo.peek().is_none() {
            return;
        }
        self.retries = 0;
        self.transmit_and_listen_for_ack();
        self.state = State::WaitAck;
        let _ = scheduler.start(retransmit_timer, ms_to_ticks(RETRANSMIT_PERIOD_MS));
    }

    fn transmit_and_listen_for_ack(&mut self) {
        let packet = *self.fifo.peek().expect("dispatch_next only called when non-empty");
        packet.write_air_buffer(&mut self.tx_buf);

        self.radio.select_addresses(0, 0);
        self.radio.set_packet_ptr(self.tx_buf.as_ptr());
        self.radio.enable(radio::Mode::Tx);
        self.radio.start(radio::Mode::Tx);

        self.ack_buf = [0; PAYLOAD_LEN + 2];
        self.radio.select_addresses(0, 0b01);
        self.radio.set_packet_ptr(self.ack_buf.as_ptr());
        self.radio.enable(radio::Mode::Rx);
        self.radio.enable_end_interrupt();
        self.radio.start(radio::Mode::Rx);
        self.state = State::Tx;
    }

    /// Called from the periodic retransmit timer. Retransmits while `retries < MAX_RETRIES`;
    /// otherwise gives up, emits `TxFailed`, and moves on to the next queued packet.
    pub fn on_retransmit_tick<T: TickSource>(
        &mut self,
        bus: &EventBus,
        scheduler: &mut Scheduler<T>,
        retransmit_timer: TimerId,
    ) {
        if self.retries >= MAX_RETRIES {
            scheduler.stop(retransmit_timer);
            self.retries = 0;
            #[cfg(feature = "log")]
            log::warn!("tx failed after {} retries", MAX_RETRIES);
            bus.trigger(Group::Nrf24, Nrf24Event::TxFailed as u8, None);
            self.fifo.complete();
            self.state = State::Idle;
            self.dispatch_next(scheduler, retransmit_timer);
            return;
        }
        #[cfg(feature = "log")]
        log::debug!("retransmitting, attempt {}", self.retries + 1);
        self.transmit_and_listen_for_ack();
        self.retries += 1;
    }

    /// Called from the radio's end-of-packet interrupt. Dispatches to the TX-ack-wait path or
    /// the RX-data path depending on which logical address matched.
    pub fn on_radio_end_event<T: TickSource>(
        &mut self,
        bus: &EventBus,
        scheduler: &mut Scheduler<T>,
        retransmit_timer: TimerId,
    ) {
        match self.mode {
            LinkMode::Tx => {
                if self.state == State::WaitAck && self.radio.received_address() == 0 {
                    scheduler.stop(retransmit_timer);
                    self.retries = 0;
                    bus.trigger(Group::Nrf24, Nrf24Event::TxSuccess as u8, None);
                    self.fifo.complete();
                    self.state = State::Idle;
                    self.dispatch_next(scheduler, retransmit_timer);
                }
            }
            LinkMode::Rx => {
                if self.radio.received_address() == 1 {
                    let received = Packet::read_air_buffer(&self.rx_buf);
                    if received.pid != self.prev_pid {
                        self.prev_pid = received.pid;
                        bus.trigger(
                            Group::Nrf24,
                            Nrf24Event::DataReady as u8,
                            Some(&received.payload[..received.len as usize]),
                        );
                    }
                    self.send_ack();
                }
            }
        }
    }

    /// Zero-payload ACK: switch to TX briefly, transmit, then return to listening.
    fn send_ack(&mut self) {
        self.ack_buf = [0; PAYLOAD_LEN + 2];
        self.radio.select_addresses(1, 0);
        self.radio.set_packet_ptr(self.ack_buf.as_ptr());
        self.radio.enable(radio::Mode::Tx);
        self.radio.start(radio::Mode::Tx);

        self.rx_buf = [0; PAYLOAD_LEN + 2];
        self.radio.select_addresses(0, 0b10);
        self.radio.set_packet_ptr(self.rx_buf.as_ptr());
        self.radio.enable(radio::Mode::Rx);
        self.radio.enable_end_interrupt();
        self.radio.start(radio::Mode::Rx);
    }
}

/// The link compiled without ESB semantics: no PID, no NO_ACK, no retransmit. `send` transmits
/// immediately and reports success unconditionally, matching `nrf24.c`'s `#else` branch.
#[cfg(not(feature = "esb"))]
impl EsbLink {
    pub fn send_no_ack(&mut self, data: &[u8], bus: &EventBus) -> Result<(), Error> {
        if self.mode != LinkMode::Tx {
            bus.trigger(Group::Nrf24, Nrf24Event::InvalidOperation as u8, None);
            return Err(Error::InvalidOperation);
        }
        let len = data.len().min(PAYLOAD_LEN) as u8;
        self.tx_buf[0] = len;
        self.tx_buf[1] = 0;
        self.tx_buf[2..2 + len as usize].copy_from_slice(&data[..len as usize]);

        self.radio.select_addresses(0, 0);
        self.radio.set_packet_ptr(self.tx_buf.as_ptr());
        self.radio.enable(radio::Mode::Tx);
        self.radio.start(radio::Mode::Tx);

        bus.trigger(Group::Nrf24, Nrf24Event::TxSuccess as u8, None);
        Ok(())
    }
}
