//! Per-port state owned by a [`crate::DeviceSession`].
use crate::constants::*;
use crate::queue::CircularQueue;
use crate::termios::{FlowControl, InterfaceMode, LineSettings, Termios};
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

/// Per-port counters, as returned by TIOCGICOUNT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ICount {
    pub rx: u64,
    pub tx: u64,
    pub brk: u64,
    pub frame: u64,
    pub parity: u64,
    pub overrun: u64,
    pub cts: u64,
    pub dsr: u64,
    pub dcd: u64,
    pub rng: u64,
    /// Received bytes dropped because the receive queue was full
    pub buf_overrun: u64,
}

/// A snapshot of a port's hold reasons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HoldReasons(pub u16);

impl HoldReasons {
    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

const HOLD_NAMES: &[(u16, &str)] = &[
    (MX_WAIT_FOR_CTS, "CTS"),
    (MX_WAIT_FOR_DSR, "DSR"),
    (MX_WAIT_FOR_DCD, "DCD"),
    (MX_WAIT_FOR_XON, "XON"),
    (MX_WAIT_FOR_START_TX, "START_TX"),
    (MX_WAIT_FOR_UNTHROTTLE, "UNTHROTTLE"),
    (MX_WAIT_FOR_LOW_WATER, "LOW_WATER"),
    (MX_WAIT_FOR_SEND_NEXT, "SEND_NEXT"),
];

impl fmt::Display for HoldReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (bit, name) in HOLD_NAMES {
            if self.0 & bit != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The hold reasons bitmask.  Updated from both host calls and completion
/// handlers without taking a lock.  `set` and `clear` return the previous
/// mask so the caller can tell whether it made the transition.
#[derive(Debug, Default)]
pub(crate) struct Holds(AtomicU16);

impl Holds {
    pub(crate) fn set(&self, bits: u16) -> u16 {
        self.0.fetch_or(bits, Ordering::AcqRel)
    }

    pub(crate) fn clear(&self, bits: u16) -> u16 {
        self.0.fetch_and(!bits, Ordering::AcqRel)
    }

    pub(crate) fn get(&self) -> HoldReasons {
        HoldReasons(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn intersects(&self, bits: u16) -> bool {
        self.0.load(Ordering::Acquire) & bits != 0
    }

    pub(crate) fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Modem and line state, guarded by the port-state lock
#[derive(Debug)]
pub(crate) struct PortStatus {
    pub(crate) termios: Termios,
    /// (cflag, iflag) last programmed into the device
    pub(crate) applied: Option<(u32, u32)>,
    pub(crate) settings: LineSettings,
    pub(crate) special_baud: Option<u32>,
    pub(crate) interface: InterfaceMode,
    /// DSR/DCD handshaking, which termios can't express
    pub(crate) flow_extras: FlowControl,
    /// TIOCM_DTR | TIOCM_RTS as last set
    pub(crate) mcr: u32,
    /// UART_MSR_* levels from the last MSR event
    pub(crate) msr: u8,
    /// Whether an MSR event has arrived since open
    pub(crate) msr_reported: bool,
    /// Cumulative UART_LSR_* error bits
    pub(crate) lsr: u8,
    pub(crate) icount: ICount,
    pub(crate) break_on: bool,
}

impl Default for PortStatus {
    fn default() -> Self {
        let termios = Termios::default();
        Self {
            termios,
            applied: None,
            settings: LineSettings::default(),
            special_baud: None,
            interface: InterfaceMode::default(),
            flow_extras: FlowControl::NONE,
            mcr: 0,
            msr: 0,
            msr_reported: false,
            lsr: 0,
            icount: ICount::default(),
            break_on: false,
        }
    }
}

impl PortStatus {
    pub(crate) fn flow(&self) -> FlowControl {
        self.settings.flow | self.flow_extras
    }

    /// TIOCM_* view of the modem lines
    pub(crate) fn modem_bits(&self) -> u32 {
        let mut bits = self.mcr & (TIOCM_DTR | TIOCM_RTS);
        for (msr, tiocm) in [
            (UART_MSR_CTS, TIOCM_CTS),
            (UART_MSR_DSR, TIOCM_DSR),
            (UART_MSR_DCD, TIOCM_CAR),
            (UART_MSR_RI, TIOCM_RNG),
        ] {
            if self.msr & msr != 0 {
                bits |= tiocm;
            }
        }
        bits
    }
}

/// Receive path, guarded by the read-path lock
#[derive(Debug)]
pub(crate) struct RxPath {
    pub(crate) queue: CircularQueue,
    pub(crate) push_in_flight: bool,
}

/// Transmit path, guarded by the write-path lock
#[derive(Debug)]
pub(crate) struct TxPath {
    pub(crate) queue: CircularQueue,
    pub(crate) write_in_progress: bool,
    /// Payload bytes sent since the last sequence flagged chunk
    pub(crate) sent_since_seq: usize,
}

/// One logical UART channel of a device
#[derive(Debug)]
pub(crate) struct PortState {
    pub(crate) index: usize,
    pub(crate) holds: Holds,
    pub(crate) open_count: AtomicUsize,
    pub(crate) status: Mutex<PortStatus>,
    /// Signalled on every MSR event and on close
    pub(crate) status_changed: Condvar,
    pub(crate) rx: Mutex<RxPath>,
    pub(crate) tx: Mutex<TxPath>,
}

impl PortState {
    pub(crate) fn new(index: usize, capacity: usize) -> Result<Self, Error> {
        trace!("PortState::new index {index} capacity {capacity}");
        Ok(Self {
            index,
            holds: Holds::default(),
            open_count: AtomicUsize::new(0),
            status: Mutex::new(PortStatus::default()),
            status_changed: Condvar::new(),
            rx: Mutex::new(RxPath {
                queue: CircularQueue::new(capacity, index as u16)?,
                push_in_flight: false,
            }),
            tx: Mutex::new(TxPath {
                queue: CircularQueue::new(capacity, index as u16)?,
                write_in_progress: false,
                sent_since_seq: 0,
            }),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open_count.load(Ordering::Acquire) > 0
    }

    /// Return the port to its just-opened state.  Configuration (termios,
    /// interface, extra flow control) is kept and re-applied by open.
    pub(crate) fn reset_for_open(&self) {
        trace!("PortState::reset_for_open port {}", self.index);
        self.holds.reset();
        {
            let mut status = self.status.lock();
            status.applied = None;
            status.mcr = 0;
            status.msr = 0;
            status.msr_reported = false;
            status.lsr = 0;
            status.icount = ICount::default();
            status.break_on = false;
        }
        {
            let mut rx = self.rx.lock();
            rx.queue.clear();
            rx.push_in_flight = false;
        }
        let mut tx = self.tx.lock();
        tx.queue.clear();
        tx.queue.clear_sequence_marker();
        tx.write_in_progress = false;
        tx.sent_since_seq = 0;
    }

    /// Drop anything queued in either direction
    pub(crate) fn clear_queues(&self) {
        self.rx.lock().queue.clear();
        let mut tx = self.tx.lock();
        tx.queue.clear();
        tx.queue.clear_sequence_marker();
        tx.write_in_progress = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_set_twice_clear_once() {
        let holds = Holds::default();
        assert_eq!(holds.set(MX_WAIT_FOR_CTS), 0);
        assert_eq!(holds.set(MX_WAIT_FOR_CTS), MX_WAIT_FOR_CTS);
        holds.clear(MX_WAIT_FOR_CTS);
        assert!(holds.get().is_empty());
    }

    #[test]
    fn test_holds_are_independent() {
        let holds = Holds::default();
        holds.set(MX_WAIT_FOR_XON);
        holds.set(MX_WAIT_FOR_LOW_WATER);
        holds.clear(MX_WAIT_FOR_XON);
        assert_eq!(holds.get(), HoldReasons(MX_WAIT_FOR_LOW_WATER));
        assert!(holds.intersects(HOLD_RX_MASK));
        assert_eq!(holds.get().to_string(), "LOW_WATER");
    }

    #[test]
    fn test_modem_bits() {
        let status = PortStatus {
            mcr: TIOCM_DTR,
            msr: UART_MSR_CTS | UART_MSR_DCD,
            ..Default::default()
        };
        assert_eq!(status.modem_bits(), TIOCM_DTR | TIOCM_CTS | TIOCM_CAR);
    }

    #[test]
    fn test_reset_for_open_clears_state() {
        let port = PortState::new(1, 64).unwrap();
        port.holds.set(MX_WAIT_FOR_SEND_NEXT);
        port.rx.lock().queue.insert(b"abc");
        port.tx.lock().queue.set_sequence_marker();
        port.status.lock().icount.rx = 3;

        port.reset_for_open();
        assert!(port.holds.get().is_empty());
        assert!(port.rx.lock().queue.is_empty());
        assert!(!port.tx.lock().queue.sequence_marker());
        assert_eq!(port.status.lock().icount, ICount::default());
    }
}
