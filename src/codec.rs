//! Wire formats for the UPort bulk pipes.
//!
//! The data pipes carry chunks prefixed with a 4 byte [`FrameHeader`]:
//!
//! | byte | contents |
//! |------|----------|
//! | 0    | bit 7 sequence flag, bits 6:0 port high byte |
//! | 1    | port low byte |
//! | 2-3  | payload length, big endian |
//!
//! The event pipe carries fixed [`MAX_EVENT_LENGTH`] byte records: port (2
//! bytes), event code (2 bytes), then 4 bytes of event specific payload.
use crate::constants::*;
use crate::error::CommunicationError;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::fmt;

/// Header prefixing each chunk on the data pipes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub port: u16,
    pub len: u16,
    pub seq: bool,
}

impl FrameHeader {
    pub fn new(port: u16, len: u16, seq: bool) -> Self {
        Self { port, len, seq }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut hi = ((self.port >> 8) & 0x7f) as u8;
        if self.seq {
            hi |= HEADER_SEQ_FLAG;
        }
        [
            hi,
            (self.port & 0xff) as u8,
            (self.len >> 8) as u8,
            (self.len & 0xff) as u8,
        ]
    }

    /// Decode a header as received from the device.
    ///
    /// The port is rebuilt from both bytes without stripping bit 7 of byte
    /// 0.  The device never sets it on receive, and ports are below 128.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            port: u16::from_be_bytes([buf[0], buf[1]]),
            len: u16::from_be_bytes([buf[2], buf[3]]),
            seq: false,
        }
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} len {}", self.port, self.len)?;
        if self.seq {
            write!(f, " (seq)")?;
        }
        Ok(())
    }
}

/// One chunk demultiplexed from a data pipe transfer
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub port: usize,
    /// Length declared in the header, which may exceed `payload.len()`
    pub declared_len: usize,
    pub payload: &'a [u8],
}

/// Iterates the frames of a single data pipe transfer, in arrival order.
///
/// A header naming a port outside `num_ports` or declaring a length over
/// the bulk packet size yields an error, after which the iterator is
/// exhausted - the rest of the transfer cannot be trusted.
#[derive(Debug)]
pub struct FrameIter<'a> {
    data: &'a [u8],
    offset: usize,
    num_ports: usize,
    max_len: usize,
    failed: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(data: &'a [u8], num_ports: usize, max_len: usize) -> Self {
        Self {
            data,
            offset: 0,
            num_ports,
            max_len,
            failed: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, CommunicationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.len().saturating_sub(self.offset) < HEADER_SIZE {
            return None;
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&self.data[self.offset..self.offset + HEADER_SIZE]);
        let header = FrameHeader::decode(&raw);
        let port = header.port as usize;
        let len = header.len as usize;

        if port >= self.num_ports {
            self.failed = true;
            return Some(Err(CommunicationError::FramePort {
                port,
                num_ports: self.num_ports,
            }));
        }
        if len > self.max_len {
            self.failed = true;
            return Some(Err(CommunicationError::FrameLength {
                len,
                max: self.max_len,
            }));
        }

        let start = self.offset + HEADER_SIZE;
        let available = self.data.len() - start;
        if len > available {
            warn!("Frame for port {port} declares {len} bytes but only {available} remain");
        }
        let end = start + len.min(available);
        self.offset = start + len;

        Some(Ok(Frame {
            port,
            declared_len: len,
            payload: &self.data[start..end],
        }))
    }
}

/// Events reported on the event pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None,
    /// Device tx buffer threshold reached - informational only
    TxBufThreshold,
    /// The device consumed a chunk carrying the sequence flag
    SendNext,
    /// Modem status change: current CTS/DSR/RI/DCD levels as UART_MSR_*
    /// bits, and which lines changed as SERIAL_EV_* bits
    Msr { levels: u8, changed: u16 },
    /// Line status errors as UART_LSR_* bits
    Lsr { lsr: u8 },
    /// Device is holding transmission because it received an XOFF
    Mcr { xoff_hold: bool },
    Unknown(u16),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::None => write!(f, "NONE"),
            Event::TxBufThreshold => write!(f, "TXBUF_THRESHOLD"),
            Event::SendNext => write!(f, "SEND_NEXT"),
            Event::Msr { levels, changed } => {
                write!(f, "MSR levels 0x{levels:02x} changed 0x{changed:04x}")
            }
            Event::Lsr { lsr } => write!(f, "LSR 0x{lsr:02x}"),
            Event::Mcr { xoff_hold } => write!(f, "MCR xoff_hold {xoff_hold}"),
            Event::Unknown(code) => write!(f, "UNKNOWN 0x{code:04x}"),
        }
    }
}

/// A single event pipe record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub port: usize,
    pub event: Event,
}

impl EventRecord {
    pub fn decode(buf: &[u8; MAX_EVENT_LENGTH]) -> Self {
        let port = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let code = u16::from_be_bytes([buf[2], buf[3]]);
        let payload = &buf[HEADER_SIZE..];

        let event = match code {
            UPORT_EVENT_NONE => Event::None,
            UPORT_EVENT_TXBUF_THRESHOLD => Event::TxBufThreshold,
            UPORT_EVENT_SEND_NEXT => Event::SendNext,
            UPORT_EVENT_MSR => Event::Msr {
                changed: u16::from_be_bytes([payload[0], payload[1]]),
                levels: payload[2] & 0xf0,
            },
            UPORT_EVENT_LSR => Event::Lsr { lsr: payload[2] },
            UPORT_EVENT_MCR => Event::Mcr {
                xoff_hold: u16::from_be_bytes([payload[0], payload[1]]) & SERIAL_EV_XOFF != 0,
            },
            other => Event::Unknown(other),
        };

        Self { port, event }
    }

    /// Build the wire form of a record.  Used to simulate a device.
    pub fn encode(&self) -> [u8; MAX_EVENT_LENGTH] {
        let (code, payload): (u16, [u8; 4]) = match self.event {
            Event::None => (UPORT_EVENT_NONE, [0; 4]),
            Event::TxBufThreshold => (UPORT_EVENT_TXBUF_THRESHOLD, [0; 4]),
            Event::SendNext => (UPORT_EVENT_SEND_NEXT, [0; 4]),
            Event::Msr { levels, changed } => {
                let c = changed.to_be_bytes();
                (UPORT_EVENT_MSR, [c[0], c[1], levels, 0])
            }
            Event::Lsr { lsr } => (UPORT_EVENT_LSR, [0, 0, lsr, 0]),
            Event::Mcr { xoff_hold } => {
                let bits: u16 = if xoff_hold { SERIAL_EV_XOFF } else { 0 };
                let bits = bits.to_be_bytes();
                (UPORT_EVENT_MCR, [bits[0], bits[1], 0, 0])
            }
            Event::Unknown(code) => (code, [0; 4]),
        };
        let port = (self.port as u16).to_be_bytes();
        let code = code.to_be_bytes();
        [
            port[0], port[1], code[0], code[1], payload[0], payload[1], payload[2], payload[3],
        ]
    }
}

/// Iterate the complete records of an event pipe transfer.  Trailing bytes
/// shorter than a record are ignored.
pub fn event_records(data: &[u8]) -> impl Iterator<Item = EventRecord> + '_ {
    if data.len() % MAX_EVENT_LENGTH != 0 {
        debug!(
            "Event transfer of {} bytes has {} trailing bytes",
            data.len(),
            data.len() % MAX_EVENT_LENGTH
        );
    }
    data.chunks_exact(MAX_EVENT_LENGTH).map(|chunk| {
        let mut raw = [0u8; MAX_EVENT_LENGTH];
        raw.copy_from_slice(chunk);
        EventRecord::decode(&raw)
    })
}

/// Build a data pipe transfer from (port, payload) pairs.  Used to simulate
/// a device.
pub fn encode_frames(frames: &[(u16, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (port, payload) in frames {
        out.extend_from_slice(&FrameHeader::new(*port, payload.len() as u16, false).encode());
        out.extend_from_slice(payload);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_layout() {
        let header = FrameHeader::new(0x0102, 0x0304, false);
        assert_eq!(header.encode(), [0x01, 0x02, 0x03, 0x04]);

        let header = FrameHeader::new(5, 2, true);
        assert_eq!(header.encode(), [0x80, 0x05, 0x00, 0x02]);
    }

    #[test]
    fn test_header_round_trip_at_port_boundary() {
        let num_ports = 4;
        let data = encode_frames(&[((num_ports - 1) as u16, b"xyz")]);
        let frames: Vec<_> = FrameIter::new(&data, num_ports, 512).collect();
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.port, num_ports - 1);
        assert_eq!(frame.declared_len, 3);

        let data = encode_frames(&[(num_ports as u16, b"xyz")]);
        let frames: Vec<_> = FrameIter::new(&data, num_ports, 512).collect();
        assert_eq!(
            frames,
            vec![Err(CommunicationError::FramePort {
                port: num_ports,
                num_ports
            })]
        );
    }

    #[test]
    fn test_bad_frame_aborts_rest_of_transfer() {
        let mut data = encode_frames(&[(0, &[0u8; 600])]);
        data.extend(encode_frames(&[(1, b"ok")]));
        let frames: Vec<_> = FrameIter::new(&data, 2, 512).collect();
        assert_eq!(
            frames,
            vec![Err(CommunicationError::FrameLength { len: 600, max: 512 })]
        );
    }

    #[test]
    fn test_multiple_frames_in_order() {
        let data = encode_frames(&[(1, b"AB"), (3, b"CDE")]);
        let frames: Vec<_> = FrameIter::new(&data, 4, 512)
            .map(|f| f.unwrap())
            .map(|f| (f.port, f.payload.to_vec()))
            .collect();
        assert_eq!(frames, vec![(1, b"AB".to_vec()), (3, b"CDE".to_vec())]);
    }

    #[test]
    fn test_short_frame_uses_available_bytes() {
        let mut data = FrameHeader::new(0, 10, false).encode().to_vec();
        data.extend_from_slice(b"abc");
        let frames: Vec<_> = FrameIter::new(&data, 1, 512).collect();
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.declared_len, 10);
        assert_eq!(frame.payload, b"abc");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_trailing_partial_header_ignored() {
        let mut data = encode_frames(&[(0, b"a")]);
        data.extend_from_slice(&[0, 0, 0]);
        assert_eq!(FrameIter::new(&data, 1, 512).count(), 1);
    }

    #[test]
    fn test_event_decode() {
        let raw = [0x00, 0x02, 0x00, 0x03, 0x00, 0x08, 0x30, 0x00];
        let record = EventRecord::decode(&raw);
        assert_eq!(record.port, 2);
        assert_eq!(
            record.event,
            Event::Msr {
                levels: UART_MSR_CTS | UART_MSR_DSR,
                changed: SERIAL_EV_CTS
            }
        );

        let raw = [0x00, 0x01, 0x00, 0x05, 0x00, 0x40, 0x00, 0x00];
        assert_eq!(
            EventRecord::decode(&raw).event,
            Event::Mcr { xoff_hold: true }
        );

        let raw = [0x00, 0x01, 0x00, 0x04, 0x00, 0x00, UART_LSR_BI | UART_LSR_OE, 0x00];
        assert_eq!(
            EventRecord::decode(&raw).event,
            Event::Lsr {
                lsr: UART_LSR_BI | UART_LSR_OE
            }
        );
    }

    #[test]
    fn test_event_records_ignores_partial() {
        let mut data = EventRecord {
            port: 0,
            event: Event::SendNext,
        }
        .encode()
        .to_vec();
        data.extend_from_slice(&[0, 1, 0]);
        let records: Vec<_> = event_records(&data).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, Event::SendNext);
    }
}
