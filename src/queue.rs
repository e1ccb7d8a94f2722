//! Fixed capacity byte ring used for the transmit and receive path of every
//! port.
//!
//! The queue does no locking of its own.  The session holds it inside the
//! matching per-direction lock of the owning port.
use crate::codec::FrameHeader;
use crate::constants::HEADER_SIZE;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::cmp::min;

/// A single-producer/single-consumer circular byte queue.
///
/// `front == rear` is ambiguous between empty and full, so a full flag is
/// kept alongside the indices.
#[derive(Debug)]
pub struct CircularQueue {
    buf: Vec<u8>,
    front: usize,
    rear: usize,
    full: bool,
    port: u16,
    seq_marker: bool,
}

impl CircularQueue {
    /// Allocate a queue of `capacity` bytes owned by `port`.
    ///
    /// # Returns
    /// * `Ok(CircularQueue)` - the empty queue
    /// * `Err(Error::OutOfMemory)` - if the backing buffer could not be allocated
    /// * `Err(Error::Args)` - if `capacity` is zero
    pub fn new(capacity: usize, port: u16) -> Result<Self, Error> {
        trace!("CircularQueue::new capacity {capacity} port {port}");
        if capacity == 0 {
            return Err(Error::Args {
                message: "Queue capacity must be non-zero".to_string(),
            });
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|e| {
            warn!("Failed to allocate {capacity} byte queue for port {port}: {e}");
            Error::OutOfMemory { size: capacity }
        })?;
        buf.resize(capacity, 0);

        Ok(Self {
            buf,
            front: 0,
            rear: 0,
            full: false,
            port,
            seq_marker: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bytes currently held
    pub fn depth(&self) -> usize {
        let cap = self.capacity();
        if self.full && self.front == self.rear {
            cap
        } else {
            (cap - self.front + self.rear) % cap
        }
    }

    /// Bytes that can still be inserted
    pub fn space(&self) -> usize {
        self.capacity() - self.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Mark the next framed chunk as carrying the sequence flag.
    pub fn set_sequence_marker(&mut self) {
        self.seq_marker = true;
    }

    pub fn sequence_marker(&self) -> bool {
        self.seq_marker
    }

    pub fn clear_sequence_marker(&mut self) {
        self.seq_marker = false;
    }

    /// Copy as much of `data` as fits.  Overflow is truncated rather than
    /// treated as an error - compare the return value against `data.len()`
    /// to detect dropped bytes.
    pub fn insert(&mut self, data: &[u8]) -> usize {
        let cap = self.capacity();
        let count = min(data.len(), self.space());
        if count == 0 {
            return 0;
        }

        let first = min(count, cap - self.rear);
        self.buf[self.rear..self.rear + first].copy_from_slice(&data[..first]);
        let rest = count - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..count]);
        }

        self.rear = (self.rear + count) % cap;
        if self.rear == self.front {
            self.full = true;
        }
        count
    }

    /// Pull a framed chunk for the bulk out pipe into `out`.
    ///
    /// The first [`HEADER_SIZE`] bytes of `out` receive the header, followed
    /// by up to `max_len - HEADER_SIZE` bytes of queued data.  A pending
    /// sequence marker is encoded into this header and then consumed.
    ///
    /// # Returns
    /// The total bytes written including the header, or 0 if the queue is
    /// empty, in which case `out` is untouched.
    pub fn remove_for_tx(&mut self, out: &mut [u8], max_len: usize) -> usize {
        let limit = min(max_len, out.len());
        if self.is_empty() || limit <= HEADER_SIZE {
            return 0;
        }

        let count = self.copy_out(&mut out[HEADER_SIZE..limit]);
        let header = FrameHeader::new(self.port, count as u16, self.seq_marker);
        out[..HEADER_SIZE].copy_from_slice(&header.encode());
        self.seq_marker = false;
        HEADER_SIZE + count
    }

    /// Pull up to `max_len` unframed bytes into `out`.
    ///
    /// # Returns
    /// The number of bytes written, 0 if the queue is empty
    pub fn remove_for_rx(&mut self, out: &mut [u8], max_len: usize) -> usize {
        let limit = min(max_len, out.len());
        if self.is_empty() || limit == 0 {
            return 0;
        }
        self.copy_out(&mut out[..limit])
    }

    /// Discard all queued bytes.  The backing buffer is not zeroed.
    pub fn clear(&mut self) {
        self.front = 0;
        self.rear = 0;
        self.full = false;
    }

    // Copies min(depth, dst.len()) bytes out from the front, wrap aware
    fn copy_out(&mut self, dst: &mut [u8]) -> usize {
        let cap = self.capacity();
        let count = min(self.depth(), dst.len());
        if count == 0 {
            return 0;
        }

        let first = min(count, cap - self.front);
        dst[..first].copy_from_slice(&self.buf[self.front..self.front + first]);
        let rest = count - first;
        if rest > 0 {
            dst[first..count].copy_from_slice(&self.buf[..rest]);
        }

        self.front = (self.front + count) % cap;
        self.full = false;
        count
    }
}
