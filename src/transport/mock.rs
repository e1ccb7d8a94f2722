//! [`MockTransport`] simulates a UPort in memory.  It records every request
//! and submission, and serves programmed control responses, so sessions can
//! be driven without hardware.
use super::{Endpoints, Pipe, Transport};
use crate::constants::request_name;
use crate::error::SerializableUsbError;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// A control request as seen by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
    /// Whether the request was queued with [`Transport::control_out_async`]
    pub asynchronous: bool,
}

#[derive(Debug, Default)]
struct MockState {
    requests: Vec<ControlRecord>,
    responses: HashMap<u8, VecDeque<Vec<u8>>>,
    failing: HashSet<u8>,
    fail_bulk_out: bool,
    bulk_out: Vec<(usize, Vec<u8>)>,
    reads_in_flight: [bool; 2],
    read_submits: [usize; 2],
    read_kills: [usize; 2],
}

#[derive(Debug)]
pub struct MockTransport {
    endpoints: Endpoints,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(endpoints: Endpoints) -> Self {
        trace!("MockTransport::new endpoints {endpoints:?}");
        Self {
            endpoints,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue a response for `request`.  Responses are served in order; the
    /// last one is repeated once the queue is down to one entry.
    pub fn push_response(&self, request: u8, data: Vec<u8>) {
        self.state
            .lock()
            .responses
            .entry(request)
            .or_default()
            .push_back(data);
    }

    /// Make every subsequent `request` fail
    pub fn fail_request(&self, request: u8) {
        self.state.lock().failing.insert(request);
    }

    /// Make every subsequent bulk out submission fail
    pub fn fail_bulk_out(&self, fail: bool) {
        self.state.lock().fail_bulk_out = fail;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing.clear();
        state.fail_bulk_out = false;
    }

    /// All control requests so far, synchronous and asynchronous
    pub fn requests(&self) -> Vec<ControlRecord> {
        self.state.lock().requests.clone()
    }

    /// Number of times `request` was sent
    pub fn count(&self, request: u8) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.request == request)
            .count()
    }

    /// Requests matching `request`, in order
    pub fn requests_of(&self, request: u8) -> Vec<ControlRecord> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.request == request)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Remove and return every submitted bulk out frame as (port, frame)
    pub fn take_bulk_out(&self) -> Vec<(usize, Vec<u8>)> {
        std::mem::take(&mut self.state.lock().bulk_out)
    }

    pub fn read_in_flight(&self, pipe: Pipe) -> bool {
        self.state.lock().reads_in_flight[pipe.index()]
    }

    pub fn read_submits(&self, pipe: Pipe) -> usize {
        self.state.lock().read_submits[pipe.index()]
    }

    pub fn read_kills(&self, pipe: Pipe) -> usize {
        self.state.lock().read_kills[pipe.index()]
    }

    /// Mark a read on `pipe` as completed, as the USB stack would before
    /// invoking the completion handler
    pub fn complete_read(&self, pipe: Pipe) {
        self.state.lock().reads_in_flight[pipe.index()] = false;
    }

    fn record(&self, request: u8, value: u16, index: u16, data: &[u8], asynchronous: bool) -> bool {
        let mut state = self.state.lock();
        state.requests.push(ControlRecord {
            request,
            value,
            index,
            data: data.to_vec(),
            asynchronous,
        });
        !state.failing.contains(&request)
    }
}

fn simulated_failure(request: u8) -> Error {
    Error::Usb(SerializableUsbError::UsbError {
        message: format!("Simulated failure of {}", request_name(request)),
        errno: libc::EPIPE,
    })
}

impl Transport for MockTransport {
    fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error> {
        if self.record(request, value, index, data, false) {
            Ok(())
        } else {
            Err(simulated_failure(request))
        }
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        if !self.record(request, value, index, &[], false) {
            return Err(simulated_failure(request));
        }
        let mut state = self.state.lock();
        let response = match state.responses.get_mut(&request) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => vec![0u8; buf.len()],
        };
        let len = response.len().min(buf.len());
        buf[..len].copy_from_slice(&response[..len]);
        Ok(len)
    }

    fn control_out_async(&self, request: u8, value: u16, index: u16, data: &[u8]) {
        if !self.record(request, value, index, data, true) {
            warn!("Async {} failed", request_name(request));
        }
    }

    fn submit_bulk_out(&self, port: usize, frame: Vec<u8>) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.fail_bulk_out {
            return Err(Error::Usb(SerializableUsbError::UsbError {
                message: format!("Simulated bulk out failure for port {port}"),
                errno: libc::EPIPE,
            }));
        }
        state.bulk_out.push((port, frame));
        Ok(())
    }

    fn submit_read(&self, pipe: Pipe) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.reads_in_flight[pipe.index()] = true;
        state.read_submits[pipe.index()] += 1;
        Ok(())
    }

    fn kill_read(&self, pipe: Pipe) {
        let mut state = self.state.lock();
        state.reads_in_flight[pipe.index()] = false;
        state.read_kills[pipe.index()] += 1;
    }
}
