//! The [`Transport`] trait is the boundary between the driver core and the
//! USB stack.  It lets a [`crate::DeviceSession`] run against real hardware
//! ([`UsbTransport`]) or a simulated device ([`MockTransport`]).
//!
//! Bulk transfers are asynchronous.  A transport accepts a submission and
//! later reports the outcome as a [`Completion`], which the owner feeds to
//! [`crate::DeviceSession::handle_completion`].  Completions for one session
//! must be delivered one at a time, in the order they occurred.

pub mod mock;
pub mod usb;

pub use mock::MockTransport;
pub use usb::UsbTransport;

use crate::constants::*;
use crate::error::CommunicationError;
use crate::firmware::version_from_bytes;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The two always-on bulk in pipes shared by every port of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pipe {
    /// Multiplexed received data, framed with [`crate::codec::FrameHeader`]
    Data,
    /// Fixed size event records
    Event,
}

impl Pipe {
    pub fn index(self) -> usize {
        match self {
            Pipe::Data => 0,
            Pipe::Event => 1,
        }
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipe::Data => write!(f, "data"),
            Pipe::Event => write!(f, "event"),
        }
    }
}

/// Endpoint addresses of a UPort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Shared bulk out endpoint carrying every port's transmit data
    pub bulk_out: u8,
    /// Bulk in endpoint carrying every port's received data
    pub data_in: u8,
    /// Bulk in endpoint carrying events
    pub event_in: u8,
    /// Max packet size of the bulk out endpoint
    pub bulkout_size: usize,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            bulk_out: 0x01,
            data_in: 0x81,
            event_in: 0x82,
            bulkout_size: DEFAULT_BULKOUT_SIZE,
        }
    }
}

impl Endpoints {
    pub fn for_pipe(&self, pipe: Pipe) -> u8 {
        match pipe {
            Pipe::Data => self.data_in,
            Pipe::Event => self.event_in,
        }
    }
}

/// Outcome of an asynchronous bulk transfer
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A read on `pipe` finished with `data`
    Read { pipe: Pipe, data: Vec<u8> },
    /// A read on `pipe` failed.  The pipe is no longer in flight.
    ReadError { pipe: Pipe, error: Error },
    /// A bulk out transfer for `port` finished
    Write {
        port: usize,
        result: Result<usize, Error>,
    },
}

/// The USB operations the driver core needs
pub trait Transport: fmt::Debug + Send + Sync {
    /// Endpoint layout of the attached device
    fn endpoints(&self) -> Endpoints;

    /// Sends a vendor control request, waiting for it to complete
    ///
    /// # Arguments
    /// * `request` - One of the RQ_VENDOR_* requests
    /// * `value` - The 2 byte request value
    /// * `index` - The port number, or 0 for device requests
    /// * `data` - Any payload
    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error>;

    /// Sends a vendor control request and reads the response into `buf`
    ///
    /// # Returns
    /// * `Ok(usize)` - the number of bytes read
    /// * `Err(Error)` - on failure
    fn control_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8])
        -> Result<usize, Error>;

    /// Queues a vendor control request without waiting.  Must not block, as
    /// it is called from completion handlers.  Failures are logged only.
    fn control_out_async(&self, request: u8, value: u16, index: u16, data: &[u8]);

    /// Queues a framed chunk on the bulk out endpoint.  The outcome is
    /// reported as [`Completion::Write`] for `port`.
    fn submit_bulk_out(&self, port: usize, frame: Vec<u8>) -> Result<(), Error>;

    /// Puts a read in flight on `pipe`.  The outcome is reported as
    /// [`Completion::Read`] or [`Completion::ReadError`].
    fn submit_read(&self, pipe: Pipe) -> Result<(), Error>;

    /// Cancels any read in flight on `pipe`.  Best effort and asynchronous.
    fn kill_read(&self, pipe: Pipe);
}

/// Typed wrappers around the UPort vendor requests, available on every
/// [`Transport`].
pub trait VendorRequests: Transport {
    /// Send a request with no payload, mapping failures to a
    /// [`CommunicationError::ControlFailed`]
    fn send_request(&self, request: u8, value: u16, port: u16) -> Result<(), Error> {
        self.send_request_data(request, value, port, &[])
    }

    fn send_request_data(
        &self,
        request: u8,
        value: u16,
        port: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        trace!(
            "VendorRequests::send_request {} value 0x{value:04x} port {port} data.len() {}",
            request_name(request),
            data.len()
        );
        self.control_out(request, value, port, data)
            .map_err(|e| control_failed(request, e))
    }

    /// Read a response which must be exactly `buf.len()` bytes
    fn recv_request(&self, request: u8, value: u16, port: u16, buf: &mut [u8]) -> Result<(), Error> {
        trace!(
            "VendorRequests::recv_request {} value 0x{value:04x} port {port} buf.len() {}",
            request_name(request),
            buf.len()
        );
        let len = self
            .control_in(request, value, port, buf)
            .map_err(|e| control_failed(request, e))?;
        if len != buf.len() {
            warn!(
                "{} returned {len} bytes, expected {}",
                request_name(request),
                buf.len()
            );
            return Err(CommunicationError::ShortControlRead {
                request,
                actual: len,
                expected: buf.len(),
            }
            .into());
        }
        Ok(())
    }

    fn query_fw_config(&self) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_QUERY_FW_CONFIG, 0, 0)
    }

    fn reset_device(&self) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_RESET_DEVICE, 0, 0)
    }

    /// Read the device firmware version as `b0 << 16 | b1 << 8 | b2`
    fn get_version(&self) -> Result<u32, Error> {
        let mut buf = [0u8; VERSION_BUF_SIZE];
        self.recv_request(RQ_VENDOR_GET_VERSION, 0, 0, &mut buf)?;
        Ok(version_from_bytes(&buf))
    }

    fn start_fw_download(&self) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_START_FW_DOWN, 0, 0)
    }

    fn fw_data(&self, block: &[u8]) -> Result<(), Error> {
        self.send_request_data(RQ_VENDOR_FW_DATA, 0, 0, block)
    }

    fn stop_fw_download(&self) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_STOP_FW_DOWN, 0, 0)
    }

    fn query_fw_ready(&self) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_QUERY_FW_READY, 0, 0)
    }

    fn set_fifo_disable(&self, port: u16, disable: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_FIFO_DISABLE, disable as u16, port)
    }

    fn set_high_performance(&self, port: u16, enable: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_HIGH_PERFOR, enable as u16, port)
    }

    fn set_interface(&self, port: u16, mode: u16) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_INTERFACE, mode, port)
    }

    fn set_open(&self, port: u16, open: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_OPEN, open as u16, port)
    }

    fn set_rx_host_enable(&self, port: u16, enable: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_RX_HOST_EN, enable as u16, port)
    }

    /// Best effort RX enable/disable for use from completion handlers
    fn set_rx_host_enable_async(&self, port: u16, enable: bool) {
        trace!("VendorRequests::set_rx_host_enable_async port {port} enable {enable}");
        self.control_out_async(RQ_VENDOR_SET_RX_HOST_EN, enable as u16, port, &[]);
    }

    fn set_line(&self, port: u16, payload: [u8; 4]) -> Result<(), Error> {
        self.send_request_data(RQ_VENDOR_SET_LINE, 0, port, &payload)
    }

    fn set_baud(&self, port: u16, baud: u32) -> Result<(), Error> {
        self.send_request_data(RQ_VENDOR_SET_BAUD, 0, port, &baud.to_le_bytes())
    }

    fn set_rts(&self, port: u16, value: u16) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_RTS, value, port)
    }

    fn set_dtr(&self, port: u16, on: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_DTR, on as u16, port)
    }

    fn set_break(&self, port: u16, on: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_BREAK, on as u16, port)
    }

    fn set_chars(&self, port: u16, xon: u8, xoff: u8) -> Result<(), Error> {
        self.send_request_data(RQ_VENDOR_SET_CHARS, 0, port, &[xon, xoff])
    }

    fn set_xonxoff(&self, port: u16, enable: bool) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_SET_XONXOFF, enable as u16, port)
    }

    fn purge(&self, port: u16, mask: u16) -> Result<(), Error> {
        self.send_request(RQ_VENDOR_PURGE, mask, port)
    }

    /// Bytes still held in the device's transmit buffer for `port`
    fn get_outqueue(&self, port: u16) -> Result<u32, Error> {
        let mut buf = [0u8; OUTQUEUE_BUF_SIZE];
        self.recv_request(RQ_VENDOR_GET_OUTQUEUE, 0, port, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }
}

impl<T: Transport + ?Sized> VendorRequests for T {}

/// Lets a caller keep its own handle on a transport it gives to a session
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn endpoints(&self) -> Endpoints {
        (**self).endpoints()
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error> {
        (**self).control_out(request, value, index, data)
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        (**self).control_in(request, value, index, buf)
    }

    fn control_out_async(&self, request: u8, value: u16, index: u16, data: &[u8]) {
        (**self).control_out_async(request, value, index, data)
    }

    fn submit_bulk_out(&self, port: usize, frame: Vec<u8>) -> Result<(), Error> {
        (**self).submit_bulk_out(port, frame)
    }

    fn submit_read(&self, pipe: Pipe) -> Result<(), Error> {
        (**self).submit_read(pipe)
    }

    fn kill_read(&self, pipe: Pipe) {
        (**self).kill_read(pipe)
    }
}

fn control_failed(request: u8, error: Error) -> Error {
    let name = request_name(request);
    warn!("Control request {name} failed: {error}");
    match error {
        // These already name their cause
        e @ Error::DeviceAccess { .. } => e,
        e @ Error::Timeout { .. } => e,
        e => CommunicationError::ControlFailed {
            request,
            name: name.to_string(),
            message: e.to_string(),
            errno: e.to_errno(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_baud_is_little_endian() {
        let transport = MockTransport::new(Endpoints::default());
        transport.set_baud(2, 115200).unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request, RQ_VENDOR_SET_BAUD);
        assert_eq!(requests[0].index, 2);
        assert_eq!(requests[0].data, 115200u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_get_outqueue_is_big_endian() {
        let transport = MockTransport::new(Endpoints::default());
        transport.push_response(RQ_VENDOR_GET_OUTQUEUE, vec![0, 0, 1, 2]);
        assert_eq!(transport.get_outqueue(0).unwrap(), 0x0102);
    }

    #[test]
    fn test_short_response_is_error() {
        let transport = MockTransport::new(Endpoints::default());
        transport.push_response(RQ_VENDOR_GET_VERSION, vec![1, 2]);
        assert!(matches!(
            transport.get_version(),
            Err(Error::Communication {
                kind: CommunicationError::ShortControlRead { .. }
            })
        ));
    }

    #[test]
    fn test_failure_maps_to_control_failed() {
        let transport = MockTransport::new(Endpoints::default());
        transport.fail_request(RQ_VENDOR_SET_OPEN);
        let err = transport.set_open(0, true).unwrap_err();
        assert!(matches!(
            err,
            Error::Communication {
                kind: CommunicationError::ControlFailed {
                    request: RQ_VENDOR_SET_OPEN,
                    errno: libc::EPIPE,
                    ..
                }
            }
        ));
        assert_eq!(err.to_status(), -libc::EPIPE);
    }
}
