//! [`DeviceSession`] is one attached UPort and all of its ports.
//!
//! The session is driven from two directions:
//! - host calls (`open`, `close`, `set_termios`, `write`, `ioctl`, ...),
//!   which may block on control requests
//! - [`DeviceSession::handle_completion`], fed with the transport's
//!   [`Completion`]s, which never blocks
//!
//! Opens and closes across all ports of a device are serialized by one
//! device lock.  Each port has three finer locks (state, read path, write
//! path) which are never held across a control request or a listener call.
mod attach;
mod callbacks;
mod ioctl;
mod ops;
pub mod port;

pub use ioctl::IoctlResult;
pub use port::{HoldReasons, ICount};

use crate::config::SessionConfig;
use crate::error::{DeviceAccessError, PortError};
use crate::profile::DeviceProfile;
use crate::termios::{InterfaceMode, LineSettings};
use crate::transport::{Completion, Endpoints, Pipe, Transport};
use crate::Error;
use port::PortState;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives data and notifications for open ports.  Plays the part of the
/// tty line discipline.
///
/// Called from completion handling, so implementations must not block and
/// must not call back into the session's blocking operations.
pub trait PortListener: Send + Sync {
    /// Received bytes for `port`
    fn receive(&self, port: usize, data: &[u8]);

    /// `port`'s transmit queue has drained
    fn write_wakeup(&self, _port: usize) {}

    /// New modem status levels (UART_MSR_*) for `port`
    fn modem_change(&self, _port: usize, _msr: u8) {}
}

/// Outcome of [`DeviceSession::wait_until_sent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrainStatus {
    /// The device reported an empty transmit buffer
    Drained,
    /// Data was still queued after the last poll
    TimedOut,
}

/// A point in time view of a port, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub port: usize,
    pub open: bool,
    pub settings: LineSettings,
    pub special_baud: Option<u32>,
    pub interface: InterfaceMode,
    pub holds: HoldReasons,
    pub modem: u32,
    pub line_errors: u8,
    pub icount: ICount,
    pub rx_depth: usize,
    pub tx_depth: usize,
}

#[derive(Debug, Default)]
struct DeviceOpenState {
    open_count: usize,
}

/// One attached UPort
pub struct DeviceSession<T: Transport> {
    transport: T,
    profile: DeviceProfile,
    config: SessionConfig,
    endpoints: Endpoints,
    fw_version: u32,
    ports: Vec<PortState>,
    open_lock: Mutex<DeviceOpenState>,
    reads_active: AtomicBool,
    attached: AtomicBool,
    listener: RwLock<Option<Arc<dyn PortListener>>>,
}

impl<T: Transport> fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("transport", &self.transport)
            .field("profile", &self.profile)
            .field("fw_version", &self.fw_version)
            .field("endpoints", &self.endpoints)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> DeviceSession<T> {
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// Firmware version running on the device, as `b0 << 16 | b1 << 8 | b2`
    pub fn firmware_version(&self) -> u32 {
        self.fw_version
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn is_open(&self, port: usize) -> bool {
        self.ports.get(port).is_some_and(|p| p.is_open())
    }

    /// Install the receiver of pushed data and notifications
    pub fn set_listener(&self, listener: Arc<dyn PortListener>) {
        trace!("DeviceSession::set_listener");
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        trace!("DeviceSession::clear_listener");
        self.listener.write().take();
    }

    /// Current hold reasons of `port`
    pub fn holds(&self, port: usize) -> Result<HoldReasons, Error> {
        Ok(self.port(port)?.holds.get())
    }

    /// Feed one transport completion into the session.  Must be called for
    /// every completion, one at a time, in the order they were produced.
    pub fn handle_completion(&self, completion: Completion) {
        match completion {
            Completion::Read {
                pipe: Pipe::Data,
                data,
            } => self.data_complete(&data),
            Completion::Read {
                pipe: Pipe::Event,
                data,
            } => self.event_complete(&data),
            Completion::ReadError { pipe, error } => self.read_failed(pipe, error),
            Completion::Write { port, result } => self.write_complete(port, result),
        }
    }

    /// The device has gone.  Stops the read pipes and wakes any blocked
    /// waiters; further operations fail with `NoDevice`.
    pub fn disconnect(&self) {
        trace!("DeviceSession::disconnect");
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("{} disconnected", self.profile);
        self.stop_reads();
        for port in &self.ports {
            port.tx.lock().write_in_progress = false;
            let _status = port.status.lock();
            port.status_changed.notify_all();
        }
    }

    fn port(&self, port: usize) -> Result<&PortState, Error> {
        self.ports.get(port).ok_or_else(|| {
            warn!("Invalid port {port}, device has {}", self.ports.len());
            Error::Port {
                kind: PortError::Invalid {
                    port,
                    num_ports: self.ports.len(),
                },
            }
        })
    }

    fn check_attached(&self) -> Result<(), Error> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(DeviceAccessError::NoDevice.into())
        }
    }

    /// The port, provided the device is present and the port is open
    fn open_port(&self, port: usize) -> Result<&PortState, Error> {
        self.check_attached()?;
        let state = self.port(port)?;
        if !state.is_open() {
            debug!("Port {port} is not open");
            return Err(PortError::NotOpen { port }.into());
        }
        Ok(state)
    }

    fn listener(&self) -> Option<Arc<dyn PortListener>> {
        self.listener.read().clone()
    }

    fn start_reads(&self) -> Result<(), Error> {
        trace!("DeviceSession::start_reads");
        self.reads_active.store(true, Ordering::Release);
        for pipe in [Pipe::Data, Pipe::Event] {
            if let Err(e) = self.transport.submit_read(pipe) {
                warn!("Failed to submit {pipe} read: {e}");
                self.stop_reads();
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop_reads(&self) {
        trace!("DeviceSession::stop_reads");
        if self.reads_active.swap(false, Ordering::AcqRel) {
            self.transport.kill_read(Pipe::Data);
            self.transport.kill_read(Pipe::Event);
        }
    }

    /// Level for per-frame and per-event logging
    fn frame_level(&self) -> log::Level {
        if self.config.debug {
            log::Level::Debug
        } else {
            log::Level::Trace
        }
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        trace!("DeviceSession::drop");
        self.stop_reads();
    }
}
