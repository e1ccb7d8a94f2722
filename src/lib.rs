//! # mxuport
//!
//! This crate is a user-space driver core for the MOXA UPort family of
//! multi-port USB-to-serial adapters (UPort 1250, 1410, 1450, 1610 and
//! 1650 series).  A UPort multiplexes 2, 4, 8 or 16 UARTs over a single USB
//! device: every port's transmit data shares one bulk out endpoint, all
//! received data arrives on one bulk in endpoint, and modem/line status
//! changes arrive as fixed size records on a second bulk in endpoint.
//! Ports are configured with vendor control requests.
//!
//! ## Overview
//!
//! The crate is structured around three components:
//!
//! - [`DeviceSession`] - one attached UPort and all of its ports.  Handles
//!   the firmware handshake at attach, the per-port open/close state
//!   machine, termios, flow control and the host facing tty operations
//!   (`write`, `read`, `throttle`, `ioctl`, ...)
//! - [`Transport`] - the USB operations the session needs.  [`UsbTransport`]
//!   implements it with rusb.  [`MockTransport`] implements it in memory,
//!   recording every request, for testing.
//! - [`SessionBuilder`] - finds a UPort on the bus, builds the
//!   [`UsbTransport`] and attaches a session, returning a [`UsbSession`]
//!
//! ### Data flow
//!
//! Bulk transfers are asynchronous.  A transport reports finished transfers
//! as [`Completion`]s, which are fed to
//! [`DeviceSession::handle_completion`].  From there the session:
//!
//! - demultiplexes data pipe frames into each open port's receive queue,
//!   applying high/low water backpressure, and pushes received bytes to the
//!   installed [`PortListener`]
//! - applies event pipe records (modem status, line status, XON/XOFF state
//!   and SEND_NEXT acknowledgements) to each port
//! - chains transmission, sending the next queued chunk of a port when its
//!   previous chunk completes
//!
//! [`UsbSession`] runs a dispatcher thread which does this feeding.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use mxuport::{SessionBuilder, Termios};
//!
//! let session = SessionBuilder::new()
//!     .firmware_dir("/lib/firmware")
//!     .build()
//!     .unwrap();
//! println!("Attached {}", session.profile());
//!
//! session.open(0).unwrap();
//! session.set_termios(0, Termios::default()).unwrap();
//! session.write(0, b"hello\r\n").unwrap();
//! session.close(0).unwrap();
//! ```
//!
//! ## Testing Without Hardware
//!
//! ```rust
//! use mxuport::codec::encode_frames;
//! use mxuport::constants::*;
//! use mxuport::{Completion, DeviceSession, Endpoints, MockTransport, Pipe, SessionConfig};
//!
//! let transport = MockTransport::new(Endpoints::default());
//! let session = DeviceSession::attach(transport, UPORT1410_PID, SessionConfig::default()).unwrap();
//! session.open(1).unwrap();
//!
//! let data = encode_frames(&[(1, b"AB".as_slice())]);
//! session.handle_completion(Completion::Read { pipe: Pipe::Data, data });
//! assert_eq!(session.rx_depth(1).unwrap(), 2);
//! ```
//!
//! ## Error Handling
//!
//! The library uses a custom [`Error`] type that covers:
//!
//! - Device access errors (not found, unsupported product, firmware
//!   config failure)
//! - Communication failures (failed control requests, malformed frames)
//! - Port errors (invalid port, port not open, unsupported interface)
//! - Resource exhaustion (queue allocation)
//! - Invalid parameters and unsupported ioctls
//!
//! [`Error::to_status`] gives the negative errno a tty layer expects.  No
//! operation is retried.
//!
//! ## Logging
//!
//! The library uses the `log` crate for diagnostic output:
//!
//! - Error: Failures which leave the device unusable
//! - Warn: Dropped data, malformed transfers and failed best effort requests
//! - Info: Attach, firmware upload, open and close
//! - Debug: Control request decisions and flow control transitions
//! - Trace: Function entry and per-frame detail
//!
//! Setting [`SessionConfig::debug`] logs frames and events at debug level.
//!
//! ## Thread Safety
//!
//! [`DeviceSession`] is `Send` and `Sync`.  Host operations may be called
//! from any thread; completions must be fed from one thread at a time.

pub mod builder;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod firmware;
pub mod profile;
pub mod queue;
pub mod session;
pub mod termios;
pub mod transport;

pub use crate::builder::{SessionBuilder, UsbSession};
pub use crate::config::SessionConfig;
pub use crate::error::{
    CommunicationError, DeviceAccessError, Error, PortError, SerializableUsbError,
};
pub use crate::firmware::{FirmwareImage, FirmwareSet};
pub use crate::profile::DeviceProfile;
pub use crate::queue::CircularQueue;
pub use crate::session::{
    DeviceSession, DrainStatus, HoldReasons, ICount, IoctlResult, PortInfo, PortListener,
};
pub use crate::termios::{
    DataBits, FlowControl, InterfaceMode, LineSettings, Parity, StopBits, Termios,
};
pub use crate::transport::{
    Completion, Endpoints, MockTransport, Pipe, Transport, UsbTransport, VendorRequests,
};
