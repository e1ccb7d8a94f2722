//! Error objects for the mxuport crate
use crate::constants::ENOIOCTLCMD;
use libc::{EACCES, EBUSY, EINVAL, EIO, ENODEV, ENOENT, ENOMEM, ENXIO, ETIMEDOUT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the mxuport crate
#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum Error {
    /// Errors accessing the USB device
    #[error("USB error while attempting to communicate with the UPort: {0}")]
    Usb(SerializableUsbError),

    /// Failure attaching to the UPort device
    #[error("UPort device attach failed: {message}")]
    Init { message: String },

    /// Failure in communicating with the UPort device
    #[error("UPort device communication error: {kind}")]
    Communication { kind: CommunicationError },

    /// An operation timed out
    #[error("UPort operation timed out after {dur:?}")]
    Timeout { dur: std::time::Duration },

    /// Errors finding or identifying the UPort
    #[error("{kind}")]
    DeviceAccess { kind: DeviceAccessError },

    /// Errors relating to the state of a single serial port
    #[error("{kind}")]
    Port { kind: PortError },

    /// A per-port or per-device allocation failed
    #[error("Failed to allocate {size} bytes")]
    OutOfMemory { size: usize },

    /// An ioctl code this driver does not handle
    #[error("Unsupported ioctl 0x{cmd:04x}")]
    UnsupportedIoctl { cmd: u32 },

    /// Invalid arguments passed to the mxuport library
    #[error("mxuport library called with invalid arguments: {message}")]
    Args { message: String },
}

/// Used to differentiate between different types of problems accessing the
/// UPort device
#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum DeviceAccessError {
    #[error("The session is not attached to a UPort")]
    NoDevice,

    #[error("No UPort device with vendor id {vid:04x} found - is it connected and do you have permissions to access it?")]
    NotFound { vid: u16 },

    #[error("USB device {vid:04x}/{pid:04x} is not a supported UPort product")]
    UnsupportedProduct { vid: u16, pid: u16 },

    #[error("UPort device is missing its {endpoint} bulk endpoint")]
    MissingEndpoint { endpoint: String },

    #[error("UPort device failed the firmware configuration query and was reset")]
    FirmwareConfig,

    #[error("Hit USB permissions error while attempting to access UPort device.  You may need to reconfigure udev rules in /etc/udev/rules.d/.")]
    Permission,
}

#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum CommunicationError {
    /// A vendor control request failed.  `errno` is the USB status.
    #[error("Control request {name} (0x{request:02x}) failed: {message}")]
    ControlFailed {
        request: u8,
        name: String,
        message: String,
        errno: i32,
    },

    /// A control request returned fewer bytes than required
    #[error("Control request 0x{request:02x} returned {actual} bytes, expected {expected}")]
    ShortControlRead {
        request: u8,
        actual: usize,
        expected: usize,
    },

    /// A frame on the data pipe named a port outside the device's range
    #[error("Frame for port {port} but device has {num_ports} ports")]
    FramePort { port: usize, num_ports: usize },

    /// A frame on the data pipe declared a length larger than the bulk packet
    #[error("Frame length {len} exceeds bulk packet size {max}")]
    FrameLength { len: usize, max: usize },

    /// The transport's pipes have shut down
    #[error("Transport closed: {message}")]
    TransportClosed { message: String },
}

#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum PortError {
    #[error("Port {port} does not exist, device has {num_ports} ports")]
    Invalid { port: usize, num_ports: usize },

    #[error("Port {port} is not open")]
    NotOpen { port: usize },

    #[error("Port {port} does not support interface mode {mode}")]
    InterfaceUnsupported { port: usize, mode: String },
}

#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum SerializableUsbError {
    #[error("{message}")]
    UsbError { message: String, errno: i32 },
}

impl Error {
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Usb(SerializableUsbError::UsbError { errno, .. }) => *errno,
            Error::Init { .. } => EIO,
            Error::Communication { kind } => match kind {
                CommunicationError::ControlFailed { errno, .. } => *errno,
                CommunicationError::TransportClosed { .. } => ENODEV,
                _ => EIO,
            },
            Error::Timeout { .. } => ETIMEDOUT,
            Error::DeviceAccess { kind } => match kind {
                DeviceAccessError::NoDevice => ENODEV,
                DeviceAccessError::NotFound { .. } => ENOENT,
                DeviceAccessError::UnsupportedProduct { .. } => ENODEV,
                DeviceAccessError::MissingEndpoint { .. } => ENODEV,
                DeviceAccessError::FirmwareConfig => EIO,
                DeviceAccessError::Permission => EACCES,
            },
            Error::Port { kind } => match kind {
                PortError::Invalid { .. } => ENXIO,
                PortError::NotOpen { .. } => ENODEV,
                PortError::InterfaceUnsupported { .. } => EINVAL,
            },
            Error::OutOfMemory { .. } => ENOMEM,
            Error::UnsupportedIoctl { .. } => ENOIOCTLCMD,
            Error::Args { .. } => EINVAL,
        }
    }

    /// The negative status code reported to a tty style caller
    pub fn to_status(&self) -> i32 {
        -self.to_errno()
    }
}

fn usb_errno(err: &rusb::Error) -> i32 {
    match err {
        rusb::Error::Io => EIO,
        rusb::Error::InvalidParam => EINVAL,
        rusb::Error::Access => EACCES,
        rusb::Error::NoDevice => ENODEV,
        rusb::Error::NotFound => ENOENT,
        rusb::Error::Busy => EBUSY,
        rusb::Error::Timeout => ETIMEDOUT,
        rusb::Error::NoMem => ENOMEM,
        _ => EIO,
    }
}

// Map rusb::Error to Error
impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Access => Self::DeviceAccess {
                kind: DeviceAccessError::Permission,
            },
            err => Self::Usb(SerializableUsbError::UsbError {
                message: err.to_string(),
                errno: usb_errno(&err),
            }),
        }
    }
}

// Map CommunicationError to Error
impl From<CommunicationError> for Error {
    fn from(kind: CommunicationError) -> Self {
        Self::Communication { kind }
    }
}

// Map PortError to Error
impl From<PortError> for Error {
    fn from(kind: PortError) -> Self {
        Self::Port { kind }
    }
}

// Map DeviceAccessError to Error
impl From<DeviceAccessError> for Error {
    fn from(kind: DeviceAccessError) -> Self {
        Self::DeviceAccess { kind }
    }
}
