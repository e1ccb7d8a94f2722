//! Numeric ioctl dispatch, for callers that speak tty ioctls
use super::port::ICount;
use super::DeviceSession;
use crate::constants::*;
use crate::termios::InterfaceMode;
use crate::transport::Transport;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;

/// Result of [`DeviceSession::ioctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IoctlResult {
    /// The command completed with nothing to return
    Done,
    /// The command returned a value
    Value(u32),
    /// TIOCGICOUNT
    Counters(ICount),
}

impl<T: Transport> DeviceSession<T> {
    /// Perform a tty ioctl on `port`.
    ///
    /// # Arguments
    /// * `cmd` - The ioctl code, e.g. [`TIOCMGET`] or [`MOXA_SET_OP_MODE`]
    /// * `arg` - The ioctl argument, where it is a value
    ///
    /// # Returns
    /// * `Ok(IoctlResult)` - on success
    /// * `Err(Error::UnsupportedIoctl)` - if `cmd` isn't handled here.  Its
    ///   errno is ENOIOCTLCMD so the caller can fall back to generic
    ///   handling.
    /// * `Err(Error)` - if the command failed
    pub fn ioctl(&self, port: usize, cmd: u32, arg: u32) -> Result<IoctlResult, Error> {
        trace!("DeviceSession::ioctl port {port} cmd 0x{cmd:04x} arg 0x{arg:x}");
        let result = match cmd {
            TIOCMGET => IoctlResult::Value(self.tiocmget(port)?),
            TIOCMBIS => {
                self.tiocmset(port, arg, 0)?;
                IoctlResult::Done
            }
            TIOCMBIC => {
                self.tiocmset(port, 0, arg)?;
                IoctlResult::Done
            }
            TIOCMSET => {
                self.tiocmset(port, arg, !arg)?;
                IoctlResult::Done
            }
            TIOCSERGETLSR => IoctlResult::Value(if self.tx_empty(port)? {
                TIOCSER_TEMT
            } else {
                0
            }),
            TIOCMIWAIT => IoctlResult::Value(self.wait_modem_change(port, arg, None)?),
            TIOCGICOUNT => IoctlResult::Counters(self.icount(port)?),
            TCXONC => {
                match arg {
                    TCOOFF => self.stop_tx(port)?,
                    TCOON => self.start_tx(port)?,
                    TCIOFF => self.throttle(port)?,
                    TCION => self.unthrottle(port)?,
                    _ => {
                        let message = format!("Invalid TCXONC argument {arg}");
                        warn!("{message}");
                        return Err(Error::Args { message });
                    }
                }
                IoctlResult::Done
            }
            TCFLSH => {
                self.flush(port, arg)?;
                IoctlResult::Done
            }
            MOXA_SET_OP_MODE => {
                let mode = u16::try_from(arg)
                    .ok()
                    .and_then(InterfaceMode::from_wire)
                    .ok_or_else(|| Error::Args {
                        message: format!("Invalid interface mode {arg}"),
                    })?;
                self.set_interface(port, mode)?;
                IoctlResult::Done
            }
            MOXA_GET_OP_MODE => IoctlResult::Value(u32::from(self.interface(port)?.wire_value())),
            MOXA_SET_SPECIAL_BAUD_RATE => {
                self.set_special_baud(port, arg)?;
                IoctlResult::Done
            }
            MOXA_GET_SPECIAL_BAUD_RATE => IoctlResult::Value(self.baud(port)?),
            _ => {
                debug!("Port {port} ioctl 0x{cmd:04x} not supported");
                return Err(Error::UnsupportedIoctl { cmd });
            }
        };
        Ok(result)
    }
}
