//! Host facing port operations.  These run in a context that may block and
//! return the first failure, abandoning the rest of the operation.
use super::port::ICount;
use super::{DeviceSession, DrainStatus, PortInfo};
use crate::constants::*;
use crate::error::PortError;
use crate::termios::{FlowControl, InterfaceMode, Termios, CBAUD, CRTSCTS};
use crate::transport::{Transport, VendorRequests};
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::sync::atomic::Ordering;
use std::thread::sleep;
use std::time::{Duration, Instant};

impl<T: Transport> DeviceSession<T> {
    /// Open `port`.
    ///
    /// The first open of a port programs it on the device and re-applies
    /// its termios.  The first open on the device starts the data and event
    /// reads.
    ///
    /// # Returns
    /// * `Ok(())` - on success
    /// * `Err(Error)` - the first failure.  The port is left closed.
    pub fn open(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::open port {port}");
        self.check_attached()?;
        let state = self.port(port)?;
        let mut device = self.open_lock.lock();

        if !state.is_open() {
            let p = port as u16;
            let interface = state.status.lock().interface;
            self.transport.set_fifo_disable(p, false)?;
            self.transport.set_high_performance(p, false)?;
            self.transport.set_interface(p, interface.wire_value())?;
            self.transport.set_open(p, true)?;
            self.transport.set_rx_host_enable(p, true)?;

            state.reset_for_open();
            let termios = state.status.lock().termios;
            self.apply_termios(port, termios, true)?;
            if termios.cflag & CBAUD != 0 {
                self.transport.set_dtr(p, true)?;
                state.status.lock().mcr |= TIOCM_DTR;
            }
        }

        if device.open_count == 0 {
            self.start_reads()?;
        }
        device.open_count += 1;
        state.open_count.fetch_add(1, Ordering::AcqRel);
        info!(
            "Opened port {port}, {} open on device",
            device.open_count
        );
        Ok(())
    }

    /// Close `port`.  Teardown always completes; the first control request
    /// failure is returned.
    pub fn close(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::close port {port}");
        let state = self.port(port)?;
        let mut device = self.open_lock.lock();
        if !state.is_open() {
            return Err(PortError::NotOpen { port }.into());
        }

        let p = port as u16;
        let attached = self.is_attached();
        let mut result = Ok(());

        // Don't leave the device holding off the far end
        let prev = state
            .holds
            .clear(MX_WAIT_FOR_START_TX | MX_WAIT_FOR_XON | HOLD_RX_MASK);
        if attached && prev & HOLD_RX_MASK != 0 {
            debug!("Port {port} re-enabling receive before close");
            result = self.transport.set_rx_host_enable(p, true);
        }

        device.open_count = device.open_count.saturating_sub(1);
        let remaining = state.open_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if device.open_count == 0 {
            self.stop_reads();
        }

        if remaining == 0 {
            state.clear_queues();
            if attached {
                let closed = self.transport.set_open(p, false);
                if result.is_ok() {
                    result = closed;
                }
            }
            // Notify under the lock so a modem waiter can't miss the close
            let _status = state.status.lock();
            state.status_changed.notify_all();
        }
        info!("Closed port {port}, {} open on device", device.open_count);
        result
    }

    /// Apply a new termios.  Nothing is sent if cflag and iflag match what
    /// was last applied.
    pub fn set_termios(&self, port: usize, termios: Termios) -> Result<(), Error> {
        trace!(
            "DeviceSession::set_termios port {port} cflag 0o{:o} iflag 0o{:o}",
            termios.cflag,
            termios.iflag
        );
        self.open_port(port)?;
        self.apply_termios(port, termios, false).map(|_| ())
    }

    /// The termios last set on `port`
    pub fn termios(&self, port: usize) -> Result<Termios, Error> {
        Ok(self.port(port)?.status.lock().termios)
    }

    /// # Returns
    /// * `Ok(true)` - the device was programmed
    /// * `Ok(false)` - nothing changed
    pub(crate) fn apply_termios(&self, port: usize, termios: Termios, force: bool) -> Result<bool, Error> {
        let state = &self.ports[port];
        let applied = state.status.lock().applied;
        if !force && applied == Some((termios.cflag, termios.iflag)) {
            trace!("Port {port} termios unchanged");
            return Ok(false);
        }

        let settings = termios.settings()?;
        debug!("Port {port} line {settings}");
        let p = port as u16;

        self.transport.set_line(p, settings.line_payload())?;

        if settings.flow.is_software() {
            self.transport.set_chars(p, settings.xon, settings.xoff)?;
            self.transport.set_xonxoff(p, true)?;
        } else {
            self.transport.set_xonxoff(p, false)?;
        }

        let mut mcr = state.status.lock().mcr;
        if settings.baud == 0 {
            self.transport.set_rts(p, MX_RTS_DISABLE)?;
            self.transport.set_dtr(p, false)?;
            mcr &= !(TIOCM_DTR | TIOCM_RTS);
        } else {
            let rts = if termios.cflag & CRTSCTS != 0 {
                MX_RTS_HW
            } else {
                MX_RTS_ENABLE
            };
            self.transport.set_rts(p, rts)?;
            mcr |= TIOCM_RTS;

            // Leaving B0 raises DTR again
            if applied.is_some_and(|(cflag, _)| cflag & CBAUD == 0) {
                self.transport.set_dtr(p, true)?;
                mcr |= TIOCM_DTR;
            }
            self.transport.set_baud(p, settings.baud)?;
        }

        {
            let mut status = state.status.lock();
            status.termios = termios;
            status.applied = Some((termios.cflag, termios.iflag));
            status.settings = settings;
            status.special_baud = None;
            status.mcr = mcr;
        }
        if !settings.flow.contains(FlowControl::XON_XOFF_OUT) {
            state.holds.clear(MX_WAIT_FOR_XON);
        }
        self.apply_line_holds(port);
        self.drive_transmit(port);
        Ok(true)
    }

    /// Queue bytes for transmission.
    ///
    /// # Returns
    /// The number of bytes accepted, which is less than `data.len()` when
    /// the transmit queue fills
    pub fn write(&self, port: usize, data: &[u8]) -> Result<usize, Error> {
        trace!("DeviceSession::write port {port} data.len() {}", data.len());
        let state = self.open_port(port)?;
        let written = state.tx.lock().queue.insert(data);
        self.drive_transmit(port);
        Ok(written)
    }

    /// Free space in the transmit queue
    pub fn write_room(&self, port: usize) -> Result<usize, Error> {
        Ok(self.port(port)?.tx.lock().queue.space())
    }

    /// Bytes waiting in the transmit queue
    pub fn chars_in_buffer(&self, port: usize) -> Result<usize, Error> {
        Ok(self.port(port)?.tx.lock().queue.depth())
    }

    /// Take received bytes from the receive queue.  Re-enables receive on
    /// the device once the queue drains to the low water mark.
    pub fn read(&self, port: usize, buf: &mut [u8]) -> Result<usize, Error> {
        trace!("DeviceSession::read port {port} buf.len() {}", buf.len());
        let state = self.open_port(port)?;
        let len = state.rx.lock().queue.remove_for_rx(buf, buf.len());
        self.check_low_water(port);
        Ok(len)
    }

    /// Bytes waiting in the receive queue
    pub fn rx_depth(&self, port: usize) -> Result<usize, Error> {
        Ok(self.port(port)?.rx.lock().queue.depth())
    }

    /// Stop pushing received data and ask the device to stop sending
    pub fn throttle(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::throttle port {port}");
        self.open_port(port)?;
        self.hold_rx(port, MX_WAIT_FOR_UNTHROTTLE);
        Ok(())
    }

    /// Resume pushing received data, including past the low water hold,
    /// and let the device send again
    pub fn unthrottle(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::unthrottle port {port}");
        let state = self.open_port(port)?;
        let prev = state.holds.clear(MX_WAIT_FOR_UNTHROTTLE);
        let enabled = self.push_rx(port, true);
        if !enabled
            && prev & MX_WAIT_FOR_UNTHROTTLE != 0
            && !state.holds.intersects(MX_WAIT_FOR_LOW_WATER)
        {
            debug!("Port {port} enabling receive");
            self.transport.set_rx_host_enable_async(port as u16, true);
        }
        Ok(())
    }

    /// Hold transmission, as for TCOOFF
    pub fn stop_tx(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::stop_tx port {port}");
        self.open_port(port)?.holds.set(MX_WAIT_FOR_START_TX);
        Ok(())
    }

    /// Release a [`DeviceSession::stop_tx`]
    pub fn start_tx(&self, port: usize) -> Result<(), Error> {
        trace!("DeviceSession::start_tx port {port}");
        self.open_port(port)?.holds.clear(MX_WAIT_FOR_START_TX);
        self.drive_transmit(port);
        Ok(())
    }

    /// Modem lines as TIOCM_* bits
    pub fn tiocmget(&self, port: usize) -> Result<u32, Error> {
        trace!("DeviceSession::tiocmget port {port}");
        Ok(self.open_port(port)?.status.lock().modem_bits())
    }

    /// Raise `set` and drop `clear`, for TIOCM_DTR and TIOCM_RTS
    pub fn tiocmset(&self, port: usize, set: u32, clear: u32) -> Result<(), Error> {
        trace!("DeviceSession::tiocmset port {port} set 0x{set:x} clear 0x{clear:x}");
        let state = self.open_port(port)?;
        let p = port as u16;
        let (old, flow) = {
            let status = state.status.lock();
            (status.mcr, status.flow())
        };
        let new = (old | (set & (TIOCM_DTR | TIOCM_RTS))) & !(clear & (TIOCM_DTR | TIOCM_RTS));

        if (old ^ new) & TIOCM_RTS != 0 {
            let value = if new & TIOCM_RTS == 0 {
                MX_RTS_DISABLE
            } else if flow.contains(FlowControl::RTS_CTS) {
                MX_RTS_HW
            } else {
                MX_RTS_ENABLE
            };
            self.transport.set_rts(p, value)?;
            state.status.lock().mcr ^= TIOCM_RTS;
        }
        if (old ^ new) & TIOCM_DTR != 0 {
            self.transport.set_dtr(p, new & TIOCM_DTR != 0)?;
            state.status.lock().mcr ^= TIOCM_DTR;
        }
        Ok(())
    }

    pub fn break_ctl(&self, port: usize, on: bool) -> Result<(), Error> {
        trace!("DeviceSession::break_ctl port {port} on {on}");
        let state = self.open_port(port)?;
        self.transport.set_break(port as u16, on)?;
        state.status.lock().break_on = on;
        Ok(())
    }

    /// Discard queued data on the device and locally.
    ///
    /// # Arguments
    /// * `queue` - TCIFLUSH, TCOFLUSH or TCIOFLUSH
    pub fn flush(&self, port: usize, queue: u32) -> Result<(), Error> {
        trace!("DeviceSession::flush port {port} queue {queue}");
        let state = self.open_port(port)?;
        let (mask, rx, tx) = match queue {
            TCIFLUSH => (PURGE_IN, true, false),
            TCOFLUSH => (PURGE_OUT, false, true),
            TCIOFLUSH => (PURGE_BOTH, true, true),
            _ => {
                let message = format!("Invalid flush queue {queue}");
                warn!("{message}");
                return Err(Error::Args { message });
            }
        };
        self.transport.purge(port as u16, mask)?;
        if rx {
            state.rx.lock().queue.clear();
            self.check_low_water(port);
        }
        if tx {
            let mut tx = state.tx.lock();
            tx.queue.clear();
            tx.queue.clear_sequence_marker();
        }
        Ok(())
    }

    pub fn icount(&self, port: usize) -> Result<ICount, Error> {
        Ok(self.port(port)?.status.lock().icount)
    }

    /// Take the accumulated UART_LSR_* error bits, clearing them
    pub fn take_line_errors(&self, port: usize) -> Result<u8, Error> {
        let mut status = self.port(port)?.status.lock();
        Ok(std::mem::take(&mut status.lsr))
    }

    /// Block until one of the lines in `mask` (TIOCM_RNG, TIOCM_DSR,
    /// TIOCM_CAR, TIOCM_CTS) changes.
    ///
    /// # Returns
    /// * `Ok(u32)` - the lines from `mask` that changed
    /// * `Err(Error::Timeout)` - if `timeout` passed first
    /// * `Err(Error)` - if the port closed or the device went away
    pub fn wait_modem_change(
        &self,
        port: usize,
        mask: u32,
        timeout: Option<Duration>,
    ) -> Result<u32, Error> {
        trace!("DeviceSession::wait_modem_change port {port} mask 0x{mask:x} timeout {timeout:?}");
        let state = self.open_port(port)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status = state.status.lock();
        let start = status.icount;

        loop {
            self.check_attached()?;
            if !state.is_open() {
                return Err(PortError::NotOpen { port }.into());
            }
            let now = status.icount;
            let mut changed = 0;
            for (bit, before, after) in [
                (TIOCM_RNG, start.rng, now.rng),
                (TIOCM_DSR, start.dsr, now.dsr),
                (TIOCM_CAR, start.dcd, now.dcd),
                (TIOCM_CTS, start.cts, now.cts),
            ] {
                if mask & bit != 0 && before != after {
                    changed |= bit;
                }
            }
            if changed != 0 {
                return Ok(changed);
            }

            match (deadline, timeout) {
                (Some(deadline), Some(dur)) => {
                    if state
                        .status_changed
                        .wait_until(&mut status, deadline)
                        .timed_out()
                    {
                        return Err(Error::Timeout { dur });
                    }
                }
                _ => state.status_changed.wait(&mut status),
            }
        }
    }

    /// Whether everything written has left the device
    pub fn tx_empty(&self, port: usize) -> Result<bool, Error> {
        trace!("DeviceSession::tx_empty port {port}");
        let state = self.open_port(port)?;
        {
            let tx = state.tx.lock();
            if !tx.queue.is_empty() || tx.write_in_progress {
                return Ok(false);
            }
        }
        Ok(self.transport.get_outqueue(port as u16)? == 0)
    }

    /// Wait for the transmit path to drain, polling the device at
    /// `drain_poll_interval` at most `drain_max_polls` times
    pub fn wait_until_sent(&self, port: usize) -> Result<DrainStatus, Error> {
        trace!("DeviceSession::wait_until_sent port {port}");
        for poll in 0..self.config.drain_max_polls {
            if self.tx_empty(port)? {
                debug!("Port {port} drained after {poll} polls");
                return Ok(DrainStatus::Drained);
            }
            sleep(self.config.drain_poll_interval);
        }
        if self.tx_empty(port)? {
            return Ok(DrainStatus::Drained);
        }
        info!(
            "Port {port} still sending after {} polls",
            self.config.drain_max_polls
        );
        Ok(DrainStatus::TimedOut)
    }

    /// Select the port's electrical interface.  Takes effect immediately
    /// on an open port, otherwise at the next open.
    pub fn set_interface(&self, port: usize, mode: InterfaceMode) -> Result<(), Error> {
        trace!("DeviceSession::set_interface port {port} mode {mode}");
        self.check_attached()?;
        let state = self.port(port)?;
        if mode != InterfaceMode::Rs232 && !self.profile.multi_interface {
            warn!("{} port {port} does not support {mode}", self.profile.name);
            return Err(PortError::InterfaceUnsupported {
                port,
                mode: mode.to_string(),
            }
            .into());
        }
        if state.is_open() {
            self.transport.set_interface(port as u16, mode.wire_value())?;
        }
        state.status.lock().interface = mode;
        Ok(())
    }

    pub fn interface(&self, port: usize) -> Result<InterfaceMode, Error> {
        Ok(self.port(port)?.status.lock().interface)
    }

    /// Program a baud rate termios can't express.  Replaced by the next
    /// termios change.
    pub fn set_special_baud(&self, port: usize, baud: u32) -> Result<(), Error> {
        trace!("DeviceSession::set_special_baud port {port} baud {baud}");
        let state = self.open_port(port)?;
        if baud == 0 {
            let message = "Special baud rate must be non-zero".to_string();
            warn!("{message}");
            return Err(Error::Args { message });
        }
        self.transport.set_baud(port as u16, baud)?;
        state.status.lock().special_baud = Some(baud);
        Ok(())
    }

    /// The baud rate in effect, special or from termios
    pub fn baud(&self, port: usize) -> Result<u32, Error> {
        let status = self.port(port)?.status.lock();
        Ok(status.special_baud.unwrap_or(status.settings.baud))
    }

    /// Gate transmission on DSR and/or DCD as well as any termios flow
    /// control.  Only [`FlowControl::DSR`] and [`FlowControl::DCD`] are
    /// accepted.
    pub fn set_flow_extras(&self, port: usize, extras: FlowControl) -> Result<(), Error> {
        trace!("DeviceSession::set_flow_extras port {port} extras 0x{:02x}", extras.bits());
        let state = self.port(port)?;
        let allowed = FlowControl::DSR | FlowControl::DCD;
        if !allowed.contains(extras) {
            let message = format!("Flow control 0x{:02x} can't be set as an extra", extras.bits());
            warn!("{message}");
            return Err(Error::Args { message });
        }
        state.status.lock().flow_extras = extras;
        if state.is_open() {
            self.apply_line_holds(port);
            self.drive_transmit(port);
        }
        Ok(())
    }

    pub fn port_info(&self, port: usize) -> Result<PortInfo, Error> {
        let state = self.port(port)?;
        let (settings, special_baud, interface, modem, line_errors, icount) = {
            let status = state.status.lock();
            (
                status.settings,
                status.special_baud,
                status.interface,
                status.modem_bits(),
                status.lsr,
                status.icount,
            )
        };
        Ok(PortInfo {
            port,
            open: state.is_open(),
            settings,
            special_baud,
            interface,
            holds: state.holds.get(),
            modem,
            line_errors,
            icount,
            rx_depth: state.rx.lock().queue.depth(),
            tx_depth: state.tx.lock().queue.depth(),
        })
    }
}
