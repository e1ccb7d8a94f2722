//! Completion handling and the transmit/receive state transitions it
//! drives.  Nothing here blocks: control requests are only ever queued
//! with [`VendorRequests::set_rx_host_enable_async`].
use super::DeviceSession;
use crate::codec::{event_records, Event, FrameIter};
use crate::constants::*;
use crate::error::DeviceAccessError;
use crate::termios::FlowControl;
use crate::transport::{Pipe, Transport, VendorRequests};
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use std::sync::atomic::Ordering;

/// Bytes handed to the listener per call
const PUSH_CHUNK_SIZE: usize = 4096;

impl<T: Transport> DeviceSession<T> {
    /// A transfer arrived on the data pipe.  Frames are demultiplexed in
    /// arrival order; a bad header abandons the rest of the transfer.
    pub(crate) fn data_complete(&self, data: &[u8]) {
        log!(
            self.frame_level(),
            "DeviceSession::data_complete data.len() {}",
            data.len()
        );
        let frames = FrameIter::new(data, self.ports.len(), self.endpoints.bulkout_size);
        for frame in frames {
            match frame {
                Ok(frame) => self.receive_frame(frame.port, frame.payload),
                Err(e) => {
                    warn!("Discarding rest of data transfer: {e}");
                    break;
                }
            }
        }
        self.resubmit(Pipe::Data);
    }

    fn receive_frame(&self, port: usize, payload: &[u8]) {
        log!(
            self.frame_level(),
            "Frame for port {port} payload.len() {}",
            payload.len()
        );
        let state = &self.ports[port];
        if !state.is_open() {
            trace!("Dropping {} bytes for closed port {port}", payload.len());
            return;
        }

        let (written, depth) = {
            let mut rx = state.rx.lock();
            let written = rx.queue.insert(payload);
            (written, rx.queue.depth())
        };
        {
            let mut status = state.status.lock();
            status.icount.rx += written as u64;
            status.icount.buf_overrun += (payload.len() - written) as u64;
        }
        if written < payload.len() {
            warn!(
                "Port {port} receive queue full, dropped {} bytes",
                payload.len() - written
            );
        }

        if depth >= self.config.high_water {
            self.hold_rx(port, MX_WAIT_FOR_LOW_WATER);
        }
        self.push_rx(port, false);
    }

    /// A transfer arrived on the event pipe
    pub(crate) fn event_complete(&self, data: &[u8]) {
        log!(
            self.frame_level(),
            "DeviceSession::event_complete data.len() {}",
            data.len()
        );
        for record in event_records(data) {
            let port = record.port;
            if port >= self.ports.len() {
                warn!("Event {} for invalid port {port}", record.event);
                continue;
            }
            if !self.ports[port].is_open() {
                trace!("Ignoring event {} for closed port {port}", record.event);
                continue;
            }
            log!(self.frame_level(), "Port {port} event {}", record.event);
            self.handle_event(port, record.event);
        }
        self.resubmit(Pipe::Event);
    }

    fn handle_event(&self, port: usize, event: Event) {
        let state = &self.ports[port];
        match event {
            Event::None | Event::TxBufThreshold => (),
            Event::SendNext => {
                state.holds.clear(MX_WAIT_FOR_SEND_NEXT);
                self.drive_transmit(port);
            }
            Event::Msr { levels, changed } => self.msr_event(port, levels, changed),
            Event::Lsr { lsr } => {
                let mut status = state.status.lock();
                status.lsr |= lsr & (UART_LSR_OE | UART_LSR_PE | UART_LSR_FE | UART_LSR_BI);
                if lsr & UART_LSR_BI != 0 {
                    status.icount.brk += 1;
                }
                if lsr & UART_LSR_FE != 0 {
                    status.icount.frame += 1;
                }
                if lsr & UART_LSR_PE != 0 {
                    status.icount.parity += 1;
                }
                if lsr & UART_LSR_OE != 0 {
                    status.icount.overrun += 1;
                }
            }
            Event::Mcr { xoff_hold: true } => {
                state.holds.set(MX_WAIT_FOR_XON);
            }
            Event::Mcr { xoff_hold: false } => {
                state.holds.clear(MX_WAIT_FOR_XON);
                self.drive_transmit(port);
            }
            Event::Unknown(code) => warn!("Port {port} unknown event code {code}"),
        }
    }

    fn msr_event(&self, port: usize, levels: u8, changed: u16) {
        let state = &self.ports[port];
        {
            let mut status = state.status.lock();
            if changed & SERIAL_EV_CTS != 0 {
                status.icount.cts += 1;
            }
            if changed & SERIAL_EV_DSR != 0 {
                status.icount.dsr += 1;
            }
            if changed & SERIAL_EV_RLSD != 0 {
                status.icount.dcd += 1;
            }
            if (status.msr ^ levels) & UART_MSR_RI != 0 {
                status.icount.rng += 1;
            }
            status.msr = levels;
            status.msr_reported = true;
        }
        state.status_changed.notify_all();

        self.apply_line_holds(port);
        if let Some(listener) = self.listener() {
            listener.modem_change(port, levels);
        }
        self.drive_transmit(port);
    }

    /// Set or clear the CTS/DSR/DCD holds from the MSR shadow, for the
    /// lines used for handshaking.  Until the device reports an MSR event
    /// the line levels are unknown and nothing is held.
    pub(crate) fn apply_line_holds(&self, port: usize) {
        let state = &self.ports[port];
        let (flow, msr, reported) = {
            let status = state.status.lock();
            (status.flow(), status.msr, status.msr_reported)
        };
        for (flag, line, hold) in [
            (FlowControl::RTS_CTS, UART_MSR_CTS, MX_WAIT_FOR_CTS),
            (FlowControl::DSR, UART_MSR_DSR, MX_WAIT_FOR_DSR),
            (FlowControl::DCD, UART_MSR_DCD, MX_WAIT_FOR_DCD),
        ] {
            if reported && flow.contains(flag) && msr & line == 0 {
                state.holds.set(hold);
            } else {
                state.holds.clear(hold);
            }
        }
    }

    /// A bulk out transfer for `port` finished
    pub(crate) fn write_complete(&self, port: usize, result: Result<usize, Error>) {
        log!(
            self.frame_level(),
            "DeviceSession::write_complete port {port} result {result:?}"
        );
        let Some(state) = self.ports.get(port) else {
            warn!("Write completion for invalid port {port}");
            return;
        };
        state.tx.lock().write_in_progress = false;
        if let Err(e) = result {
            warn!("Port {port} write failed: {e}");
        }
        if !state.holds.intersects(MX_WAIT_FOR_SEND_NEXT) {
            self.drive_transmit(port);
        }
    }

    /// Send the next chunk of `port`'s transmit queue, unless transmission
    /// is held or a write is already in flight.  With nothing queued the
    /// listener is told the port can take more data.
    pub(crate) fn drive_transmit(&self, port: usize) {
        let state = &self.ports[port];
        if !state.is_open() || !self.is_attached() {
            return;
        }
        let holds = state.holds.get();
        if !holds.is_empty() {
            log!(self.frame_level(), "Port {port} transmit held: {holds}");
            return;
        }

        let bulkout_size = self.endpoints.bulkout_size;
        let mut send_next = false;
        let frame = {
            let mut tx = state.tx.lock();
            if tx.write_in_progress {
                return;
            }
            if tx.queue.is_empty() {
                None
            } else {
                tx.write_in_progress = true;
                if tx.sent_since_seq >= self.config.trigger_send_next {
                    debug!("Port {port} requesting SEND_NEXT after {} bytes", tx.sent_since_seq);
                    tx.queue.set_sequence_marker();
                    state.holds.set(MX_WAIT_FOR_SEND_NEXT);
                    tx.sent_since_seq = 0;
                    send_next = true;
                }
                let mut frame = vec![0u8; bulkout_size];
                let len = tx.queue.remove_for_tx(&mut frame, bulkout_size);
                if len == 0 {
                    warn!("Bulk out size {bulkout_size} leaves no room for data");
                    tx.write_in_progress = false;
                    if send_next {
                        tx.queue.clear_sequence_marker();
                        state.holds.clear(MX_WAIT_FOR_SEND_NEXT);
                    }
                    return;
                }
                frame.truncate(len);
                tx.sent_since_seq += len - HEADER_SIZE;
                Some(frame)
            }
        };

        let Some(frame) = frame else {
            if let Some(listener) = self.listener() {
                listener.write_wakeup(port);
            }
            return;
        };

        let payload = frame.len() - HEADER_SIZE;
        log!(self.frame_level(), "Port {port} sending {payload} bytes");
        match self.transport.submit_bulk_out(port, frame) {
            Ok(()) => state.status.lock().icount.tx += payload as u64,
            Err(e) => {
                warn!("Port {port} failed to submit write, dropped {payload} bytes: {e}");
                state.tx.lock().write_in_progress = false;
                // The device will never acknowledge a chunk it didn't get
                if send_next {
                    state.holds.clear(MX_WAIT_FOR_SEND_NEXT);
                }
            }
        }
    }

    /// Hand queued received bytes to the listener.  Stops as soon as a
    /// receive hold is set; `force` ignores the low water hold.
    ///
    /// # Returns
    /// `true` if the drain re-enabled receive on the device
    pub(crate) fn push_rx(&self, port: usize, force: bool) -> bool {
        let Some(listener) = self.listener() else {
            return false;
        };
        let state = &self.ports[port];
        let mask = if force {
            MX_WAIT_FOR_UNTHROTTLE
        } else {
            HOLD_RX_MASK
        };

        {
            let mut rx = state.rx.lock();
            if rx.push_in_flight {
                return false;
            }
            rx.push_in_flight = true;
        }

        let mut buf = vec![0u8; PUSH_CHUNK_SIZE];
        loop {
            if state.holds.intersects(mask) {
                break;
            }
            let len = state.rx.lock().queue.remove_for_rx(&mut buf, PUSH_CHUNK_SIZE);
            if len == 0 {
                break;
            }
            listener.receive(port, &buf[..len]);
        }

        state.rx.lock().push_in_flight = false;
        self.check_low_water(port)
    }

    /// Release the low water hold once the receive queue has drained far
    /// enough
    pub(crate) fn check_low_water(&self, port: usize) -> bool {
        let depth = self.ports[port].rx.lock().queue.depth();
        depth <= self.config.low_water && self.release_rx(port, MX_WAIT_FOR_LOW_WATER)
    }

    /// Set a receive hold, disabling receive on the device if this is the
    /// first one
    pub(crate) fn hold_rx(&self, port: usize, reason: u16) {
        let prev = self.ports[port].holds.set(reason);
        if prev & HOLD_RX_MASK == 0 {
            debug!("Port {port} disabling receive");
            self.transport.set_rx_host_enable_async(port as u16, false);
        }
    }

    /// Clear a receive hold, enabling receive on the device if it was the
    /// last one
    ///
    /// # Returns
    /// `true` if receive was re-enabled
    pub(crate) fn release_rx(&self, port: usize, reason: u16) -> bool {
        let prev = self.ports[port].holds.clear(reason);
        if prev & reason != 0 && prev & HOLD_RX_MASK & !reason == 0 {
            debug!("Port {port} enabling receive");
            self.transport.set_rx_host_enable_async(port as u16, true);
            true
        } else {
            false
        }
    }

    pub(crate) fn read_failed(&self, pipe: Pipe, error: Error) {
        if matches!(
            error,
            Error::DeviceAccess {
                kind: DeviceAccessError::NoDevice
            }
        ) || error.to_errno() == libc::ENODEV
        {
            warn!("{pipe} pipe reports device gone: {error}");
            self.disconnect();
            return;
        }
        warn!("{pipe} pipe read failed: {error}");
        self.resubmit(pipe);
    }

    /// Put the pipe's read back in flight while any port is open
    fn resubmit(&self, pipe: Pipe) {
        if !self.reads_active.load(Ordering::Acquire) || !self.is_attached() {
            trace!("Not resubmitting {pipe} read");
            return;
        }
        if let Err(e) = self.transport.submit_read(pipe) {
            error!("Failed to resubmit {pipe} read: {e}");
        }
    }
}
