//! [`UsbTransport`] drives a real UPort with rusb.
//!
//! rusb's bulk transfers are synchronous, so each asynchronous primitive of
//! [`Transport`] is backed by a worker thread:
//! - one read pump per bulk in pipe, which blocks on the pipe while a read
//!   is submitted and reports each transfer as a [`Completion`]
//! - one writer, which performs queued bulk out transfers in order
//! - one control worker, which performs best effort control requests queued
//!   from completion handlers
//!
//! Completions are delivered on the channel returned by
//! [`UsbTransport::open`].
use super::{Completion, Endpoints, Pipe, Transport};
use crate::constants::*;
use crate::error::DeviceAccessError;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use rusb::{constants, Context, DeviceHandle, Direction, TransferType};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Vendor request, device as recipient, host to device
const REQUEST_TYPE_OUT: u8 = constants::LIBUSB_REQUEST_TYPE_VENDOR
    | constants::LIBUSB_RECIPIENT_DEVICE
    | constants::LIBUSB_ENDPOINT_OUT;

/// Vendor request, device as recipient, device to host
const REQUEST_TYPE_IN: u8 = constants::LIBUSB_REQUEST_TYPE_VENDOR
    | constants::LIBUSB_RECIPIENT_DEVICE
    | constants::LIBUSB_ENDPOINT_IN;


#[derive(Debug, Default)]
struct PipeState {
    submitted: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct PipeGate {
    state: Mutex<PipeState>,
    cond: Condvar,
}

#[derive(Debug)]
struct UsbShared {
    handle: DeviceHandle<Context>,
    endpoints: Endpoints,
    control_timeout: Duration,
    /// Max packet size of each bulk in pipe
    read_sizes: [usize; 2],
    pipes: [PipeGate; 2],
}

#[derive(Debug)]
struct WriteJob {
    port: usize,
    frame: Vec<u8>,
}

#[derive(Debug)]
struct ControlJob {
    request: u8,
    value: u16,
    index: u16,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct UsbTransport {
    shared: Arc<UsbShared>,
    writer: Mutex<Option<Sender<WriteJob>>>,
    control: Mutex<Option<Sender<ControlJob>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl UsbTransport {
    /// Claim the UPort's interface, discover its endpoints and start the
    /// worker threads.
    ///
    /// # Arguments
    /// * `handle` - An open handle to the UPort
    /// * `control_timeout` - Timeout applied to every control request
    ///
    /// # Returns
    /// * `Ok((UsbTransport, Receiver<Completion>))` - the transport and the
    ///   channel its completions arrive on
    /// * `Err(Error)` - if the interface can't be claimed or an endpoint is
    ///   missing
    pub fn open(
        mut handle: DeviceHandle<Context>,
        control_timeout: Duration,
    ) -> Result<(Self, Receiver<Completion>), Error> {
        trace!("UsbTransport::open control_timeout {control_timeout:?}");

        let config = handle.active_configuration()?;
        debug!("Current configuration is {config}");
        if config != 1 {
            debug!("Set active configuration to 1");
            handle.set_active_configuration(1)?;
        }
        debug!("Claim interface");
        handle.claim_interface(0)?;

        let (endpoints, read_sizes) = Self::discover_endpoints(&handle)?;
        info!(
            "UPort endpoints: bulk out 0x{:02x} ({} bytes), data in 0x{:02x}, event in 0x{:02x}",
            endpoints.bulk_out, endpoints.bulkout_size, endpoints.data_in, endpoints.event_in
        );

        let shared = Arc::new(UsbShared {
            handle,
            endpoints,
            control_timeout,
            read_sizes,
            pipes: Default::default(),
        });

        let (completion_tx, completion_rx) = mpsc::channel();
        let (writer_tx, writer_rx) = mpsc::channel();
        let (control_tx, control_rx) = mpsc::channel();

        let mut threads = Vec::new();
        for pipe in [Pipe::Data, Pipe::Event] {
            let shared = shared.clone();
            let completions = completion_tx.clone();
            threads.push(spawn(&format!("uport-{pipe}-in"), move || {
                read_pump(shared, pipe, completions)
            })?);
        }
        {
            let shared = shared.clone();
            threads.push(spawn("uport-bulk-out", move || {
                write_worker(shared, writer_rx, completion_tx)
            })?);
        }
        {
            let shared = shared.clone();
            threads.push(spawn("uport-control", move || {
                control_worker(shared, control_rx)
            })?);
        }

        Ok((
            Self {
                shared,
                writer: Mutex::new(Some(writer_tx)),
                control: Mutex::new(Some(control_tx)),
                threads: Mutex::new(threads),
            },
            completion_rx,
        ))
    }

    /// The first bulk in endpoint carries data and the second carries
    /// events.  The first bulk out endpoint is shared by every port.
    ///
    /// # Returns
    /// The endpoints, and the max packet sizes of the data and event pipes
    fn discover_endpoints(
        handle: &DeviceHandle<Context>,
    ) -> Result<(Endpoints, [usize; 2]), Error> {
        trace!("UsbTransport::discover_endpoints");
        let config = handle.device().active_config_descriptor()?;
        let mut bulk_in = Vec::new();
        let mut bulk_out = None;

        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                for ep in desc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    trace!(
                        "Bulk endpoint 0x{:02x} max packet {}",
                        ep.address(),
                        ep.max_packet_size()
                    );
                    match ep.direction() {
                        Direction::In => {
                            bulk_in.push((ep.address(), ep.max_packet_size() as usize))
                        }
                        Direction::Out if bulk_out.is_none() => {
                            bulk_out = Some((ep.address(), ep.max_packet_size() as usize))
                        }
                        Direction::Out => (),
                    }
                }
            }
        }

        let missing = |endpoint: &str| Error::DeviceAccess {
            kind: DeviceAccessError::MissingEndpoint {
                endpoint: endpoint.to_string(),
            },
        };
        let (bulk_out, bulkout_size) = bulk_out.ok_or_else(|| missing("bulk out"))?;
        let (data_in, data_size) = *bulk_in.first().ok_or_else(|| missing("data in"))?;
        let (event_in, event_size) = *bulk_in.get(1).ok_or_else(|| missing("event in"))?;
        let bulkout_size = if bulkout_size == 0 {
            warn!("Bulk out endpoint reports zero max packet size, using {DEFAULT_BULKOUT_SIZE}");
            DEFAULT_BULKOUT_SIZE
        } else {
            bulkout_size
        };

        let endpoints = Endpoints {
            bulk_out,
            data_in,
            event_in,
            bulkout_size,
        };
        let read_sizes = [data_size, event_size].map(read_size);
        Ok((endpoints, read_sizes))
    }

    fn shutdown(&self) {
        trace!("UsbTransport::shutdown");
        for gate in &self.shared.pipes {
            gate.state.lock().shutdown = true;
            gate.cond.notify_all();
        }
        // Dropping the senders ends the writer and control workers
        self.writer.lock().take();
        self.control.lock().take();
        for thread in self.threads.lock().drain(..) {
            if thread.join().is_err() {
                warn!("UPort worker thread panicked");
            }
        }
    }
}

/// Read buffer for a bulk in pipe: exactly one packet
fn read_size(max_packet: usize) -> usize {
    if max_packet == 0 {
        warn!("Bulk in endpoint reports zero max packet size, using {DEFAULT_BULKOUT_SIZE}");
        DEFAULT_BULKOUT_SIZE
    } else {
        max_packet
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>, Error>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| Error::Init {
            message: format!("Failed to start thread {name}: {e}"),
        })
}

fn read_pump(shared: Arc<UsbShared>, pipe: Pipe, completions: Sender<Completion>) {
    trace!("read_pump {pipe} started");
    let endpoint = shared.endpoints.for_pipe(pipe);
    let gate = &shared.pipes[pipe.index()];
    // One packet per read.  A full buffer completes the transfer at once, so
    // the poll timeout only ever fires with nothing received.  rusb drops
    // any partial data when it reports a timeout.
    let mut buf = vec![0u8; shared.read_sizes[pipe.index()]];

    loop {
        {
            let mut state = gate.state.lock();
            while !state.submitted && !state.shutdown {
                gate.cond.wait(&mut state);
            }
            if state.shutdown {
                break;
            }
        }

        let result = shared
            .handle
            .read_bulk(endpoint, &mut buf, DEFAULT_READ_POLL_TIMEOUT);
        if matches!(result, Err(rusb::Error::Timeout)) {
            continue;
        }

        // A read killed while in progress completes silently
        let mut state = gate.state.lock();
        if !state.submitted || state.shutdown {
            continue;
        }
        state.submitted = false;
        drop(state);

        let (completion, fatal) = match result {
            Ok(len) => (
                Completion::Read {
                    pipe,
                    data: buf[..len].to_vec(),
                },
                false,
            ),
            Err(e) => {
                debug!("Read on {pipe} pipe failed: {e}");
                (
                    Completion::ReadError {
                        pipe,
                        error: e.into(),
                    },
                    e == rusb::Error::NoDevice,
                )
            }
        };
        if completions.send(completion).is_err() || fatal {
            break;
        }
    }
    trace!("read_pump {pipe} exiting");
}

fn write_worker(shared: Arc<UsbShared>, jobs: Receiver<WriteJob>, completions: Sender<Completion>) {
    trace!("write_worker started");
    while let Ok(job) = jobs.recv() {
        let result = shared
            .handle
            .write_bulk(shared.endpoints.bulk_out, &job.frame, DEFAULT_WRITE_TIMEOUT)
            .map_err(Error::from);
        if let Err(e) = &result {
            warn!("Bulk out for port {} failed: {e}", job.port);
        }
        let completion = Completion::Write {
            port: job.port,
            result,
        };
        if completions.send(completion).is_err() {
            break;
        }
    }
    trace!("write_worker exiting");
}

fn control_worker(shared: Arc<UsbShared>, jobs: Receiver<ControlJob>) {
    trace!("control_worker started");
    while let Ok(job) = jobs.recv() {
        if let Err(e) = shared.handle.write_control(
            REQUEST_TYPE_OUT,
            job.request,
            job.value,
            job.index,
            &job.data,
            shared.control_timeout,
        ) {
            warn!(
                "Async {} for port {} failed: {e}",
                request_name(job.request),
                job.index
            );
        }
    }
    trace!("control_worker exiting");
}

fn closed(what: &str) -> Error {
    Error::Communication {
        kind: crate::error::CommunicationError::TransportClosed {
            message: format!("{what} worker has stopped"),
        },
    }
}

impl Transport for UsbTransport {
    fn endpoints(&self) -> Endpoints {
        self.shared.endpoints
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error> {
        trace!(
            "UsbTransport::control_out {} value 0x{value:04x} index {index} data.len() {}",
            request_name(request),
            data.len()
        );
        self.shared.handle.write_control(
            REQUEST_TYPE_OUT,
            request,
            value,
            index,
            data,
            self.shared.control_timeout,
        )?;
        Ok(())
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        trace!(
            "UsbTransport::control_in {} value 0x{value:04x} index {index} buf.len() {}",
            request_name(request),
            buf.len()
        );
        self.shared
            .handle
            .read_control(
                REQUEST_TYPE_IN,
                request,
                value,
                index,
                buf,
                self.shared.control_timeout,
            )
            .map_err(|e| e.into())
    }

    fn control_out_async(&self, request: u8, value: u16, index: u16, data: &[u8]) {
        trace!(
            "UsbTransport::control_out_async {} value 0x{value:04x} index {index}",
            request_name(request)
        );
        let job = ControlJob {
            request,
            value,
            index,
            data: data.to_vec(),
        };
        let sent = match self.control.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            warn!("Dropped async {} for port {index}", request_name(request));
        }
    }

    fn submit_bulk_out(&self, port: usize, frame: Vec<u8>) -> Result<(), Error> {
        trace!(
            "UsbTransport::submit_bulk_out port {port} frame.len() {}",
            frame.len()
        );
        match self.writer.lock().as_ref() {
            Some(tx) => tx
                .send(WriteJob { port, frame })
                .map_err(|_| closed("bulk out")),
            None => Err(closed("bulk out")),
        }
    }

    fn submit_read(&self, pipe: Pipe) -> Result<(), Error> {
        trace!("UsbTransport::submit_read {pipe}");
        let gate = &self.shared.pipes[pipe.index()];
        let mut state = gate.state.lock();
        if state.shutdown {
            return Err(closed(&format!("{pipe} in")));
        }
        state.submitted = true;
        gate.cond.notify_one();
        Ok(())
    }

    fn kill_read(&self, pipe: Pipe) {
        trace!("UsbTransport::kill_read {pipe}");
        self.shared.pipes[pipe.index()].state.lock().submitted = false;
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        trace!("UsbTransport::drop");
        self.shutdown();
        // Release interface - ignoring errors since we're in drop
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            let _ = shared.handle.release_interface(0);
        }
        trace!("Exited drop");
    }
}
