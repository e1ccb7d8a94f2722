//! Finds a UPort on the USB bus and attaches a session to it.
use crate::constants::*;
use crate::error::DeviceAccessError;
use crate::firmware::FirmwareSet;
use crate::profile::DeviceProfile;
use crate::transport::Completion;
use crate::{DeviceSession, Error, SessionConfig, UsbTransport};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rusb::{Context, DeviceHandle, UsbContext};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::thread;

/// A session on real hardware.  Derefs to the [`DeviceSession`].
///
/// A dispatcher thread feeds the transport's completions to the session
/// for as long as the session exists.
#[derive(Debug)]
pub struct UsbSession {
    session: Arc<DeviceSession<UsbTransport>>,
}

impl UsbSession {
    /// A shared handle to the session
    pub fn session(&self) -> Arc<DeviceSession<UsbTransport>> {
        self.session.clone()
    }
}

impl Deref for UsbSession {
    type Target = DeviceSession<UsbTransport>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// A builder for [`UsbSession`]s.
///
/// # Examples
///
/// ```no_run
/// use mxuport::SessionBuilder;
///
/// let session = SessionBuilder::new()
///     .firmware_dir("/lib/firmware")
///     .build()
///     .unwrap();
/// session.open(0).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct SessionBuilder {
    context: Option<Context>,
    serial: Option<String>,
    product_id: Option<u16>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this [`rusb::Context`] rather than creating one
    pub fn context(&mut self, context: Context) -> &mut Self {
        self.context = Some(context);
        self
    }

    /// Only match a UPort with this serial number string
    pub fn serial(&mut self, serial: &str) -> &mut Self {
        self.serial = Some(serial.to_string());
        self
    }

    /// Only match this product id
    pub fn product(&mut self, product_id: u16) -> &mut Self {
        self.product_id = Some(product_id);
        self
    }

    /// Replace the whole session configuration
    pub fn config(&mut self, config: SessionConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Load firmware images from this directory at build time
    pub fn firmware_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.config.firmware_dir = Some(dir.into());
        self
    }

    /// Log frames and events at debug rather than trace level
    pub fn debug(&mut self, debug: bool) -> &mut Self {
        self.config.debug = debug;
        self
    }

    /// Find the UPort, claim it and attach a session.
    ///
    /// # Returns
    /// * `Ok(UsbSession)` - the attached session
    /// * `Err(Error::DeviceAccess)` - if no matching UPort was found
    /// * `Err(Error)` - if the attach failed
    pub fn build(&self) -> Result<UsbSession, Error> {
        trace!("SessionBuilder::build");
        let mut config = self.config.clone();
        if config.firmware.is_empty() {
            if let Some(dir) = &config.firmware_dir {
                config.firmware = FirmwareSet::load_dir(dir)?;
            }
        }

        let context = match &self.context {
            Some(context) => context.clone(),
            None => Context::new()?,
        };
        let (handle, product_id) = self.find_device(&context)?;

        let (transport, completions) = UsbTransport::open(handle, config.control_timeout)?;
        let session = Arc::new(DeviceSession::attach(transport, product_id, config)?);
        spawn_dispatcher(Arc::downgrade(&session), completions)?;
        Ok(UsbSession { session })
    }

    fn find_device(&self, context: &Context) -> Result<(DeviceHandle<Context>, u16), Error> {
        trace!(
            "SessionBuilder::find_device serial {:?} product {:?}",
            self.serial,
            self.product_id
        );
        for device in context.devices()?.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() != MOXA_VID {
                continue;
            }
            let product_id = desc.product_id();
            if self.product_id.is_some_and(|pid| pid != product_id) {
                continue;
            }
            if DeviceProfile::lookup(product_id).is_err() {
                debug!("Skipping unsupported MOXA product {product_id:04x}");
                continue;
            }

            let handle = device.open()?;
            if let Some(wanted) = &self.serial {
                match handle.read_serial_number_string_ascii(&desc) {
                    Ok(serial) if &serial == wanted => (),
                    Ok(serial) => {
                        debug!("UPort serial {serial} didn't match requested {wanted}");
                        continue;
                    }
                    Err(e) => {
                        info!("Couldn't read UPort serial number: {e}");
                        continue;
                    }
                }
            }
            info!(
                "Found UPort {:04x}:{product_id:04x} at bus {:03} address {:03}",
                MOXA_VID,
                device.bus_number(),
                device.address()
            );
            return Ok((handle, product_id));
        }

        info!("No suitable UPort found");
        Err(DeviceAccessError::NotFound { vid: MOXA_VID }.into())
    }
}

fn spawn_dispatcher(
    session: Weak<DeviceSession<UsbTransport>>,
    completions: Receiver<Completion>,
) -> Result<(), Error> {
    thread::Builder::new()
        .name("uport-dispatch".to_string())
        .spawn(move || {
            trace!("Dispatcher started");
            while let Ok(completion) = completions.recv() {
                match session.upgrade() {
                    Some(session) => session.handle_completion(completion),
                    None => break,
                }
            }
            trace!("Dispatcher exiting");
        })
        .map(|_| ())
        .map_err(|e| Error::Init {
            message: format!("Failed to start dispatcher: {e}"),
        })
}
