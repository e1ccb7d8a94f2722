//! Attach: identify the product, check the firmware and upload a newer
//! image if one is available.
use super::port::PortState;
use super::{DeviceOpenState, DeviceSession};
use crate::config::SessionConfig;
use crate::error::DeviceAccessError;
use crate::firmware::format_version;
use crate::profile::DeviceProfile;
use crate::transport::{Transport, VendorRequests};
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::thread::sleep;

impl<T: Transport> DeviceSession<T> {
    /// Attach to a UPort reachable through `transport`.
    ///
    /// Runs the firmware handshake, uploading the image from
    /// `config.firmware` when it is newer than the device's, then allocates
    /// every port.  No port is opened and no read is submitted.
    ///
    /// # Arguments
    /// * `transport` - The device's transport
    /// * `product_id` - USB product id, used to select the [`DeviceProfile`]
    /// * `config` - Session configuration
    ///
    /// # Returns
    /// * `Ok(DeviceSession)` - the attached session
    /// * `Err(Error::DeviceAccess)` - unknown product, or the firmware
    ///   config query failed (the device has been reset)
    /// * `Err(Error)` - any other failure during the handshake
    pub fn attach(transport: T, product_id: u16, config: SessionConfig) -> Result<Self, Error> {
        trace!("DeviceSession::attach product_id 0x{product_id:04x}");
        config.validate()?;
        let profile = DeviceProfile::lookup(product_id)?;
        info!("Attaching {profile}");

        if let Err(e) = transport.query_fw_config() {
            error!("Firmware config query failed, resetting device: {e}");
            if let Err(e) = transport.reset_device() {
                warn!("Device reset failed: {e}");
            }
            return Err(DeviceAccessError::FirmwareConfig.into());
        }

        let fw_version = Self::negotiate_firmware(&transport, &profile, &config)?;

        let ports = (0..profile.num_ports)
            .map(|index| PortState::new(index, config.queue_capacity))
            .collect::<Result<Vec<_>, _>>()?;

        let endpoints = transport.endpoints();
        debug!(
            "Data pipe 0x{:02x} and event pipe 0x{:02x} shared by {} ports, bulk out 0x{:02x} max {} bytes",
            endpoints.data_in,
            endpoints.event_in,
            ports.len(),
            endpoints.bulk_out,
            endpoints.bulkout_size
        );
        info!(
            "Attached {profile} firmware {}",
            format_version(fw_version)
        );

        Ok(Self {
            transport,
            profile,
            config,
            endpoints,
            fw_version,
            ports,
            open_lock: Mutex::new(DeviceOpenState::default()),
            reads_active: AtomicBool::new(false),
            attached: AtomicBool::new(true),
            listener: RwLock::new(None),
        })
    }

    /// Compare the device's firmware with the available image and upload
    /// the image if it is newer.
    ///
    /// # Returns
    /// * `Ok(u32)` - the firmware version now running on the device
    fn negotiate_firmware(
        transport: &T,
        profile: &DeviceProfile,
        config: &SessionConfig,
    ) -> Result<u32, Error> {
        trace!("DeviceSession::negotiate_firmware {profile}");
        let version = transport.get_version()?;
        info!("Device firmware version {}", format_version(version));

        let Some(image) = config.firmware.image_for(profile.product_id) else {
            warn!(
                "No {} image available, keeping device firmware",
                profile.firmware_name()
            );
            return Ok(version);
        };

        if version >= image.version() {
            debug!(
                "Device firmware {} is not older than image {}, skipping upload",
                format_version(version),
                format_version(image.version())
            );
            return Ok(version);
        }

        info!(
            "Uploading firmware {} ({} bytes)",
            format_version(image.version()),
            image.len()
        );
        transport.start_fw_download()?;
        for block in image.blocks() {
            transport.fw_data(block)?;
            sleep(config.fw_block_delay);
        }
        transport.stop_fw_download()?;
        sleep(config.fw_settle_delay);

        transport.query_fw_ready()?;
        sleep(config.fw_settle_delay);

        let version = transport.get_version()?;
        info!("Device firmware is now version {}", format_version(version));
        Ok(version)
    }
}
