//! Per-product description of the UPort family, selected at attach time.
use crate::constants::*;
use crate::error::DeviceAccessError;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::fmt;

/// Describes one UPort product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub product_id: u16,
    pub name: &'static str,
    pub num_ports: usize,
    /// Whether ports can be switched to RS-422/RS-485
    pub multi_interface: bool,
}

const PROFILES: &[DeviceProfile] = &[
    DeviceProfile::new(UPORT1250_PID, "UPort 1250", 2, true),
    DeviceProfile::new(UPORT1251_PID, "UPort 1250I", 2, true),
    DeviceProfile::new(UPORT1410_PID, "UPort 1410", 4, false),
    DeviceProfile::new(UPORT1450_PID, "UPort 1450", 4, true),
    DeviceProfile::new(UPORT1451_PID, "UPort 1450I", 4, true),
    DeviceProfile::new(UPORT1618_PID, "UPort 1610-8", 8, false),
    DeviceProfile::new(UPORT1658_PID, "UPort 1650-8", 8, true),
    DeviceProfile::new(UPORT1613_PID, "UPort 1610-16", 16, false),
    DeviceProfile::new(UPORT1653_PID, "UPort 1650-16", 16, true),
];

impl DeviceProfile {
    const fn new(product_id: u16, name: &'static str, num_ports: usize, multi: bool) -> Self {
        Self {
            product_id,
            name,
            num_ports,
            multi_interface: multi,
        }
    }

    /// Look up the profile for a product id
    ///
    /// # Returns
    /// * `Ok(DeviceProfile)` - the matching profile
    /// * `Err(Error::DeviceAccess)` - if the product is not a known UPort
    pub fn lookup(product_id: u16) -> Result<Self, Error> {
        trace!("DeviceProfile::lookup product_id 0x{product_id:04x}");
        PROFILES
            .iter()
            .find(|p| p.product_id == product_id)
            .copied()
            .ok_or(Error::DeviceAccess {
                kind: DeviceAccessError::UnsupportedProduct {
                    vid: MOXA_VID,
                    pid: product_id,
                },
            })
    }

    /// All supported products
    pub fn all() -> &'static [DeviceProfile] {
        PROFILES
    }

    /// Name of the firmware image file for this product
    pub fn firmware_name(&self) -> String {
        format!("moxa-{:04x}.fw", self.product_id)
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}, {} ports)",
            self.name, MOXA_VID, self.product_id, self.num_ports
        )
    }
}
