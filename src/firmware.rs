//! Firmware images uploaded to a UPort at attach time.
//!
//! Images are the vendor's `moxa-XXXX.fw` files, where `XXXX` is the product
//! id in hex.  The image version is stored as three bytes at fixed offsets.
use crate::constants::{DOWN_BLOCK_SIZE, FW_VER_ADDR_1, FW_VER_ADDR_2, FW_VER_ADDR_3};
use crate::profile::DeviceProfile;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Render a packed firmware version as `major.minor.patch`
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xff,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// Pack the first three bytes of a version response into an integer
pub fn version_from_bytes(buf: &[u8]) -> u32 {
    (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2])
}

/// A firmware image and the version embedded in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    version: u32,
}

impl FirmwareImage {
    /// Wrap raw image bytes, extracting the embedded version.
    ///
    /// # Returns
    /// * `Ok(FirmwareImage)` - on success
    /// * `Err(Error::Args)` - if the image is too short to hold a version
    pub fn new(data: Vec<u8>) -> Result<Self, Error> {
        trace!("FirmwareImage::new data.len() {}", data.len());
        if data.len() <= FW_VER_ADDR_3 {
            let message = format!(
                "Firmware image of {} bytes is too short to contain a version",
                data.len()
            );
            warn!("{message}");
            return Err(Error::Args { message });
        }
        let version = version_from_bytes(&[
            data[FW_VER_ADDR_1],
            data[FW_VER_ADDR_2],
            data[FW_VER_ADDR_3],
        ]);
        Ok(Self { data, version })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The image split into upload blocks
    pub fn blocks(&self) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(DOWN_BLOCK_SIZE)
    }
}

/// Firmware images keyed by product id
#[derive(Debug, Clone, Default)]
pub struct FirmwareSet {
    images: HashMap<u16, Arc<FirmwareImage>>,
}

impl FirmwareSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: u16, image: FirmwareImage) {
        self.images.insert(product_id, Arc::new(image));
    }

    /// The image for `product_id`, if one was loaded
    pub fn image_for(&self, product_id: u16) -> Option<Arc<FirmwareImage>> {
        self.images.get(&product_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Load every known product's image that is present in `dir`.  Missing
    /// files are skipped; unreadable or malformed ones are errors.
    pub fn load_dir(dir: &Path) -> Result<Self, Error> {
        trace!("FirmwareSet::load_dir dir {}", dir.display());
        let mut set = Self::new();
        for profile in DeviceProfile::all() {
            let path = dir.join(profile.firmware_name());
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No firmware image at {}", path.display());
                    continue;
                }
                Err(e) => {
                    return Err(Error::Init {
                        message: format!("Failed to read firmware {}: {e}", path.display()),
                    })
                }
            };
            let image = FirmwareImage::new(data)?;
            debug!(
                "Loaded {} version {}",
                path.display(),
                format_version(image.version())
            );
            set.insert(profile.product_id, image);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a fake image with the given version bytes
    fn image_with_version(len: usize, ver: [u8; 3]) -> FirmwareImage {
        let mut data = vec![0xffu8; len];
        data[FW_VER_ADDR_1] = ver[0];
        data[FW_VER_ADDR_2] = ver[1];
        data[FW_VER_ADDR_3] = ver[2];
        FirmwareImage::new(data).unwrap()
    }

    #[test]
    fn test_version_extraction() {
        let image = image_with_version(200, [2, 1, 7]);
        assert_eq!(image.version(), 2 * 65536 + 256 + 7);
        assert_eq!(format_version(image.version()), "2.1.7");
    }

    #[test]
    fn test_short_image_rejected() {
        assert!(matches!(
            FirmwareImage::new(vec![0u8; FW_VER_ADDR_3]),
            Err(Error::Args { .. })
        ));
    }

    #[test]
    fn test_blocks() {
        let image = image_with_version(DOWN_BLOCK_SIZE * 2 + 5, [1, 0, 0]);
        let sizes: Vec<_> = image.blocks().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![DOWN_BLOCK_SIZE, DOWN_BLOCK_SIZE, 5]);
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let set = FirmwareSet::load_dir(Path::new("/nonexistent/mxuport/fw")).unwrap();
        assert!(set.is_empty());
    }
}
