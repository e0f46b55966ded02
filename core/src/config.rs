//! Device geometry: the handful of numbers that describe a flash chip's
//! eraseblock layout, supplied by the caller (there is no on-flash
//! "superblock" the attach process can read this from before it has
//! attached).

use serde::{Deserialize, Serialize};

use crate::error::{AttachError, AttachResult};
use crate::layout::{EC_HDR_SIZE, VID_HDR_SIZE};

/// Geometry of the underlying flash device.
///
/// Mirrors the handful of fields the kernel's `ubi_device::ubi_dev_info`
/// carries into the attach path: PEB size and the two header offsets
/// that pin down where the data area begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceGeometry {
    /// Size in bytes of a single physical eraseblock.
    pub peb_size: u32,
    /// Minimum I/O unit size (NAND page size, or 1 for NOR).
    pub min_io_size: u32,
    /// Byte offset of the VID header within a PEB.
    pub vid_hdr_offset: u32,
    /// Byte offset of the first LEB data byte within a PEB.
    pub data_offset: u32,
    /// First-class exclusive upper bound of the user volume-id range;
    /// `vol_id >= max_user_volumes` (and not `layout_vol_id`) is internal.
    pub max_user_volumes: i32,
    /// Start of the internal volume-id range (layout volume excluded;
    /// see `layout_vol_id`).
    pub internal_vol_start: i32,
    /// The volume-id of the layout volume, which is internal by range
    /// but dispatched as a normal volume.
    pub layout_vol_id: i32,
    /// Exclusive upper bound of the region fastmap scans first when
    /// looking for its anchor.
    pub fm_max_start: u32,
    /// Internal volume id carrying the fastmap superblock, used to
    /// pick the anchor PEB among `[0, fm_max_start)`.
    pub fastmap_sb_vol_id: i32,
    /// Internal volume id of the paired-page shadow-backup volume, if
    /// the device carries one.
    pub backup_vol_id: i32,
}

impl Default for DeviceGeometry {
    fn default() -> Self {
        DeviceGeometry {
            peb_size: 128 * 1024,
            min_io_size: 2048,
            vid_hdr_offset: 2048,
            data_offset: 4096,
            max_user_volumes: 128,
            internal_vol_start: 0x7FFF_EFFF,
            layout_vol_id: 0x7FFF_EFFF,
            fm_max_start: 64,
            fastmap_sb_vol_id: 0x7FFF_EFFE,
            backup_vol_id: 0x7FFF_EFFD,
        }
    }
}

impl DeviceGeometry {
    /// Checks the handful of ordering/size invariants the header layout
    /// depends on. Called once at attach entry.
    pub fn validate(&self) -> AttachResult<()> {
        if self.peb_size == 0 || self.min_io_size == 0 {
            return Err(AttachError::ImageFormat(
                "peb_size and min_io_size must be non-zero".into(),
            ));
        }
        if self.peb_size % self.min_io_size != 0 {
            return Err(AttachError::ImageFormat(
                "peb_size must be a multiple of min_io_size".into(),
            ));
        }
        if (self.vid_hdr_offset as usize) < EC_HDR_SIZE {
            return Err(AttachError::ImageFormat(
                "vid_hdr_offset overlaps the EC header".into(),
            ));
        }
        if (self.data_offset as usize) < self.vid_hdr_offset as usize + VID_HDR_SIZE {
            return Err(AttachError::ImageFormat(
                "data_offset overlaps the VID header".into(),
            ));
        }
        if self.data_offset >= self.peb_size {
            return Err(AttachError::ImageFormat(
                "data_offset does not leave room for any LEB data".into(),
            ));
        }
        Ok(())
    }

    /// Usable bytes per LEB once both headers and any padding are
    /// accounted for.
    pub fn leb_size(&self) -> u32 {
        self.peb_size - self.data_offset
    }

    /// True for any volume id this core must dispatch as "internal" -
    /// every id at or past `max_user_volumes` except the layout
    /// volume itself, which is internal by range but not by dispatch.
    pub fn is_internal_volume(&self, vol_id: i32) -> bool {
        vol_id >= self.max_user_volumes && vol_id != self.layout_vol_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_validates() {
        assert!(DeviceGeometry::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlapping_vid_offset() {
        let geo = DeviceGeometry {
            vid_hdr_offset: 4,
            ..DeviceGeometry::default()
        };
        assert!(geo.validate().is_err());
    }

    #[test]
    fn rejects_data_offset_past_peb() {
        let geo = DeviceGeometry {
            data_offset: 128 * 1024,
            ..DeviceGeometry::default()
        };
        assert!(geo.validate().is_err());
    }
}
