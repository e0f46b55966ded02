//! The flash I/O collaborator interface.
//!
//! This core never talks to a transport directly - it consumes a single
//! object-safe `FlashIo` trait, the same boundary the block I/O
//! primitives (`read_ec_hdr`, `read_vid_hdr`, `read_data`, `sync_erase`,
//! `is_bad`) occupy upstream. `FileBackedIo` is this crate's reference
//! implementation, mapping a flat image (one fixed-size slice per PEB)
//! onto the trait; it is used by the CLI and by the test fixtures below.

use std::collections::BTreeSet;

use crate::config::DeviceGeometry;
use crate::layout::{Compat, EcHeader, VidHeader, VolType, EC_HDR_SIZE, VID_HDR_SIZE};

/// Outcome of reading a header (EC or VID) from a PEB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrOutcome {
    Ok,
    Bitflips,
    Ff,
    FfBitflips,
    BadHdr,
    BadHdrEbadmsg,
}

/// Outcome of reading the data area of a PEB.
#[derive(Debug, Clone)]
pub enum DataReadOutcome {
    Ok(Vec<u8>),
    Bitflips(Vec<u8>),
    /// Uncorrectable ECC error; no usable data was returned.
    EccError,
}

/// The external interface this core consumes for all flash access.
pub trait FlashIo {
    fn peb_count(&self) -> u32;
    fn peb_size(&self) -> u32;

    fn is_bad(&mut self, pnum: u32) -> std::io::Result<bool>;

    fn read_ec_hdr(&mut self, pnum: u32) -> std::io::Result<(HdrOutcome, Option<EcHeader>)>;
    fn read_vid_hdr(&mut self, pnum: u32) -> std::io::Result<(HdrOutcome, Option<VidHeader>)>;
    fn read_data(&mut self, pnum: u32, offset: u32, len: u32) -> std::io::Result<DataReadOutcome>;

    fn sync_erase(&mut self, pnum: u32) -> std::io::Result<()>;
    fn write_ec_hdr(&mut self, pnum: u32, hdr: &EcHeader) -> std::io::Result<()>;
    fn write_vid_hdr(&mut self, pnum: u32, hdr: &VidHeader) -> std::io::Result<()>;
    fn write_data(&mut self, pnum: u32, offset: u32, data: &[u8]) -> std::io::Result<()>;
}

fn is_all(buf: &[u8], byte: u8) -> bool {
    buf.iter().all(|&b| b == byte)
}

/// Reference `FlashIo` implementation over an in-memory flat image.
///
/// Each PEB is a fixed-size byte slice; an all-`0xFF` PEB is erased.
/// Test fixtures additionally use `inject_*` to simulate the media
/// conditions the classifier (`crate::classify`) has to distinguish.
pub struct FileBackedIo {
    geometry: DeviceGeometry,
    pebs: Vec<Vec<u8>>,
    bad: BTreeSet<u32>,
    inject_ec_bitflip: BTreeSet<u32>,
    inject_vid_bitflip: BTreeSet<u32>,
    inject_ec_ecc_error: BTreeSet<u32>,
    inject_vid_ecc_error: BTreeSet<u32>,
    inject_data_bitflip: BTreeSet<u32>,
    inject_data_ecc_error: BTreeSet<u32>,
}

impl FileBackedIo {
    /// Creates a blank (all-erased) device with `peb_count` PEBs.
    pub fn blank(geometry: DeviceGeometry, peb_count: u32) -> Self {
        let peb_size = geometry.peb_size as usize;
        FileBackedIo {
            pebs: (0..peb_count).map(|_| vec![0xFFu8; peb_size]).collect(),
            geometry,
            bad: BTreeSet::new(),
            inject_ec_bitflip: BTreeSet::new(),
            inject_vid_bitflip: BTreeSet::new(),
            inject_ec_ecc_error: BTreeSet::new(),
            inject_vid_ecc_error: BTreeSet::new(),
            inject_data_bitflip: BTreeSet::new(),
            inject_data_ecc_error: BTreeSet::new(),
        }
    }

    /// Loads a flat image file: `peb_count` consecutive `peb_size`-byte
    /// slices, one per PEB.
    pub fn from_file(geometry: DeviceGeometry, path: &std::path::Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let peb_size = geometry.peb_size as usize;
        if raw.len() % peb_size != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "image size is not a multiple of the PEB size",
            ));
        }
        let pebs = raw.chunks(peb_size).map(|c| c.to_vec()).collect();
        Ok(FileBackedIo {
            pebs,
            geometry,
            bad: BTreeSet::new(),
            inject_ec_bitflip: BTreeSet::new(),
            inject_vid_bitflip: BTreeSet::new(),
            inject_ec_ecc_error: BTreeSet::new(),
            inject_vid_ecc_error: BTreeSet::new(),
            inject_data_bitflip: BTreeSet::new(),
            inject_data_ecc_error: BTreeSet::new(),
        })
    }

    pub fn to_file(&self, path: &std::path::Path) -> std::io::Result<()> {
        let mut flat = Vec::with_capacity(self.pebs.len() * self.geometry.peb_size as usize);
        for peb in &self.pebs {
            flat.extend_from_slice(peb);
        }
        std::fs::write(path, flat)
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn mark_bad(&mut self, pnum: u32) {
        self.bad.insert(pnum);
    }

    pub fn inject_ec_bitflip(&mut self, pnum: u32) {
        self.inject_ec_bitflip.insert(pnum);
    }

    pub fn inject_vid_bitflip(&mut self, pnum: u32) {
        self.inject_vid_bitflip.insert(pnum);
    }

    pub fn inject_ec_ecc_error(&mut self, pnum: u32) {
        self.inject_ec_ecc_error.insert(pnum);
    }

    pub fn inject_vid_ecc_error(&mut self, pnum: u32) {
        self.inject_vid_ecc_error.insert(pnum);
    }

    pub fn inject_data_bitflip(&mut self, pnum: u32) {
        self.inject_data_bitflip.insert(pnum);
    }

    pub fn inject_data_ecc_error(&mut self, pnum: u32) {
        self.inject_data_ecc_error.insert(pnum);
    }

    /// Test/fixture helper: stamps a valid EC header onto `pnum`.
    pub fn stamp_ec_header(&mut self, pnum: u32, ec: u64, image_seq: u32) {
        let hdr = EcHeader {
            version: crate::layout::UBI_VERSION,
            ec,
            vid_hdr_offset: self.geometry.vid_hdr_offset,
            data_offset: self.geometry.data_offset,
            image_seq,
        };
        let bytes = hdr.to_bytes();
        self.pebs[pnum as usize][0..EC_HDR_SIZE].copy_from_slice(&bytes);
    }

    /// Test/fixture helper: stamps a valid VID header onto `pnum`.
    #[allow(clippy::too_many_arguments)]
    pub fn stamp_vid_header(
        &mut self,
        pnum: u32,
        vol_id: i32,
        lnum: u32,
        sqnum: u64,
        vol_type: VolType,
        copy_flag: bool,
        used_ebs: u32,
        data_pad: u32,
        data: &[u8],
    ) {
        let data_crc = crate::layout::crc32(data);
        let hdr = VidHeader {
            version: crate::layout::UBI_VERSION,
            vol_type,
            copy_flag,
            compat: Compat::None,
            vol_id,
            lnum,
            data_size: data.len() as u32,
            used_ebs,
            data_pad,
            data_crc,
            sqnum,
        };
        let bytes = hdr.to_bytes();
        let off = self.geometry.vid_hdr_offset as usize;
        self.pebs[pnum as usize][off..off + VID_HDR_SIZE].copy_from_slice(&bytes);
        let data_off = self.geometry.data_offset as usize;
        self.pebs[pnum as usize][data_off..data_off + data.len()].copy_from_slice(data);
    }

    /// Corrupts the VID header area with a fixed non-FF byte pattern,
    /// simulating "unknown" corruption, and writes a data-area payload.
    pub fn corrupt_vid_header_with_data(&mut self, pnum: u32, fill: u8, data_len: usize) {
        let off = self.geometry.vid_hdr_offset as usize;
        for b in self.pebs[pnum as usize][off..off + VID_HDR_SIZE].iter_mut() {
            *b = fill;
        }
        let data_off = self.geometry.data_offset as usize;
        let end = (data_off + data_len).min(self.pebs[pnum as usize].len());
        for b in self.pebs[pnum as usize][data_off..end].iter_mut() {
            *b = fill;
        }
    }
}

impl FlashIo for FileBackedIo {
    fn peb_count(&self) -> u32 {
        self.pebs.len() as u32
    }

    fn peb_size(&self) -> u32 {
        self.geometry.peb_size
    }

    fn is_bad(&mut self, pnum: u32) -> std::io::Result<bool> {
        Ok(self.bad.contains(&pnum))
    }

    fn read_ec_hdr(&mut self, pnum: u32) -> std::io::Result<(HdrOutcome, Option<EcHeader>)> {
        let bytes = &self.pebs[pnum as usize][0..EC_HDR_SIZE];
        if is_all(bytes, 0xFF) {
            let outcome = if self.inject_ec_bitflip.contains(&pnum) {
                HdrOutcome::FfBitflips
            } else {
                HdrOutcome::Ff
            };
            return Ok((outcome, None));
        }
        match EcHeader::from_bytes(bytes) {
            None => Ok((HdrOutcome::BadHdr, None)),
            Some(Err(())) => {
                if self.inject_ec_ecc_error.contains(&pnum) {
                    Ok((HdrOutcome::BadHdrEbadmsg, None))
                } else {
                    Ok((HdrOutcome::BadHdr, None))
                }
            }
            Some(Ok(hdr)) => {
                let outcome = if self.inject_ec_bitflip.contains(&pnum) {
                    HdrOutcome::Bitflips
                } else {
                    HdrOutcome::Ok
                };
                Ok((outcome, Some(hdr)))
            }
        }
    }

    fn read_vid_hdr(&mut self, pnum: u32) -> std::io::Result<(HdrOutcome, Option<VidHeader>)> {
        let off = self.geometry.vid_hdr_offset as usize;
        let bytes = &self.pebs[pnum as usize][off..off + VID_HDR_SIZE];
        if is_all(bytes, 0xFF) {
            let outcome = if self.inject_vid_bitflip.contains(&pnum) {
                HdrOutcome::FfBitflips
            } else {
                HdrOutcome::Ff
            };
            return Ok((outcome, None));
        }
        match VidHeader::from_bytes(bytes) {
            None => Ok((HdrOutcome::BadHdr, None)),
            Some(Err(())) => {
                if self.inject_vid_ecc_error.contains(&pnum) {
                    Ok((HdrOutcome::BadHdrEbadmsg, None))
                } else {
                    Ok((HdrOutcome::BadHdr, None))
                }
            }
            Some(Ok(hdr)) => {
                let outcome = if self.inject_vid_bitflip.contains(&pnum) {
                    HdrOutcome::Bitflips
                } else {
                    HdrOutcome::Ok
                };
                Ok((outcome, Some(hdr)))
            }
        }
    }

    fn read_data(&mut self, pnum: u32, offset: u32, len: u32) -> std::io::Result<DataReadOutcome> {
        if self.inject_data_ecc_error.contains(&pnum) {
            return Ok(DataReadOutcome::EccError);
        }
        let start = offset as usize;
        let end = start + len as usize;
        let data = self.pebs[pnum as usize][start..end].to_vec();
        if self.inject_data_bitflip.contains(&pnum) {
            Ok(DataReadOutcome::Bitflips(data))
        } else {
            Ok(DataReadOutcome::Ok(data))
        }
    }

    fn sync_erase(&mut self, pnum: u32) -> std::io::Result<()> {
        let size = self.geometry.peb_size as usize;
        self.pebs[pnum as usize] = vec![0xFFu8; size];
        Ok(())
    }

    fn write_ec_hdr(&mut self, pnum: u32, hdr: &EcHeader) -> std::io::Result<()> {
        let bytes = hdr.to_bytes();
        self.pebs[pnum as usize][0..EC_HDR_SIZE].copy_from_slice(&bytes);
        Ok(())
    }

    fn write_vid_hdr(&mut self, pnum: u32, hdr: &VidHeader) -> std::io::Result<()> {
        let bytes = hdr.to_bytes();
        let off = self.geometry.vid_hdr_offset as usize;
        self.pebs[pnum as usize][off..off + VID_HDR_SIZE].copy_from_slice(&bytes);
        Ok(())
    }

    fn write_data(&mut self, pnum: u32, offset: u32, data: &[u8]) -> std::io::Result<()> {
        let start = offset as usize;
        self.pebs[pnum as usize][start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_device_reads_as_free() {
        let mut io = FileBackedIo::blank(DeviceGeometry::default(), 4);
        let (outcome, hdr) = io.read_ec_hdr(0).unwrap();
        assert_eq!(outcome, HdrOutcome::Ff);
        assert!(hdr.is_none());
    }

    #[test]
    fn stamped_header_reads_back() {
        let mut io = FileBackedIo::blank(DeviceGeometry::default(), 4);
        io.stamp_ec_header(0, 5, 0x1234);
        let (outcome, hdr) = io.read_ec_hdr(0).unwrap();
        assert_eq!(outcome, HdrOutcome::Ok);
        assert_eq!(hdr.unwrap().ec, 5);
    }

    #[test]
    fn injected_bitflip_is_reported() {
        let mut io = FileBackedIo::blank(DeviceGeometry::default(), 4);
        io.stamp_ec_header(0, 5, 1);
        io.inject_ec_bitflip(0);
        let (outcome, hdr) = io.read_ec_hdr(0).unwrap();
        assert_eq!(outcome, HdrOutcome::Bitflips);
        assert!(hdr.is_some());
    }
}
