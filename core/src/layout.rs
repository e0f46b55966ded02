//! Bit-exact on-flash header layout.
//!
//! Every PEB has an EC header at offset 0, a VID header at
//! `vid_hdr_offset`, and a data area starting at `data_offset`. All
//! multi-byte integers are big-endian. Header CRCs use CRC-32 with seed
//! `0xFFFFFFFF` over every preceding byte of the header.

use serde::{Deserialize, Serialize};

pub const EC_HDR_MAGIC: u32 = 0x5542_4923;
pub const VID_HDR_MAGIC: u32 = 0x5542_4921;
pub const UBI_VERSION: u8 = 1;

/// Only the low 31 bits of the erase counter are ever used.
pub const MAX_EC: u64 = (1u64 << 31) - 1;

pub const EC_HDR_SIZE: usize = 64;
pub const VID_HDR_SIZE: usize = 64;

const CRC32_SEED: u32 = 0xFFFF_FFFF;

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(CRC32_SEED);
    hasher.update(data);
    hasher.finalize()
}

/// `vol_type` field of a VID header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolType {
    Dynamic,
    Static,
}

impl VolType {
    fn from_wire(v: u8) -> Option<Self> {
        match v {
            1 => Some(VolType::Dynamic),
            2 => Some(VolType::Static),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            VolType::Dynamic => 1,
            VolType::Static => 2,
        }
    }
}

/// `compat` field of a VID header, only meaningful for internal volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compat {
    None,
    Delete,
    ReadOnly,
    Preserve,
    Reject,
}

impl Compat {
    fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Compat::None),
            1 => Some(Compat::Delete),
            2 => Some(Compat::ReadOnly),
            4 => Some(Compat::Preserve),
            5 => Some(Compat::Reject),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Compat::None => 0,
            Compat::Delete => 1,
            Compat::ReadOnly => 2,
            Compat::Preserve => 4,
            Compat::Reject => 5,
        }
    }
}

/// Erase-counter header, read from offset 0 of a PEB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcHeader {
    pub version: u8,
    pub ec: u64,
    pub vid_hdr_offset: u32,
    pub data_offset: u32,
    pub image_seq: u32,
}

impl EcHeader {
    pub fn to_bytes(&self) -> [u8; EC_HDR_SIZE] {
        let mut buf = [0u8; EC_HDR_SIZE];
        buf[0..4].copy_from_slice(&EC_HDR_MAGIC.to_be_bytes());
        buf[4] = self.version;
        // bytes 5..8 reserved
        buf[8..16].copy_from_slice(&self.ec.to_be_bytes());
        buf[16..20].copy_from_slice(&self.vid_hdr_offset.to_be_bytes());
        buf[20..24].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[24..28].copy_from_slice(&self.image_seq.to_be_bytes());
        // bytes 28..60 reserved
        let crc = crc32(&buf[0..60]);
        buf[60..64].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parses a header, returning `None` on magic mismatch (caller maps
    /// this to the `FF`/`BAD_HDR` family of outcomes) and `Some(Err)` on
    /// CRC mismatch.
    pub fn from_bytes(buf: &[u8]) -> Option<Result<Self, ()>> {
        if buf.len() < EC_HDR_SIZE {
            return Some(Err(()));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != EC_HDR_MAGIC {
            return None;
        }
        let stored_crc = u32::from_be_bytes(buf[60..64].try_into().unwrap());
        if crc32(&buf[0..60]) != stored_crc {
            return Some(Err(()));
        }
        Some(Ok(EcHeader {
            version: buf[4],
            ec: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
            vid_hdr_offset: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            data_offset: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            image_seq: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
        }))
    }
}

/// Volume-identifier header, read from `vid_hdr_offset` of a PEB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VidHeader {
    pub version: u8,
    pub vol_type: VolType,
    pub copy_flag: bool,
    pub compat: Compat,
    pub vol_id: i32,
    pub lnum: u32,
    pub data_size: u32,
    pub used_ebs: u32,
    pub data_pad: u32,
    pub data_crc: u32,
    pub sqnum: u64,
}

impl VidHeader {
    pub fn to_bytes(&self) -> [u8; VID_HDR_SIZE] {
        let mut buf = [0u8; VID_HDR_SIZE];
        buf[0..4].copy_from_slice(&VID_HDR_MAGIC.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.vol_type.to_wire();
        buf[6] = self.copy_flag as u8;
        buf[7] = self.compat.to_wire();
        buf[8..12].copy_from_slice(&self.vol_id.to_be_bytes());
        buf[12..16].copy_from_slice(&self.lnum.to_be_bytes());
        // bytes 16..20 reserved
        buf[20..24].copy_from_slice(&self.data_size.to_be_bytes());
        buf[24..28].copy_from_slice(&self.used_ebs.to_be_bytes());
        buf[28..32].copy_from_slice(&self.data_pad.to_be_bytes());
        buf[32..36].copy_from_slice(&self.data_crc.to_be_bytes());
        // bytes 36..40 reserved
        buf[40..48].copy_from_slice(&self.sqnum.to_be_bytes());
        // bytes 48..60 reserved
        let crc = crc32(&buf[0..60]);
        buf[60..64].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Result<Self, ()>> {
        if buf.len() < VID_HDR_SIZE {
            return Some(Err(()));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != VID_HDR_MAGIC {
            return None;
        }
        let stored_crc = u32::from_be_bytes(buf[60..64].try_into().unwrap());
        if crc32(&buf[0..60]) != stored_crc {
            return Some(Err(()));
        }
        let vol_type = match VolType::from_wire(buf[5]) {
            Some(t) => t,
            None => return Some(Err(())),
        };
        let compat = match Compat::from_wire(buf[7]) {
            Some(c) => c,
            None => return Some(Err(())),
        };
        Some(Ok(VidHeader {
            version: buf[4],
            vol_type,
            copy_flag: buf[6] != 0,
            compat,
            vol_id: i32::from_be_bytes(buf[8..12].try_into().unwrap()),
            lnum: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            data_size: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            used_ebs: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            data_pad: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
            data_crc: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            sqnum: u64::from_be_bytes(buf[40..48].try_into().unwrap()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_header_round_trips() {
        let hdr = EcHeader {
            version: UBI_VERSION,
            ec: 42,
            vid_hdr_offset: 64,
            data_offset: 2048,
            image_seq: 0xAABBCCDD,
        };
        let bytes = hdr.to_bytes();
        let parsed = EcHeader::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(hdr, parsed);
    }

    #[test]
    fn ec_header_rejects_corrupted_crc() {
        let hdr = EcHeader {
            version: UBI_VERSION,
            ec: 1,
            vid_hdr_offset: 64,
            data_offset: 2048,
            image_seq: 1,
        };
        let mut bytes = hdr.to_bytes();
        bytes[10] ^= 0xFF;
        assert!(EC_HDR_MAGIC == u32::from_be_bytes(bytes[0..4].try_into().unwrap()));
        assert!(matches!(EcHeader::from_bytes(&bytes), Some(Err(()))));
    }

    #[test]
    fn ec_header_absent_magic_is_none() {
        let bytes = [0xFFu8; EC_HDR_SIZE];
        assert!(EcHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn vid_header_round_trips() {
        let hdr = VidHeader {
            version: UBI_VERSION,
            vol_type: VolType::Static,
            copy_flag: true,
            compat: Compat::Preserve,
            vol_id: 7,
            lnum: 3,
            data_size: 1024,
            used_ebs: 10,
            data_pad: 0,
            data_crc: 0xDEADBEEF,
            sqnum: 99,
        };
        let bytes = hdr.to_bytes();
        let parsed = VidHeader::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(hdr, parsed);
    }
}
