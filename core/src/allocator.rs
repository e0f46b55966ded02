//! Attach-time PEB allocator: the single "give me a free PEB" primitive
//! usable before wear-leveling exists. Used internally by backup
//! recovery; exposed publicly for any other attach-time
//! collaborator that needs the same guarantee.
//!
//! Grounded on `attach.c:ubi_early_get_peb()`.

use crate::config::DeviceGeometry;
use crate::error::{AttachError, AttachResult};
use crate::io::FlashIo;
use crate::layout::EcHeader;
use crate::model::{AttachInfo, PebHandle};

/// Hands back a PEB ready for immediate use: erased and carrying a
/// freshly written EC header. Prefers the `free` list; falls back to
/// erasing the head of `erase` one candidate at a time. Returns
/// `AttachError::NoSpace` once both are exhausted.
pub fn early_get_peb(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    ai: &mut AttachInfo,
) -> AttachResult<PebHandle> {
    if let Some(h) = ai.free.pop_front() {
        return Ok(h);
    }

    while let Some(h) = ai.erase.pop_front() {
        let pnum = ai.peb(h).pnum;
        let next_ec = ai.peb(h).ec + 1;
        if io.sync_erase(pnum).is_err() {
            // This candidate is unusable; drop it from consideration
            // (it is not re-queued anywhere - a damaged PEB here is a
            // bad PEB the caller can no longer rely on).
            continue;
        }
        let hdr = EcHeader {
            version: crate::layout::UBI_VERSION,
            ec: next_ec,
            vid_hdr_offset: geo.vid_hdr_offset,
            data_offset: geo.data_offset,
            image_seq: 0,
        };
        if io.write_ec_hdr(pnum, &hdr).is_err() {
            continue;
        }
        ai.peb_mut(h).ec = next_ec;
        return Ok(h);
    }

    Err(AttachError::NoSpace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileBackedIo;

    #[test]
    fn prefers_free_list_over_erasing() {
        let geo = DeviceGeometry::default();
        let mut io = FileBackedIo::blank(geo, 2);
        let mut ai = AttachInfo::new();
        let free_h = ai.alloc_peb(0, 5);
        ai.push_free(free_h);
        let erase_h = ai.alloc_peb(1, 3);
        ai.push_erase(erase_h);

        let got = early_get_peb(&mut io, &geo, &mut ai).unwrap();
        assert_eq!(ai.peb(got).pnum, 0);
    }

    #[test]
    fn falls_back_to_erase_list() {
        let geo = DeviceGeometry::default();
        let mut io = FileBackedIo::blank(geo, 1);
        let mut ai = AttachInfo::new();
        let h = ai.alloc_peb(0, 7);
        ai.push_erase(h);

        let got = early_get_peb(&mut io, &geo, &mut ai).unwrap();
        assert_eq!(ai.peb(got).pnum, 0);
        assert_eq!(ai.peb(got).ec, 8);
    }

    #[test]
    fn exhaustion_is_no_space() {
        let geo = DeviceGeometry::default();
        let mut io = FileBackedIo::blank(geo, 0);
        let mut ai = AttachInfo::new();
        assert!(matches!(
            early_get_peb(&mut io, &geo, &mut ai),
            Err(AttachError::NoSpace)
        ));
    }
}
