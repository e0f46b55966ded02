//! Fast-attach interaction: scan only the anchor region first, and let
//! a caller-supplied parser attempt to reconstruct the attach info from
//! it. Gated behind the `fastmap` Cargo feature.
//!
//! The on-flash fastmap layout itself is not specified by this
//! subsystem - this module only implements the anchor
//! discovery rule and the fall-back-to-full-scan policy around
//! whatever the caller's parser does.

use crate::classify::ScanState;
use crate::config::DeviceGeometry;
use crate::driver::scan_range;
use crate::error::AttachResult;
use crate::io::FlashIo;
use crate::model::AttachInfo;

/// Parses a fastmap found at `anchor_pnum`, populating `ai` with the
/// volumes/PEB placements it describes. Returns `true` on a usable
/// fastmap, `false` if the anchor's fastmap was invalid or stale.
pub type FastmapParser<'a> = dyn FnMut(&mut AttachInfo, &mut dyn FlashIo, u32) -> bool + 'a;

/// Attempts the fast-attach path. On success, `ai` is fully populated
/// and the caller must not run a full scan. On failure, `ai` holds
/// only the `[0, fm_max_start)` PEBs that were classified along the
/// way (or is empty, if the anchor was present but invalid and a full
/// restart is required) and the caller must scan the remaining range
/// it is told about.
pub fn try_fast_attach(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    state: &mut ScanState,
    ai: &mut AttachInfo,
    parser: &mut FastmapParser<'_>,
) -> AttachResult<FastAttachOutcome> {
    let scan_end = geo.fm_max_start.min(io.peb_count());
    scan_range(io, geo, state, ai, 0..scan_end, &mut |_| {})?;

    let best_handle = ai
        .volume(geo.fastmap_sb_vol_id)
        .and_then(|av| av.used.values().copied().max_by_key(|h| ai.peb(*h).sqnum));

    let Some(anchor_pnum) = best_handle.map(|h| ai.peb(h).pnum) else {
        return Ok(FastAttachOutcome::NoAnchor { scanned_to: scan_end });
    };

    if parser(ai, io, anchor_pnum) {
        Ok(FastAttachOutcome::Succeeded)
    } else {
        *ai = AttachInfo::new();
        *state = ScanState::default();
        Ok(FastAttachOutcome::AnchorInvalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastAttachOutcome {
    /// The parser accepted the fastmap at the anchor; attach info is
    /// complete.
    Succeeded,
    /// No fastmap superblock PEB was found in `[0, fm_max_start)`;
    /// scan `[scanned_to, peb_count)` to complete the attach.
    NoAnchor { scanned_to: u32 },
    /// An anchor existed but its fastmap did not parse; attach info
    /// was reset and the caller must scan `[0, peb_count)`.
    AnchorInvalid,
}
