//! Whole-device driver: orchestrates `classify::scan_peb` across every
//! PEB, then runs the fixed post-scan pipeline (late analysis, mean-EC
//! fill-in, optional backup recovery, self-check).
//!
//! Grounded on `attach.c:scan_all()` and `attach.c:ubi_attach()`.

use std::ops::Range;

use rand::random;

use crate::classify::{scan_peb, ScanState};
use crate::config::DeviceGeometry;
use crate::error::{AttachError, AttachResult};
use crate::io::FlashIo;
use crate::model::AttachInfo;

#[cfg(feature = "fastmap")]
use crate::fastmap::{try_fast_attach, FastAttachOutcome, FastmapParser};

/// Attach-time knobs that are not part of the device geometry.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttachOptions {
    /// Skip the fastmap fast-attach path even if the `fastmap` feature
    /// is compiled in (mirrors the kernel's `UBI_MOUNT_NORMAL` vs
    /// `UBI_MOUNT_FASTMAP_FORCE_SCAN`).
    pub force_scan: bool,
}

/// Classifies every PEB in `range`, invoking `on_peb_boundary` once per
/// PEB as the cooperative yield point for a host scheduler.
pub(crate) fn scan_range(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    state: &mut ScanState,
    ai: &mut AttachInfo,
    range: Range<u32>,
    on_peb_boundary: &mut dyn FnMut(u32),
) -> AttachResult<()> {
    for pnum in range {
        scan_peb(io, geo, state, ai, pnum)?;
        on_peb_boundary(pnum);
    }
    Ok(())
}

/// Runs a full scan of `[0, io.peb_count())`, with no fastmap
/// involvement. Exposed directly for callers (and the `selftest` CLI
/// subcommand) that want to force a plain scan.
pub fn scan_all(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    mut on_peb_boundary: impl FnMut(u32),
) -> AttachResult<AttachInfo> {
    let mut ai = AttachInfo::new();
    let mut state = ScanState::default();
    let peb_count = io.peb_count();
    scan_range(io, geo, &mut state, &mut ai, 0..peb_count, &mut on_peb_boundary)?;
    finish(io, &mut ai, &mut state, geo)?;
    Ok(ai)
}

/// Full attach pipeline: scan (optionally via fastmap), late analysis,
/// mean-EC fill-in, self-check. Returns the completed `AttachInfo` or
/// the first fatal error encountered.
pub fn attach(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    opts: &AttachOptions,
    mut on_peb_boundary: impl FnMut(u32),
    #[cfg(feature = "fastmap")] fastmap_parser: Option<&mut FastmapParser<'_>>,
) -> AttachResult<AttachInfo> {
    geo.validate()?;

    let mut ai = AttachInfo::new();
    let mut state = ScanState::default();

    #[cfg(feature = "fastmap")]
    {
        if !opts.force_scan {
            if let Some(parser) = fastmap_parser {
                match try_fast_attach(io, geo, &mut state, &mut ai, parser)? {
                    FastAttachOutcome::Succeeded => {
                        finish(io, &mut ai, &mut state, geo)?;
                        return Ok(ai);
                    }
                    FastAttachOutcome::NoAnchor { scanned_to } => {
                        let peb_count = io.peb_count();
                        scan_range(
                            io,
                            geo,
                            &mut state,
                            &mut ai,
                            scanned_to..peb_count,
                            &mut on_peb_boundary,
                        )?;
                        finish(io, &mut ai, &mut state, geo)?;
                        return Ok(ai);
                    }
                    FastAttachOutcome::AnchorInvalid => {
                        // ai/state were reset by try_fast_attach; fall
                        // through to the plain full scan below.
                    }
                }
            }
        }
    }
    #[cfg(not(feature = "fastmap"))]
    let _ = opts;

    let peb_count = io.peb_count();
    scan_range(io, geo, &mut state, &mut ai, 0..peb_count, &mut on_peb_boundary)?;
    finish(io, &mut ai, &mut state, geo)?;
    Ok(ai)
}

/// Shared tail of every attach path: late analysis, fill-in, optional
/// backup recovery, self-check.
fn finish(
    io: &mut dyn FlashIo,
    ai: &mut AttachInfo,
    state: &mut ScanState,
    geo: &DeviceGeometry,
) -> AttachResult<()> {
    ai.read_only = state.read_only;
    late_analysis(ai, state, io.peb_count())?;
    ai.fill_in_unknown_ec();

    #[cfg(feature = "backup-recovery")]
    crate::backup::recover(io, geo, ai)?;

    for h in std::mem::take(&mut ai.waiting) {
        ai.push_erase(h);
    }

    #[cfg(feature = "self-check")]
    crate::selfcheck::check(io, ai, geo)?;
    #[cfg(not(feature = "self-check"))]
    let _ = (&io, &geo);

    Ok(())
}

/// Decide whether the device looks blank, is too damaged
/// to trust, or is a normal image worth proceeding with.
fn late_analysis(ai: &mut AttachInfo, state: &ScanState, peb_count: u32) -> AttachResult<()> {
    let usable = peb_count.saturating_sub(ai.bad_peb_count + ai.alien_peb_count);
    let corr_threshold = (usable / 20).max(8);

    if ai.corr_peb_count >= corr_threshold {
        return Err(AttachError::RefusedToAttach(format!(
            "too many corrupted PEBs ({} of {usable} usable)",
            ai.corr_peb_count
        )));
    }

    if ai.empty_peb_count + ai.maybe_bad_peb_count == usable {
        if ai.maybe_bad_peb_count <= 2 {
            ai.is_empty = true;
            ai.image_seq = random();
        } else {
            return Err(AttachError::RefusedToAttach(
                "media looks blank but too many PEBs have an uncertain status".into(),
            ));
        }
    } else {
        ai.image_seq = state.image_seq.unwrap_or(0);
    }

    Ok(())
}
