//! `scan_peb`: classify a single PEB and fold it into an `AttachInfo`.
//!
//! Grounded on the Linux kernel's `drivers/mtd/ubi/attach.c:scan_peb()`:
//! the branch structure below (EC outcome, then VID outcome, then
//! internal-volume dispatch, then the arbiter) follows it step for
//! step, adapted to return a `Result` instead of mutating a shared
//! error pointer.

use log::warn;

use crate::arbiter;
use crate::config::DeviceGeometry;
use crate::corruption::{classify_corruption, Verdict};
use crate::error::{AttachError, AttachResult};
use crate::io::{DataReadOutcome, FlashIo, HdrOutcome};
use crate::layout::{Compat, VidHeader, MAX_EC};
use crate::model::{AttachInfo, PebHandle};

/// Per-device sticky state the classifier needs across calls, held by
/// the driver and threaded through one PEB at a time.
#[derive(Debug, Default)]
pub struct ScanState {
    pub image_seq: Option<u32>,
    pub read_only: bool,
}

/// Classifies PEB `pnum` and folds the result into `ai`. Mirrors
/// `scan_peb`'s contract: `Ok(())` on success (including every
/// non-fatal media outcome, which is recorded rather than raised),
/// `Err` only for an image-format violation.
pub fn scan_peb(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    state: &mut ScanState,
    ai: &mut AttachInfo,
    pnum: u32,
) -> AttachResult<()> {
    if io.is_bad(pnum)? {
        ai.bad_peb_count += 1;
        return Ok(());
    }

    let (ec_outcome, ec_hdr) = io.read_ec_hdr(pnum)?;

    // Set only when the EC header itself failed (`BadHdr`/`BadHdrEbadmsg`);
    // preserves which of the two so callers can tell an EBADMSG EC
    // failure apart from an ordinary bad header.
    let mut ec_err: Option<HdrOutcome> = None;
    let mut bitflips = false;

    let ec: Option<u64> = match ec_outcome {
        HdrOutcome::Ok | HdrOutcome::Bitflips => {
            let hdr = ec_hdr.expect("OK/BITFLIPS outcome always carries a header");
            if hdr.version != crate::layout::UBI_VERSION {
                return Err(AttachError::ImageFormat(format!(
                    "PEB {pnum}: unsupported UBI version {}",
                    hdr.version
                )));
            }
            if hdr.ec > MAX_EC {
                return Err(AttachError::ImageFormat(format!(
                    "PEB {pnum}: erase counter {} exceeds the 31-bit limit",
                    hdr.ec
                )));
            }
            match state.image_seq {
                None => state.image_seq = Some(hdr.image_seq),
                Some(seq) if hdr.image_seq != 0 && hdr.image_seq != seq => {
                    return Err(AttachError::ImageFormat(format!(
                        "PEB {pnum}: image_seq {} does not match device image_seq {seq}",
                        hdr.image_seq
                    )));
                }
                _ => {}
            }
            if ec_outcome == HdrOutcome::Bitflips {
                bitflips = true;
            }
            Some(hdr.ec)
        }
        HdrOutcome::Ff | HdrOutcome::FfBitflips => {
            ai.empty_peb_count += 1;
            let h = ai.alloc_peb(pnum, crate::model::UNKNOWN_EC);
            ai.push_erase(h);
            return Ok(());
        }
        HdrOutcome::BadHdr | HdrOutcome::BadHdrEbadmsg => {
            ec_err = Some(ec_outcome);
            bitflips = true;
            None
        }
    };

    let (vid_outcome, vid_hdr) = io.read_vid_hdr(pnum)?;

    match vid_outcome {
        HdrOutcome::Bitflips => bitflips = true,
        HdrOutcome::BadHdr | HdrOutcome::BadHdrEbadmsg => {
            if vid_outcome == HdrOutcome::BadHdrEbadmsg && ec_err == Some(HdrOutcome::BadHdrEbadmsg) {
                ai.maybe_bad_peb_count += 1;
            }
            if ec_err.is_some() {
                let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
                ai.push_erase(h);
                return Ok(());
            }
            let data = read_whole_peb_data(io, geo, pnum)?;
            match classify_corruption(&data) {
                Verdict::PowerCut => {
                    let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
                    if let Some(ec) = ec {
                        ai.record_ec(ec);
                    }
                    push_recoverable(ai, h);
                }
                Verdict::Unknown => {
                    warn!(
                        "PEB {pnum}: VID header corrupt, data not erased - \
                         preserving as unknown corruption"
                    );
                    let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
                    if let Some(ec) = ec {
                        ai.record_ec(ec);
                    }
                    ai.push_corrupt(h);
                }
            }
            return Ok(());
        }
        HdrOutcome::Ff => {
            let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
            if ec_err.is_some() || bitflips {
                ai.peb_mut(h).scrub = true;
                ai.push_erase_front(h);
            } else {
                ai.push_free(h);
            }
            if let Some(ec) = ec {
                ai.record_ec(ec);
            }
            return Ok(());
        }
        HdrOutcome::FfBitflips => {
            let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
            ai.peb_mut(h).scrub = true;
            ai.push_erase_front(h);
            return Ok(());
        }
        HdrOutcome::Ok => {}
    }

    let vid = vid_hdr.expect("remaining outcomes always carry a header");

    if geo.is_internal_volume(vid.vol_id) {
        match vid.compat {
            Compat::Delete => {
                let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
                ai.push_erase(h);
                return Ok(());
            }
            Compat::ReadOnly => {
                state.read_only = true;
            }
            Compat::Preserve => {
                let h = ai.alloc_peb(pnum, ec.unwrap_or(crate::model::UNKNOWN_EC));
                ai.push_alien(h);
                return Ok(());
            }
            Compat::Reject => {
                return Err(AttachError::ImageFormat(format!(
                    "PEB {pnum}: internal volume {} has incompatible REJECT compat flag",
                    vid.vol_id
                )));
            }
            Compat::None => {}
        }
    }

    arbiter::admit(io, geo, ai, pnum, ec.unwrap_or(crate::model::UNKNOWN_EC), &vid, bitflips)?;
    if let Some(ec) = ec {
        ai.record_ec(ec);
    }
    Ok(())
}

/// `waiting` exists for the `backup-recovery` feature; without it,
/// power-cut-corrupted PEBs with a damaged VID header simply go
/// straight to `erase`.
fn push_recoverable(ai: &mut AttachInfo, h: PebHandle) {
    if cfg!(feature = "backup-recovery") {
        ai.waiting.push_back(h);
    } else {
        ai.push_erase(h);
    }
}

fn read_whole_peb_data(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    pnum: u32,
) -> AttachResult<DataReadOutcome> {
    let len = geo.peb_size - geo.data_offset;
    Ok(io.read_data(pnum, geo.data_offset, len)?)
}

/// Re-reads and re-validates the VID header that currently backs a
/// PEB in the middle of arbitration; used by `compare_lebs` when the
/// "old" side of a conflict needs a fresh CRC check.
pub(crate) fn reread_vid_hdr(io: &mut dyn FlashIo, pnum: u32) -> AttachResult<VidHeader> {
    let (outcome, hdr) = io.read_vid_hdr(pnum)?;
    match outcome {
        HdrOutcome::Ok | HdrOutcome::Bitflips => Ok(hdr.expect("checked above")),
        other => Err(AttachError::ImageFormat(format!(
            "PEB {pnum}: VID header became unreadable during re-check ({other:?})"
        ))),
    }
}
