//! Post-attach consistency check: walks the finished `AttachInfo` and
//! re-verifies every invariant, re-reading flash where the
//! cached `PebInfo` could have drifted from what is actually out
//! there. Gated behind the `self-check` Cargo feature, mirroring the
//! kernel's `ubi_dbg_chk_gen` debug gate; enabled by default in this
//! crate since the extra flash re-reads are cheap next to attach
//! itself and the test suite leans on it.
//!
//! Grounded on `attach.c:self_check_ai()`.

use std::collections::HashSet;

use crate::config::DeviceGeometry;
use crate::error::{AttachError, AttachResult};
use crate::io::{FlashIo, HdrOutcome};
use crate::layout::VolType;
use crate::model::AttachInfo;

pub fn check(io: &mut dyn FlashIo, ai: &AttachInfo, geo: &DeviceGeometry) -> AttachResult<()> {
    let peb_count = io.peb_count();
    let mut seen = HashSet::new();

    if ai.vols_found as usize != ai.volumes.len() {
        return Err(bad(format!(
            "vols_found {} does not match volume tree size {}",
            ai.vols_found,
            ai.volumes.len()
        )));
    }

    for (vol_id, av) in &ai.volumes {
        match av.vol_type {
            VolType::Static => {
                if av.leb_count as u64 != av.used.len() as u64 {
                    return Err(bad(format!(
                        "volume {vol_id}: leb_count {} does not match used-tree size {}",
                        av.leb_count,
                        av.used.len()
                    )));
                }
            }
            VolType::Dynamic => {
                if av.used_ebs != 0 {
                    return Err(bad(format!(
                        "volume {vol_id}: dynamic volume declares used_ebs={}",
                        av.used_ebs
                    )));
                }
            }
        }
        if let Some(&highest) = av.used.keys().next_back() {
            if highest != av.highest_lnum {
                return Err(bad(format!(
                    "volume {vol_id}: highest_lnum {} does not match tree maximum {highest}",
                    av.highest_lnum
                )));
            }
        }

        for (&lnum, &handle) in &av.used {
            if av.vol_type == VolType::Static && lnum >= av.used_ebs {
                return Err(bad(format!(
                    "volume {vol_id}: bad lnum or used_ebs (lnum={lnum}, used_ebs={})",
                    av.used_ebs
                )));
            }

            let p = ai.peb(handle);
            if p.pnum >= peb_count {
                return Err(bad(format!("pnum {} out of range", p.pnum)));
            }
            if let (Some(min), Some(max)) = (ai.min_ec, ai.max_ec) {
                if p.ec < min || p.ec > max {
                    return Err(bad(format!(
                        "pnum {}: ec {} outside [{min}, {max}]",
                        p.pnum, p.ec
                    )));
                }
            }
            if !seen.insert(p.pnum) {
                return Err(bad(format!("pnum {} referenced more than once", p.pnum)));
            }

            let (outcome, hdr) = io.read_vid_hdr(p.pnum)?;
            match outcome {
                HdrOutcome::Ok | HdrOutcome::Bitflips => {
                    let hdr = hdr.expect("checked above");
                    if hdr.sqnum != p.sqnum
                        || hdr.vol_id != *vol_id
                        || hdr.lnum != lnum
                        || hdr.used_ebs != av.used_ebs
                        || hdr.data_pad != av.data_pad
                        || hdr.compat != av.compat
                        || hdr.vol_type != av.vol_type
                    {
                        return Err(bad(format!(
                            "pnum {}: on-flash VID header no longer matches the stored PebInfo",
                            p.pnum
                        )));
                    }
                }
                other => {
                    return Err(bad(format!(
                        "pnum {}: VID header unreadable during self-check ({other:?})",
                        p.pnum
                    )));
                }
            }
        }
    }

    for &h in ai.free.iter().chain(ai.erase.iter()).chain(ai.corr.iter()).chain(ai.alien.iter()) {
        let p = ai.peb(h);
        if p.pnum >= peb_count {
            return Err(bad(format!("pnum {} out of range", p.pnum)));
        }
        if !seen.insert(p.pnum) {
            return Err(bad(format!("pnum {} referenced more than once", p.pnum)));
        }
    }

    let _ = geo;
    Ok(())
}

fn bad(msg: String) -> AttachError {
    AttachError::ImageFormat(format!("self-check failed: {msg}"))
}
