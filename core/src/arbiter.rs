//! LEB arbiter: admits a newly classified PEB into a volume's used
//! tree, resolving conflicts against whatever PEB currently holds that
//! LEB. Grounded on `attach.c:ubi_add_to_av()` and
//! `attach.c:ubi_compare_lebs()`.

use crate::classify::reread_vid_hdr;
use crate::config::DeviceGeometry;
use crate::error::{AttachError, AttachResult};
use crate::io::{DataReadOutcome, FlashIo};
use crate::layout::{crc32, VidHeader};
use crate::model::{AttachInfo, PebInfo};

/// Outcome of `compare_lebs`: which side wins, whether bit-flips were
/// seen reading the winner, and whether the final loser turned out to
/// be CRC-corrupted.
#[derive(Debug, Clone, Copy)]
pub struct CompareResult {
    pub second_is_newer: bool,
    pub bitflips: bool,
    pub corrupted: bool,
}

/// Decides which of an existing PEB (`a`) and a freshly scanned
/// candidate (`pnum_b`/`vid_b`) is the authoritative copy of their
/// shared LEB.
pub(crate) fn compare_lebs(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    a: &PebInfo,
    pnum_b: u32,
    vid_b: &VidHeader,
    bitflips_b: bool,
) -> AttachResult<CompareResult> {
    if a.sqnum == vid_b.sqnum {
        return Err(AttachError::ImageFormat(format!(
            "vol {} lnum {}: PEB {} and PEB {} both carry sqnum {} - image corrupted",
            vid_b.vol_id, vid_b.lnum, a.pnum, pnum_b, a.sqnum
        )));
    }

    let b_is_provisional_winner = vid_b.sqnum > a.sqnum;
    let winner_copy_flag = if b_is_provisional_winner {
        vid_b.copy_flag
    } else {
        a.copy_flag
    };

    if !winner_copy_flag {
        return Ok(CompareResult {
            second_is_newer: b_is_provisional_winner,
            bitflips: if b_is_provisional_winner {
                bitflips_b
            } else {
                a.scrub
            },
            corrupted: false,
        });
    }

    let (winner_pnum, winner_vid, winner_bitflips_sticky) = if b_is_provisional_winner {
        (pnum_b, vid_b.clone(), bitflips_b)
    } else {
        (a.pnum, reread_vid_hdr(io, a.pnum)?, a.scrub)
    };

    let read = io.read_data(winner_pnum, geo.data_offset, winner_vid.data_size)?;
    let (data, read_bitflips) = match read {
        DataReadOutcome::Ok(buf) => (buf, false),
        DataReadOutcome::Bitflips(buf) => (buf, true),
        DataReadOutcome::EccError => {
            return Ok(CompareResult {
                second_is_newer: !b_is_provisional_winner,
                bitflips: false,
                corrupted: true,
            });
        }
    };

    let bitflips = winner_bitflips_sticky || read_bitflips;
    if crc32(&data) == winner_vid.data_crc {
        Ok(CompareResult {
            second_is_newer: b_is_provisional_winner,
            bitflips,
            corrupted: false,
        })
    } else {
        Ok(CompareResult {
            second_is_newer: !b_is_provisional_winner,
            bitflips,
            corrupted: true,
        })
    }
}

/// Admits a freshly scanned, non-internal PEB into the attach info,
/// resolving a conflict against whatever currently occupies
/// `(vid.vol_id, vid.lnum)` if one exists.
pub fn admit(
    io: &mut dyn FlashIo,
    geo: &DeviceGeometry,
    ai: &mut AttachInfo,
    pnum: u32,
    ec: u64,
    vid: &VidHeader,
    bitflips: bool,
) -> AttachResult<()> {
    let existing = ai
        .volume(vid.vol_id)
        .and_then(|av| av.used.get(&vid.lnum).copied());
    let is_new_lnum = existing.is_none();

    {
        let av = ai.volume_entry(vid.vol_id, vid.vol_type, vid.used_ebs, vid.data_pad, vid.compat);
        if is_new_lnum
            && (av.vol_type != vid.vol_type
                || av.used_ebs != vid.used_ebs
                || av.data_pad != vid.data_pad)
        {
            return Err(AttachError::ImageFormat(format!(
                "PEB {pnum}: VID header inconsistent with volume {} (type/used_ebs/data_pad mismatch)",
                vid.vol_id
            )));
        }
    }
    ai.maxsqnum = ai.maxsqnum.max(vid.sqnum);

    match existing {
        None => {
            let h = ai.alloc_peb(pnum, ec);
            stamp(ai.peb_mut(h), vid, bitflips);
            ai.place_used(vid.vol_id, vid.lnum, h);
            update_last_data_size(ai, vid);
            Ok(())
        }
        Some(existing_handle) => {
            let snapshot = ai.peb(existing_handle).clone();
            let cmp = compare_lebs(io, geo, &snapshot, pnum, vid, bitflips)?;

            if cmp.second_is_newer {
                let consistent = {
                    let av = ai.volume(vid.vol_id).expect("volume exists for a conflict");
                    av.vol_type == vid.vol_type
                        && av.used_ebs == vid.used_ebs
                        && av.data_pad == vid.data_pad
                };
                if !consistent {
                    return Err(AttachError::ImageFormat(format!(
                        "PEB {pnum}: VID header inconsistent with volume {} while resolving a conflict",
                        vid.vol_id
                    )));
                }

                let old_handle = ai.alloc_peb(snapshot.pnum, snapshot.ec);
                {
                    let old = ai.peb_mut(old_handle);
                    old.vol_id = snapshot.vol_id;
                    old.lnum = snapshot.lnum;
                    old.sqnum = snapshot.sqnum;
                    old.copy_flag = snapshot.copy_flag;
                    old.scrub = snapshot.scrub;
                }
                if cmp.corrupted {
                    ai.push_erase_front(old_handle);
                } else {
                    ai.push_erase(old_handle);
                }

                let winner = ai.peb_mut(existing_handle);
                winner.pnum = pnum;
                winner.ec = ec;
                winner.vol_id = vid.vol_id;
                winner.lnum = vid.lnum;
                winner.sqnum = vid.sqnum;
                winner.copy_flag = vid.copy_flag;
                winner.scrub = cmp.bitflips || bitflips;
                update_last_data_size(ai, vid);
            } else {
                let h = ai.alloc_peb(pnum, ec);
                stamp(ai.peb_mut(h), vid, cmp.bitflips || bitflips);
                if cmp.corrupted {
                    ai.push_erase_front(h);
                } else {
                    ai.push_erase(h);
                }
            }
            Ok(())
        }
    }
}

fn stamp(p: &mut PebInfo, vid: &VidHeader, scrub: bool) {
    p.vol_id = vid.vol_id;
    p.lnum = vid.lnum;
    p.sqnum = vid.sqnum;
    p.copy_flag = vid.copy_flag;
    p.scrub = scrub;
}

fn update_last_data_size(ai: &mut AttachInfo, vid: &VidHeader) {
    if let Some(av) = ai.volumes.get_mut(&vid.vol_id) {
        if vid.lnum == av.highest_lnum {
            av.last_data_size = vid.data_size;
        }
    }
}
