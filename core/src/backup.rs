//! Paired-page backup recovery: on NAND where programming a high
//! page can corrupt its already-written paired low page, UBI keeps a
//! two-LEB shadow volume holding a pre-image of every page about to be
//! paired. On attach, replay that shadow log against any source page
//! that reads back broken.
//!
//! The on-flash record format for the shadow log is not specified
//! upstream of this subsystem (unlike the EC/VID headers) - this
//! module defines one: each record is a 16-byte header
//! (`target_pnum: u32`, `page_index: u32`, `sqnum: u64`, all
//! big-endian) immediately followed by one `min_io_size`-byte page
//! image. Records are appended back-to-back; an all-`0xFF` header
//! marks the append cursor, located at whole-record granularity since
//! this crate's `FlashIo` has no sub-page read primitive.
//!
//! Gated behind the `backup-recovery` Cargo feature. Hardware-specific
//! and delicate: mirrors the observed upstream asymmetry (a source
//! page that is itself all-`0xFF` is treated as recoverable with no
//! further corroboration) rather than reinterpreting it.

use std::collections::HashMap;

use log::warn;

use crate::allocator::early_get_peb;
use crate::config::DeviceGeometry;
use crate::error::AttachResult;
use crate::io::{DataReadOutcome, FlashIo};
use crate::layout::{crc32, EcHeader, VidHeader};
use crate::model::AttachInfo;

const RECORD_HEADER_LEN: usize = 16;

struct ShadowRecord {
    target_pnum: u32,
    page_index: u32,
    sqnum: u64,
    page: Vec<u8>,
}

fn parse_shadow_leb(data: &[u8], page_size: u32) -> Vec<ShadowRecord> {
    let stride = RECORD_HEADER_LEN + page_size as usize;
    let mut out = Vec::new();
    for chunk in data.chunks(stride) {
        if chunk.len() < stride {
            break;
        }
        let header = &chunk[0..RECORD_HEADER_LEN];
        if header.iter().all(|&b| b == 0xFF) {
            break; // append cursor: nothing written past here
        }
        out.push(ShadowRecord {
            target_pnum: u32::from_be_bytes(header[0..4].try_into().unwrap()),
            page_index: u32::from_be_bytes(header[4..8].try_into().unwrap()),
            sqnum: u64::from_be_bytes(header[8..16].try_into().unwrap()),
            page: chunk[RECORD_HEADER_LEN..stride].to_vec(),
        });
    }
    out
}

/// Locates which volume/lnum currently holds `pnum`, if any.
fn find_by_pnum(ai: &AttachInfo, pnum: u32) -> Option<(i32, u32)> {
    for (&vol_id, av) in &ai.volumes {
        for (&lnum, &h) in &av.used {
            if ai.peb(h).pnum == pnum {
                return Some((vol_id, lnum));
            }
        }
    }
    None
}

/// Runs the full recovery pass. Leaves already-sound
/// PEBs untouched; PEBs it cannot recover stay exactly as the scanner
/// left them (a source read failure with no corroborating backup is
/// not this module's problem to solve).
pub fn recover(io: &mut dyn FlashIo, geo: &DeviceGeometry, ai: &mut AttachInfo) -> AttachResult<()> {
    let Some(backup_av) = ai.volumes.get(&geo.backup_vol_id) else {
        return Ok(());
    };

    let mut shadow_pnums = Vec::new();
    for &h in backup_av.used.values() {
        shadow_pnums.push(ai.peb(h).pnum);
    }

    let page_size = geo.min_io_size;
    let mut records = Vec::new();
    for pnum in shadow_pnums {
        let len = geo.peb_size - geo.data_offset;
        if let DataReadOutcome::Ok(buf) | DataReadOutcome::Bitflips(buf) =
            io.read_data(pnum, geo.data_offset, len)?
        {
            records.extend(parse_shadow_leb(&buf, page_size));
        }
    }

    // Newest record per (target_pnum, page_index) wins when the same
    // page was shadowed twice.
    let mut newest: HashMap<(u32, u32), ShadowRecord> = HashMap::new();
    for rec in records {
        let key = (rec.target_pnum, rec.page_index);
        match newest.get(&key) {
            Some(existing) if existing.sqnum >= rec.sqnum => {}
            _ => {
                newest.insert(key, rec);
            }
        }
    }
    let mut ordered: Vec<ShadowRecord> = newest.into_values().collect();
    ordered.sort_by(|a, b| b.sqnum.cmp(&a.sqnum));

    for rec in ordered {
        let source_offset = geo.data_offset + rec.page_index * page_size;
        let source_read = io.read_data(rec.target_pnum, source_offset, page_size)?;
        let needs_recovery = matches!(source_read, DataReadOutcome::EccError);
        if !needs_recovery {
            continue;
        }

        let Some((vol_id, lnum)) = find_by_pnum(ai, rec.target_pnum) else {
            warn!(
                "backup recovery: shadow record for pnum {} has no matching LEB, skipping",
                rec.target_pnum
            );
            continue;
        };

        let len = geo.peb_size - geo.data_offset;
        let mut leb_data = match io.read_data(rec.target_pnum, geo.data_offset, len)? {
            DataReadOutcome::Ok(buf) | DataReadOutcome::Bitflips(buf) => buf,
            DataReadOutcome::EccError => vec![0xFFu8; len as usize],
        };
        let page_start = (rec.page_index * page_size) as usize;
        let page_end = page_start + page_size as usize;
        if page_end > leb_data.len() {
            leb_data.resize(page_end, 0xFF);
        }
        leb_data[page_start..page_end].copy_from_slice(&rec.page);
        let new_crc = crc32(&leb_data);

        let new_handle = match early_get_peb(io, geo, ai) {
            Ok(h) => h,
            Err(_) => {
                warn!("backup recovery: no spare PEB to recover pnum {}", rec.target_pnum);
                continue;
            }
        };
        let new_pnum = ai.peb(new_handle).pnum;
        let new_ec = ai.peb(new_handle).ec;

        let ec_hdr = EcHeader {
            version: crate::layout::UBI_VERSION,
            ec: new_ec,
            vid_hdr_offset: geo.vid_hdr_offset,
            data_offset: geo.data_offset,
            image_seq: ai.image_seq,
        };
        let vid_hdr = VidHeader {
            version: crate::layout::UBI_VERSION,
            vol_type: crate::layout::VolType::Dynamic,
            copy_flag: false,
            compat: crate::layout::Compat::None,
            vol_id,
            lnum,
            data_size: leb_data.len() as u32,
            used_ebs: 0,
            data_pad: 0,
            data_crc: new_crc,
            sqnum: ai.maxsqnum + 1,
        };
        ai.maxsqnum += 1;
        io.write_ec_hdr(new_pnum, &ec_hdr)?;
        io.write_vid_hdr(new_pnum, &vid_hdr)?;
        io.write_data(new_pnum, geo.data_offset, &leb_data)?;

        if let Some(av) = ai.volumes.get_mut(&vol_id) {
            if let Some(old_handle) = av.used.insert(lnum, new_handle) {
                ai.push_erase(old_handle);
            }
        }
        let p = ai.peb_mut(new_handle);
        p.vol_id = vol_id;
        p.lnum = lnum;
        p.sqnum = vid_hdr.sqnum;
        p.copy_flag = false;
    }

    Ok(())
}
