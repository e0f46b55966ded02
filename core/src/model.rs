//! The attach-time data model: the PEB arena and the running
//! `AttachInfo` that the scan builds up one PEB at a time.
//!
//! The reference implementation keeps every `ubi_ainf_peb` in a
//! `kmem_cache` and lets it live in either a list or a red-black tree
//! via a union, depending on which of `free`/`erase`/`corr`/`alien`/a
//! volume's `used` tree currently owns it. Rust has no portable
//! intrusive list, so this core uses a flat arena (`Vec<PebInfo>`)
//! indexed by `PebHandle`, and each owning container holds handles
//! instead of nodes. `used` trees are `BTreeMap<u32, PebHandle>` keyed
//! by `lnum` so in-order iteration falls out for free; the four plain
//! lists are `VecDeque<PebHandle>` so head/tail insertion still matches
//! `list_add`/`list_add_tail`.

use std::collections::{BTreeMap, VecDeque};

use crate::layout::{Compat, VolType};

/// Sentinel stored in `PebInfo::ec` for a PEB whose erase counter could
/// not be trusted (missing or corrupt EC header). Cleared by
/// `AttachInfo::fill_in_unknown_ec` once the mean is known. `0` is a
/// legitimate erase count (a never-erased PEB), so it cannot double as
/// this sentinel the way the kernel's signed `-1` does.
pub const UNKNOWN_EC: u64 = u64::MAX;

/// Index into an `AttachInfo`'s PEB arena. Stable for the lifetime of
/// the `AttachInfo` that produced it; never reused across a different
/// `AttachInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PebHandle(pub u32);

/// Per-PEB attach-time bookkeeping.
///
/// `vol_id`/`lnum`/`sqnum`/`copy_flag` are only meaningful for a PEB
/// that carries a valid VID header (i.e. one that lives in some
/// volume's `used` tree); PEBs in `free`/`erase`/`corr`/`alien` leave
/// them at their default values.
#[derive(Debug, Clone)]
pub struct PebInfo {
    pub pnum: u32,
    pub ec: u64,
    pub vol_id: i32,
    pub lnum: u32,
    pub sqnum: u64,
    pub copy_flag: bool,
    /// Set when a non-fatal read problem (bitflips, or a fixed-up
    /// header) means this PEB should be re-written at the next
    /// opportunity rather than trusted indefinitely.
    pub scrub: bool,
}

impl PebInfo {
    fn bare(pnum: u32, ec: u64) -> Self {
        PebInfo {
            pnum,
            ec,
            vol_id: -1,
            lnum: 0,
            sqnum: 0,
            copy_flag: false,
            scrub: false,
        }
    }
}

/// One volume as reconstructed from the PEBs that carry its VID
/// headers. Analogous to `struct ubi_ainf_volume`.
#[derive(Debug, Clone)]
pub struct AttachVolume {
    pub vol_id: i32,
    pub highest_lnum: u32,
    pub leb_count: u32,
    pub vol_type: VolType,
    pub used_ebs: u32,
    pub last_data_size: u32,
    pub data_pad: u32,
    pub compat: Compat,
    /// `lnum -> PEB` for every LEB of this volume seen so far, in
    /// ascending `lnum` order.
    pub used: BTreeMap<u32, PebHandle>,
}

impl AttachVolume {
    fn new(vol_id: i32, vol_type: VolType, used_ebs: u32, data_pad: u32, compat: Compat) -> Self {
        AttachVolume {
            vol_id,
            highest_lnum: 0,
            leb_count: 0,
            vol_type,
            used_ebs,
            last_data_size: 0,
            data_pad,
            compat,
            used: BTreeMap::new(),
        }
    }
}

/// The full result of scanning a device: every volume found, every PEB
/// classified, and the running counters the attach process needs to
/// make its final decisions. Analogous to `struct ubi_attach_info`.
#[derive(Debug, Clone)]
pub struct AttachInfo {
    arena: Vec<PebInfo>,
    pub volumes: BTreeMap<i32, AttachVolume>,
    pub free: VecDeque<PebHandle>,
    pub erase: VecDeque<PebHandle>,
    pub corr: VecDeque<PebHandle>,
    pub alien: VecDeque<PebHandle>,
    /// PEBs fastmap has provisionally placed but that still need a
    /// full scan pass before they can be trusted; drained back into
    /// `free`/`erase`/a volume's `used` tree by `driver::scan_all`'s
    /// fallback path. Empty outside the `fastmap` feature.
    pub waiting: VecDeque<PebHandle>,
    pub corr_peb_count: u32,
    pub bad_peb_count: u32,
    pub alien_peb_count: u32,
    pub empty_peb_count: u32,
    pub maybe_bad_peb_count: u32,
    pub vols_found: u32,
    pub is_empty: bool,
    pub read_only: bool,
    /// Device-wide image sequence number, either read from flash or,
    /// for blank media, freshly randomized by `driver::late_analysis`.
    pub image_seq: u32,
    pub maxsqnum: u64,
    pub max_vol_id: i32,
    ec_sum: u128,
    ec_count: u64,
    pub min_ec: Option<u64>,
    pub max_ec: Option<u64>,
}

impl Default for AttachInfo {
    fn default() -> Self {
        AttachInfo {
            arena: Vec::new(),
            volumes: BTreeMap::new(),
            free: VecDeque::new(),
            erase: VecDeque::new(),
            corr: VecDeque::new(),
            alien: VecDeque::new(),
            waiting: VecDeque::new(),
            corr_peb_count: 0,
            bad_peb_count: 0,
            alien_peb_count: 0,
            empty_peb_count: 0,
            maybe_bad_peb_count: 0,
            vols_found: 0,
            is_empty: false,
            read_only: false,
            image_seq: 0,
            maxsqnum: 0,
            max_vol_id: -1,
            ec_sum: 0,
            ec_count: 0,
            min_ec: None,
            max_ec: None,
        }
    }
}

impl AttachInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peb(&self, h: PebHandle) -> &PebInfo {
        &self.arena[h.0 as usize]
    }

    pub fn peb_mut(&mut self, h: PebHandle) -> &mut PebInfo {
        &mut self.arena[h.0 as usize]
    }

    pub fn record_ec(&mut self, ec: u64) {
        self.ec_sum += ec as u128;
        self.ec_count += 1;
        self.min_ec = Some(self.min_ec.map_or(ec, |m| m.min(ec)));
        self.max_ec = Some(self.max_ec.map_or(ec, |m| m.max(ec)));
    }

    /// Mean erase counter across every PEB with a known EC, rounded
    /// down; used to seed PEBs whose EC could not be trusted.
    pub fn mean_ec(&self) -> u64 {
        if self.ec_count == 0 {
            0
        } else {
            (self.ec_sum / self.ec_count as u128) as u64
        }
    }

    /// Assigns `mean_ec()` to every PEB still carrying `UNKNOWN_EC`,
    /// then folds those PEBs into the erase-counter statistics. Must
    /// run only after every PEB has been classified.
    pub fn fill_in_unknown_ec(&mut self) {
        let mean = self.mean_ec();
        for slot in self.arena.iter_mut() {
            if slot.ec == UNKNOWN_EC {
                slot.ec = mean;
            }
        }
        self.min_ec = Some(self.min_ec.map_or(mean, |m| m.min(mean)));
        self.max_ec = Some(self.max_ec.map_or(mean, |m| m.max(mean)));
    }

    /// Allocates a new arena slot for a freshly scanned PEB and
    /// returns its handle. Does not place it in any container.
    pub fn alloc_peb(&mut self, pnum: u32, ec: u64) -> PebHandle {
        let handle = PebHandle(self.arena.len() as u32);
        self.arena.push(PebInfo::bare(pnum, ec));
        handle
    }

    pub fn push_free(&mut self, h: PebHandle) {
        self.free.push_back(h);
    }

    pub fn push_erase(&mut self, h: PebHandle) {
        self.erase.push_back(h);
    }

    /// Same as `push_erase` but placed at the head - used for PEBs
    /// whose copy is already known to be suspect, so an attach-time
    /// allocator scanning `erase` front-to-back reclaims them first.
    pub fn push_erase_front(&mut self, h: PebHandle) {
        self.erase.push_front(h);
    }

    pub fn push_corrupt(&mut self, h: PebHandle) {
        self.corr_peb_count += 1;
        self.corr.push_back(h);
    }

    pub fn push_alien(&mut self, h: PebHandle) {
        self.alien_peb_count += 1;
        self.alien.push_back(h);
    }

    /// Finds the volume record for `vol_id`, creating it if this is
    /// the first PEB seen for it.
    pub fn volume_entry(
        &mut self,
        vol_id: i32,
        vol_type: VolType,
        used_ebs: u32,
        data_pad: u32,
        compat: Compat,
    ) -> &mut AttachVolume {
        self.max_vol_id = self.max_vol_id.max(vol_id);
        let vols_found = &mut self.vols_found;
        self.volumes.entry(vol_id).or_insert_with(|| {
            *vols_found += 1;
            AttachVolume::new(vol_id, vol_type, used_ebs, data_pad, compat)
        })
    }

    pub fn volume(&self, vol_id: i32) -> Option<&AttachVolume> {
        self.volumes.get(&vol_id)
    }

    /// Places `h` as `lnum` of `vol_id`'s used tree, returning the PEB
    /// handle it displaced, if any (the caller still needs to decide
    /// what happens to the displaced one - see `crate::arbiter`).
    pub fn place_used(&mut self, vol_id: i32, lnum: u32, h: PebHandle) -> Option<PebHandle> {
        let av = self
            .volumes
            .get_mut(&vol_id)
            .expect("volume must exist before placing a used PEB");
        let prev = av.used.insert(lnum, h);
        if prev.is_none() {
            av.leb_count += 1;
        }
        if lnum >= av.highest_lnum || av.used.len() == 1 {
            av.highest_lnum = lnum;
        }
        prev
    }

    pub fn total_pebs(&self) -> u32 {
        self.arena.len() as u32
    }
}
