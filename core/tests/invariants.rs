//! Property tests for the whole-device invariants of §3/§8, driven by
//! proptest over randomly generated single-volume images.

use std::collections::BTreeSet;

use proptest::prelude::*;
use ubiattach_core::{attach, AttachOptions, DeviceGeometry, FileBackedIo, VolType};

fn geo() -> DeviceGeometry {
    DeviceGeometry {
        peb_size: 4096,
        min_io_size: 512,
        vid_hdr_offset: 512,
        data_offset: 1024,
        ..DeviceGeometry::default()
    }
}

/// Builds a device with `leb_ecs.len()` PEBs holding sequential LEBs
/// 0..n of volume 0, each stamped with the given erase counter and a
/// strictly increasing sqnum, followed by `extra_blank` fully erased
/// trailing PEBs.
fn build_device(leb_ecs: &[u64], extra_blank: u32) -> (FileBackedIo, DeviceGeometry, u32) {
    let geo = geo();
    let total = leb_ecs.len() as u32 + extra_blank;
    let mut io = FileBackedIo::blank(geo, total);
    for (lnum, &ec) in leb_ecs.iter().enumerate() {
        let pnum = lnum as u32;
        io.stamp_ec_header(pnum, ec, 0x1000_0001);
        io.stamp_vid_header(
            pnum,
            0,
            pnum,
            1 + lnum as u64,
            VolType::Dynamic,
            false,
            0,
            0,
            b"payload",
        );
    }
    (io, geo, total)
}

proptest! {
    /// Invariant 1 (§8): at successful attach, every PEB's pnum is
    /// accounted for exactly once across every volume's used tree and
    /// every list.
    #[test]
    fn every_pnum_accounted_for_exactly_once(
        ecs in prop::collection::vec(0u64..1000, 0..12),
        extra_blank in 0u32..12,
    ) {
        let (mut io, geo, total) = build_device(&ecs, extra_blank);
        let ai = attach(&mut io, &geo, &AttachOptions::default(), |_| {}).unwrap();

        let mut seen = BTreeSet::new();
        for av in ai.volumes.values() {
            for &h in av.used.values() {
                prop_assert!(seen.insert(ai.peb(h).pnum), "pnum referenced twice");
            }
        }
        for &h in ai.free.iter().chain(ai.erase.iter()).chain(ai.corr.iter()).chain(ai.alien.iter()) {
            prop_assert!(seen.insert(ai.peb(h).pnum), "pnum referenced twice");
        }

        let expected: BTreeSet<u32> = (0..total).collect();
        prop_assert_eq!(seen, expected);
    }

    /// Invariant 4 (§8): once fill-in completes, every PEB's ec lies
    /// within [min_ec, max_ec].
    #[test]
    fn every_ec_within_min_max_after_fill_in(
        ecs in prop::collection::vec(1u64..1000, 1..12),
        extra_blank in 0u32..8,
    ) {
        let (mut io, geo, _total) = build_device(&ecs, extra_blank);
        let ai = attach(&mut io, &geo, &AttachOptions::default(), |_| {}).unwrap();

        let (min, max) = (ai.min_ec.unwrap(), ai.max_ec.unwrap());
        for av in ai.volumes.values() {
            for &h in av.used.values() {
                let ec = ai.peb(h).ec;
                prop_assert!(ec >= min && ec <= max);
            }
        }
        for &h in ai.free.iter().chain(ai.erase.iter()) {
            let ec = ai.peb(h).ec;
            prop_assert!(ec >= min && ec <= max);
        }
    }

    /// §3 invariant 3: max_sqnum is at least as large as every
    /// admitted PEB's sqnum.
    #[test]
    fn max_sqnum_dominates_every_admitted_peb(
        ecs in prop::collection::vec(1u64..1000, 1..12),
    ) {
        let (mut io, geo, _total) = build_device(&ecs, 0);
        let ai = attach(&mut io, &geo, &AttachOptions::default(), |_| {}).unwrap();

        for av in ai.volumes.values() {
            for &h in av.used.values() {
                prop_assert!(ai.peb(h).sqnum <= ai.maxsqnum);
            }
        }
    }
}
