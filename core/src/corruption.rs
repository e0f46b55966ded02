//! Corruption classifier: entered when a PEB's EC header read fine but
//! its VID header did not. Decides whether the PEB is safe to erase
//! (a wear-leveling write or erase that was interrupted by a power
//! cut) or must be preserved for inspection.
//!
//! Grounded on `attach.c:check_corruption()`.

use crate::io::DataReadOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Safe to erase: the data area is either unreadable (consistent
    /// with an erase that was interrupted) or entirely `0xFF`.
    PowerCut,
    /// The data area holds content that isn't an erase artifact; this
    /// PEB must be preserved and looked at by a human.
    Unknown,
}

/// Classifies a VID-corrupt PEB's data-area read.
pub fn classify_corruption(data: &DataReadOutcome) -> Verdict {
    match data {
        DataReadOutcome::EccError => Verdict::PowerCut,
        DataReadOutcome::Ok(buf) | DataReadOutcome::Bitflips(buf) => {
            if buf.iter().all(|&b| b == 0xFF) {
                Verdict::PowerCut
            } else {
                Verdict::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecc_error_is_power_cut() {
        assert_eq!(classify_corruption(&DataReadOutcome::EccError), Verdict::PowerCut);
    }

    #[test]
    fn all_ff_is_power_cut() {
        let buf = vec![0xFFu8; 64];
        assert_eq!(
            classify_corruption(&DataReadOutcome::Ok(buf)),
            Verdict::PowerCut
        );
    }

    #[test]
    fn nonzero_content_is_unknown() {
        let buf = vec![0xABu8; 64];
        assert_eq!(
            classify_corruption(&DataReadOutcome::Ok(buf)),
            Verdict::Unknown
        );
    }

    #[test]
    fn bitflips_variant_still_classified_by_content() {
        let mut buf = vec![0xFFu8; 64];
        buf[10] = 0xFE;
        assert_eq!(
            classify_corruption(&DataReadOutcome::Bitflips(buf)),
            Verdict::Unknown
        );
    }
}
