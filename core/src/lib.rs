//! Attach/scan core for a UBI-style flash layer: turns a raw sequence
//! of physical eraseblocks into a reconstructed volume table, with no
//! dependency on any particular transport or block device stack.
//!
//! The pipeline is `driver::attach` (or `driver::scan_all` for a plain
//! full scan): `classify::scan_peb` runs once per PEB, `arbiter::admit`
//! resolves conflicting copies of the same LEB as they appear, and
//! `driver::finish` runs the fixed post-scan pipeline (late analysis,
//! mean-EC fill-in, optional backup recovery, optional self-check).

pub mod allocator;
pub mod arbiter;
pub mod classify;
pub mod config;
pub mod corruption;
pub mod driver;
pub mod error;
pub mod io;
pub mod layout;
pub mod model;

#[cfg(feature = "backup-recovery")]
pub mod backup;
#[cfg(feature = "fastmap")]
pub mod fastmap;
#[cfg(feature = "self-check")]
pub mod selfcheck;

pub use allocator::early_get_peb;
pub use config::DeviceGeometry;
pub use driver::{attach, scan_all, AttachOptions};
pub use error::{AttachError, AttachResult};
pub use io::{DataReadOutcome, FileBackedIo, FlashIo, HdrOutcome};
pub use layout::{Compat, EcHeader, VidHeader, VolType};
pub use model::{AttachInfo, AttachVolume, PebHandle, PebInfo, UNKNOWN_EC};

#[cfg(feature = "fastmap")]
pub use fastmap::{FastAttachOutcome, FastmapParser};
