//! Error taxonomy for the attach/scan pipeline.

use thiserror::Error;

/// Errors that can abort an attach.
///
/// Non-fatal media events (bitflips, preserved corruption, read-only-mode
/// transitions) never produce one of these - they are logged and recorded
/// on the relevant `PebInfo`/counter instead. Only the cases enumerated
/// here stop the pipeline and leave no `AttachInfo` behind.
#[derive(Debug, Error)]
pub enum AttachError {
    /// The on-flash image violates a format rule this implementation
    /// cannot relax: version mismatch, erase-counter overflow, duplicate
    /// non-zero sequence number, inconsistent VID header, or an
    /// incompatible ("reject") internal volume.
    #[error("image format violation: {0}")]
    ImageFormat(String),

    /// No PEB was available where one was required (attach-time
    /// allocator exhaustion).
    #[error("no free physical eraseblocks available")]
    NoSpace,

    /// Boot-time policy refused to attach: too many preserved-corrupt
    /// PEBs, or media that looks neither blank nor UBI-formatted.
    #[error("refusing to attach: {0}")]
    RefusedToAttach(String),

    /// The flash I/O collaborator returned an error outside the
    /// documented bitflip/ECC outcomes.
    #[error("flash I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AttachResult<T> = Result<T, AttachError>;
