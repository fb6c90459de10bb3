//! Error taxonomy for the RTD2142 ISP protocol engine.
//!
//! Variants mirror the taxonomy the host side of the plugin interface
//! expects (see distilled spec §6/§7): most map directly onto a single
//! `FWUPD_ERROR_*`-shaped case, plus a transparent I/O variant for
//! transport-level failures.

/// Failures surfaced by the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device, bus, or requested operation is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// An otherwise-unclassified internal failure (bad precondition, bad
    /// argument, protocol desync).
    #[error("internal error: {0}")]
    Internal(String),

    /// A write to the device succeeded but its effect could not be
    /// confirmed, or a post-write verify found mismatched data.
    #[error("write error: {0}")]
    Write(String),

    /// The device needs a physical power cycle or other user action to
    /// recover (it failed to leave ISP mode on request).
    #[error("needs user action: {0}")]
    NeedsUserAction(String),

    /// An I/O failure from the underlying transport (I²C bus, udev, GPIO),
    /// or a register poll that timed out.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
