use std::path::PathBuf;

use thiserror::Error;

/// Startup and configuration failures. These end the process.
#[derive(Debug, Error)]
pub enum EmuError {
    #[error("bank count must be 1-{max}, got {count}")]
    InvalidBankCount { count: usize, max: usize },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory image {} is malformed: {reason}", path.display())]
    BadImage { path: PathBuf, reason: String },

    #[error("MPM.SYS {} is malformed: {reason}", path.display())]
    BadSystemImage { path: PathBuf, reason: String },

    #[error("cannot boot: no disk mounted on drive A:")]
    NoBootDisk,

    #[error("failed to read boot sector: {0}")]
    BootSector(#[source] crate::disk::DiskError),

    #[error("failed to mount {} on drive {drive}: {source}", path.display())]
    Mount {
        drive: char,
        path: PathBuf,
        #[source]
        source: crate::disk::DiskError,
    },

    #[error("invalid disk specification '{0}' (expected A:FILE)")]
    DiskSpec(String),

    #[error("configuration: {0}")]
    Config(String),
}
