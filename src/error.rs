//! Fatal-initialisation error types.
//!
//! Transient conditions (spurious wakes, a missing schedstat file, CPU
//! migration during lock acquisition) are *not* represented here -- they're
//! handled inline where they happen. This type only covers the category
//! that must abort the process.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("failed to parse cpuset {0:?}")]
    BadCpuset(String),

    #[error("failed to detect CPU topology from sysfs")]
    TopologyDetect,

    #[error("failed to set CPU affinity: {0}")]
    Affinity(#[source] std::io::Error),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}")]
    Parse { path: PathBuf },

    #[error("failed to write json report to {path:?}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BenchError>;
