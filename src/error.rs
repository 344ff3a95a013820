//! # Partitioned Error Kinds
//!
//! Every fallible operation in cellstore returns `eyre::Result`, following
//! the crate-wide convention of contextual error messages built with
//! `ensure!`, `bail!` and `wrap_err`. The engine additionally partitions its
//! errors into the kinds below so that clients (and tests) can distinguish a
//! schema validation failure from a mid-stream VFS fault by downcasting the
//! report.
//!
//! `Overflowed` is deliberately absent: buffer overflow is a query
//! *status*, not an error.

use thiserror::Error;

/// Sub-reason carried by VFS errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsReason {
    NotFound,
    AlreadyExists,
    Io,
    UnsupportedScheme,
    InvalidUri,
    /// A fault injected by the in-memory test backend.
    Injected,
}

/// The partitioned error kinds of the engine.
///
/// Constructors return `eyre::Report` directly so call sites read like the
/// rest of the crate: `return Err(ErrorKind::query("..."))`.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("query interrupted: {0}")]
    Interrupted(String),
    #[error("storage manager error: {0}")]
    StorageManager(String),
    #[error("tile error: {0}")]
    Tile(String),
    #[error("vfs error ({reason:?}): {msg}")]
    Vfs { reason: VfsReason, msg: String },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("kv query error: {0}")]
    Kv(String),
}

impl ErrorKind {
    pub fn schema(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Schema(msg.into()).into()
    }

    pub fn query(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Query(msg.into()).into()
    }

    pub fn interrupted(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Interrupted(msg.into()).into()
    }

    pub fn storage_manager(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::StorageManager(msg.into()).into()
    }

    pub fn tile(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Tile(msg.into()).into()
    }

    pub fn vfs(reason: VfsReason, msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Vfs {
            reason,
            msg: msg.into(),
        }
        .into()
    }

    pub fn codec(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Codec(msg.into()).into()
    }

    pub fn kv(msg: impl Into<String>) -> eyre::Report {
        ErrorKind::Kv(msg.into()).into()
    }

    /// Extracts the kind from a report, if the report originated here.
    pub fn of(report: &eyre::Report) -> Option<&ErrorKind> {
        report.downcast_ref::<ErrorKind>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_downcast() {
        let report = ErrorKind::query("bad layout");
        match ErrorKind::of(&report) {
            Some(ErrorKind::Query(msg)) => assert_eq!(msg, "bad layout"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_vfs_error_carries_reason() {
        let report = ErrorKind::vfs(VfsReason::UnsupportedScheme, "hdfs://x");
        match ErrorKind::of(&report) {
            Some(ErrorKind::Vfs { reason, .. }) => {
                assert_eq!(*reason, VfsReason::UnsupportedScheme)
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_interrupted_is_its_own_kind() {
        let report = ErrorKind::interrupted("cancelled between tiles");
        assert!(matches!(
            ErrorKind::of(&report),
            Some(ErrorKind::Interrupted(_))
        ));
    }
}
