// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error values for the channel engine. Errors are plain values propagated
// with `?`; soft conditions travel separately in `ConditionFlags`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BpError>;

/// Hard failure of a channel or utility operation.
///
/// `Timeout` is the one routinely expected variant: a poll (`CHECK`) or
/// bounded wait that found nothing ready. Everything else indicates a
/// malformed input, an exhausted resource, or a storage-service fault.
/// Non-failure statuses that the data plane still reports — a processed
/// payload that took on a custody acknowledgment, or an applied custody
/// signal — ride in `ProcessOutcome` instead of here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BpError {
    #[error("operation timed out")]
    Timeout,

    #[error("invalid parameter: {0}")]
    Parm(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("bundle lifetime has expired")]
    Expired,

    #[error("bundle deliberately dropped")]
    Dropped,

    #[error("invalid storage handle")]
    InvalidHandle,

    #[error("unsupported bundle protocol version {0}")]
    WrongVersion(u8),

    #[error("bundle parse error: {0}")]
    Parse(&'static str),

    #[error("unknown administrative record type {0:#x}")]
    UnknownRecord(u8),

    #[error("bundle too large ({size} > {max})")]
    BundleTooLarge { size: usize, max: usize },

    #[error("payload integrity check failed")]
    IntegrityFailed,

    #[error("storage service failed")]
    StoreFailed,

    #[error("invalid endpoint ID: {0}")]
    InvalidEid(&'static str),

    #[error("invalid cipher suite id {0}")]
    InvalidCipherSuite(u64),

    #[error("duplicate custody ID")]
    DuplicateCid,

    #[error("custody interval tree is full")]
    CustodyTreeFull,

    #[error("active table is full")]
    ActiveTableFull,

    #[error("custody ID not found")]
    CidNotFound,

    #[error("bundle is addressed to another node and needs forwarding")]
    PendingForward,
}
