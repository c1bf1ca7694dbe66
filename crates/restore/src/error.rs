//! Restore client errors

use br_core::{RangeError, RegionEpoch, RegionId, StoreId};

use crate::transport::RegionError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the split/scatter client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("region {0} doesn't have any peer")]
    NoPeer(RegionId),
    #[error("store {0} not found")]
    StoreNotFound(StoreId),
    #[error("region {0} not found")]
    RegionNotFound(RegionId),
    #[error("split region {region_id} failed: {error}")]
    Region {
        region_id: RegionId,
        error: RegionError,
    },
    #[error("region {region_id} epoch not match: current {current}, expected at least {expected}")]
    EpochNotMatch {
        region_id: RegionId,
        current: RegionEpoch,
        expected: RegionEpoch,
    },
    #[error("invalid split keys for region {region_id}: {reason}")]
    InvalidSplitKeys { region_id: RegionId, reason: String },
    #[error("split response of region {0} doesn't contain the origin region")]
    OriginRegionMissing(RegionId),
    #[error("pd leader not found")]
    PdLeaderNotFound,
    #[error("pd API error: {0}")]
    Pd(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("gRPC status: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("TLS config error: {0}")]
    Tls(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("regions of [{start}, {end}) are inconsistent: {reason}")]
    RegionsInconsistent {
        start: String,
        end: String,
        reason: String,
    },
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("region {0} is not visible after split")]
    SplitTimeout(RegionId),
    #[error("split task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Split(ErrorHistory),
}

impl Error {
    /// Attempt history of a failed split call
    pub fn history(&self) -> Option<&ErrorHistory> {
        match self {
            Error::Split(history) => Some(history),
            _ => None,
        }
    }

    /// Structured region error carried by this error, if any
    pub fn region_error(&self) -> Option<&RegionError> {
        match self {
            Error::Region { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Every error observed during one split call, in order
///
/// Returned as a whole so a failure report shows the full retry history
/// (e.g. flapping leadership) rather than only the last attempt.
#[derive(Debug, Default)]
pub struct ErrorHistory {
    errors: Vec<Error>,
}

impl ErrorHistory {
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn last(&self) -> Option<&Error> {
        self.errors.last()
    }

    /// Number of recorded structured region errors, i.e. RPC attempts that
    /// came back with a region error
    pub fn region_error_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, Error::Region { .. }))
            .count()
    }
}

impl From<ErrorHistory> for Error {
    fn from(history: ErrorHistory) -> Self {
        Error::Split(history)
    }
}

impl std::fmt::Display for ErrorHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "split failed with {} error(s): [", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}
