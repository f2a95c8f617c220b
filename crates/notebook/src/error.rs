use std::path::PathBuf;

use core_types::{AssetId, ExperimentId, UserId};
use reagents::ReagentError;
use storage_sqlite::StoreError;
use thiserror::Error;

use crate::policy::Permission;

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("user {user} lacks {permission} permission on {scope}")]
    Forbidden {
        user: UserId,
        permission: Permission,
        scope: String,
    },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("no user matches `{0}`")]
    UnknownUser(String),

    #[error("`{identity}` matches {count} users; use an email address or id")]
    AmbiguousUser { identity: String, count: usize },

    #[error("user {user} created experiment {experiment}; their owner membership cannot change")]
    CreatorMembership {
        experiment: ExperimentId,
        user: UserId,
    },

    #[error("{user} is not an admin account and cannot open admin mode")]
    AdminModeDenied { user: String },

    #[error("asset {asset} content hash mismatch: recorded {expected}, file has {actual}")]
    AssetHashMismatch {
        asset: AssetId,
        expected: String,
        actual: String,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Catalog(#[from] ReagentError),
}

pub type Result<T> = std::result::Result<T, NotebookError>;

impl NotebookError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NotebookError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, NotebookError::Forbidden { .. })
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            NotebookError::Store(err) => Some(err),
            _ => None,
        }
    }
}
