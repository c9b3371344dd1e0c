//! Reconcile errors and the event reasons that accompany them.

use metrica_core::{CollectorError, StoreError};

pub const REASON_COLLECTION_FAILED: &str = "CollectionFailed";
pub const COLLECTION_FAILED_MESSAGE: &str = "Failed to reconcile metric collection";

/// Normal event after a status write.
pub const EVENT_UPDATED: &str = "Updated";
/// Warning event when collection could not be set up.
pub const EVENT_INTERNAL_ERROR: &str = "InternalError";
/// Warning event when the status write failed.
pub const EVENT_UPDATE_FAILED: &str = "UpdateFailed";

/// Every variant is retriable; malformed keys never surface as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch metric {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to initiate or update scraping: {0}")]
    Collection(#[source] CollectorError),
    #[error(transparent)]
    Delete(CollectorError),
    #[error(transparent)]
    StatusUpdate(StoreError),
}

impl Error {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => "fetch",
            Error::Collection(_) => "collection",
            Error::Delete(_) => "delete",
            Error::StatusUpdate(_) => "status_update",
        }
    }
}
