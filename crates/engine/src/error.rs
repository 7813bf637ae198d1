//! Engine-level errors

use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The widget was mounted without a resolvable shop domain. Sends are
    /// refused until the host reconfigures, since the server could not
    /// attribute the conversation to a merchant.
    #[error("shop domain is not configured")]
    MissingShopDomain,

    /// The engine task has shut down and can no longer accept commands
    #[error("engine is closed")]
    Closed,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
