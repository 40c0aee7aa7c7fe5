use thiserror::Error;

/// Errors raised while loading [`crate::validation_params::ValidationParams`].
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("invalid validation parameters: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("{field} must not exceed validation_set_expires")]
    WindowExceedsExpiry { field: &'static str },
}
