//! Error types for meridian-infra.

/// Result type alias using [`InfraError`].
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors that can occur in the infrastructure layer.
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    /// Malformed or disallowed configuration parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Attempt to reconfigure a parameter that is not dynamic.
    #[error("parameter is not dynamic and cannot be reconfigured: {name}")]
    StaticParameter {
        /// Name of the offending parameter.
        name: String,
    },

    /// Node provisioning error.
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// Unknown infrastructure type requested from the factory.
    #[error("unknown infrastructure type: {0}")]
    UnknownInfrastructure(String),

    /// Node-source store error.
    #[error("store error: {0}")]
    Store(#[from] meridian_store::StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl InfraError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a provisioning error.
    #[must_use]
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
