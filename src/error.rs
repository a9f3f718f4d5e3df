use thiserror::Error;

/// Error taxonomy for the rebalancer.
///
/// Variants group into three exit classes: configuration problems (exit 1),
/// authentication/permission problems (exit 1 or 2 depending on whether the
/// identity itself is unknown), and transport/API problems (exit 2).
/// Per-object inventory failures never surface here; they are logged and
/// defaulted at the call site.
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unknown user or token: {0}")]
    UnknownIdentity(String),

    #[error("Permission '{0}' is missing for the configured identity")]
    Permission(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BalancerError {
    /// Process exit code for fatal errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            BalancerError::Config(_)
            | BalancerError::Io(_)
            | BalancerError::ConfigParse(_)
            | BalancerError::UnknownIdentity(_)
            | BalancerError::Permission(_)
            | BalancerError::Serialization(_) => 1,
            BalancerError::Auth(_) | BalancerError::Network(_) | BalancerError::Api(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, BalancerError>;
