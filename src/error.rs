use thiserror::Error;

/// Errors surfaced by the registry, the stores and the inspector.
#[derive(Debug, Error)]
pub enum SingletnError {
    /// A constructed container does not satisfy the container contract.
    #[error("{type_name} does not meet the container contract: {reason}")]
    Contract {
        type_name: &'static str,
        reason: &'static str,
    },

    /// A registry entry could not be downcast to the requested type.
    #[error("type mismatch in registry for type: {type_name}")]
    TypeMismatch { type_name: &'static str },

    /// The inspector has no tracked instance with this id.
    #[error("no tracked instance with id {0}")]
    UnknownInstance(String),

    #[error("failed to convert state: {0}")]
    Conversion(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by the storage drivers.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = SingletnError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_display() {
        let err = SingletnError::Contract {
            type_name: "Counter",
            reason: "state must not be null",
        };
        assert_eq!(
            err.to_string(),
            "Counter does not meet the container contract: state must not be null"
        );
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = SingletnError::TypeMismatch { type_name: "u8" };
        assert_eq!(err.to_string(), "type mismatch in registry for type: u8");
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: SingletnError = StorageError::Unavailable("closed".into()).into();
        assert_eq!(err.to_string(), "storage unavailable: closed");
    }

    #[test]
    fn test_error_trait() {
        let err: &dyn std::error::Error = &SingletnError::UnknownInstance("abc".into());
        assert_eq!(err.to_string(), "no tracked instance with id abc");
    }
}
