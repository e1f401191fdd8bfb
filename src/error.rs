use thiserror::Error;

/// JSON-RPC code for application failures
pub const RPC_INTERNAL_ERROR: i32 = -32000;
/// JSON-RPC code for bad params
pub const RPC_INVALID_PARAMS: i32 = -32602;

/// Errors raised by the memory store and the services on top of it
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// JSON-RPC error code reported to protocol callers
    pub fn rpc_code(&self) -> i32 {
        match self {
            MemoryError::Validation(_) | MemoryError::InvalidQuery(_) => RPC_INVALID_PARAMS,
            MemoryError::NotFound(_)
            | MemoryError::Db(_)
            | MemoryError::Io(_)
            | MemoryError::Json(_)
            | MemoryError::Config(_) => RPC_INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_map_to_invalid_params() {
        assert_eq!(MemoryError::Validation("empty".into()).rpc_code(), -32602);
        assert_eq!(MemoryError::InvalidQuery("empty".into()).rpc_code(), -32602);
    }

    #[test]
    fn test_store_errors_map_to_internal() {
        assert_eq!(MemoryError::NotFound("01H".into()).rpc_code(), -32000);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(MemoryError::from(io).rpc_code(), -32000);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = MemoryError::NotFound("01HXYZ".into());
        assert_eq!(err.to_string(), "memory not found: 01HXYZ");
    }
}
