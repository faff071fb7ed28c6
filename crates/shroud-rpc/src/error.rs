//! RPC error types.

use thiserror::Error;

/// JSON-RPC 2.0 standard error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} at {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {method} at {url}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        code: i64,
        message: String,
        method: String,
    },

    #[error("no result in response ({context})")]
    NoResult { context: String },

    #[error("daemon returned status {status} ({context})")]
    Status { context: String, status: String },

    #[error("authentication failed for {url}")]
    AuthFailed { url: String },

    #[error("daemon busy ({context})")]
    Busy { context: String },

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Whether retrying the same request later could succeed.
    ///
    /// Connection failures, timeouts, 5xx responses and a busy daemon are
    /// transient; protocol and decoding errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            RpcError::HttpStatus { status, .. } => *status >= 500,
            RpcError::Busy { .. } => true,
            RpcError::Status { status, .. } => status == "BUSY",
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let busy = RpcError::Busy { context: "get_blocks".into() };
        assert!(busy.is_transient());

        let status_busy = RpcError::Status {
            context: "get_outs".into(),
            status: "BUSY".into(),
        };
        assert!(status_busy.is_transient());

        let server = RpcError::HttpStatus {
            method: "get_info".into(),
            url: "http://localhost".into(),
            status: 503,
            body: String::new(),
        };
        assert!(server.is_transient());

        let client = RpcError::HttpStatus {
            method: "get_info".into(),
            url: "http://localhost".into(),
            status: 404,
            body: String::new(),
        };
        assert!(!client.is_transient());

        let rpc = RpcError::Rpc {
            code: codes::INVALID_PARAMS,
            message: "bad".into(),
            method: "get_block".into(),
        };
        assert!(!rpc.is_transient());
        assert!(!RpcError::NoResult { context: "x".into() }.is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = RpcError::Status {
            context: "send_raw_transaction".into(),
            status: "Failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "daemon returned status Failed (send_raw_transaction)"
        );
    }
}
