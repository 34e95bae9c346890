//! Error types for Trellis servers

use crate::HttpResponse;
use std::time::Duration;
use thiserror::Error;

/// Message sent to clients in place of the detail of a server-side failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found for {method} {path}{}", method_hint(.hint))]
    RouteNotFound {
        method: String,
        path: String,
        /// A method registered for the same path, if any
        hint: Option<String>,
    },

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Unknown middleware: {0}")]
    UnknownMiddleware(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Request timed out after {}s", .0.as_secs_f64())]
    HandlerTimeout(Duration),

    #[error("Application already {0}")]
    AlreadyStarted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn method_hint(hint: &Option<String>) -> String {
    match hint {
        Some(method) => format!(" - Try using method {}", method),
        None => String::new(),
    }
}

impl Error {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound { .. } | Error::NotFound(_) => 404,
            Error::InvalidRegistration(_) | Error::UnknownMiddleware(_) | Error::BadRequest(_) => {
                400
            }
            Error::HandlerTimeout(_) => 503,
            Error::Serialization(_) | Error::AlreadyStarted(_) | Error::Io(_) => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Message safe to show to clients.
    ///
    /// 500s never leak their detail; it only goes to the log.
    pub fn public_message(&self) -> String {
        if self.status_code() == 500 {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    /// Render as a `{"error": ...}` envelope
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::error(self.status_code(), &self.public_message())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_with_hint() {
        let err = Error::RouteNotFound {
            method: "POST".to_string(),
            path: "/hello".to_string(),
            hint: Some("GET".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Route not found for POST /hello - Try using method GET"
        );
        assert_eq!(err.status_code(), 404);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_route_not_found_without_hint() {
        let err = Error::RouteNotFound {
            method: "GET".to_string(),
            path: "/nowhere".to_string(),
            hint: None,
        };
        assert_eq!(err.to_string(), "Route not found for GET /nowhere");
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = Error::Serialization("key must be a string".to_string());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "Internal server error");

        let response = err.to_response();
        assert_eq!(response.status, 500);
        assert_eq!(
            response.json_value().unwrap(),
            serde_json::json!({"error": "Internal server error"})
        );
    }

    #[test]
    fn test_timeout_is_service_unavailable() {
        let err = Error::HandlerTimeout(Duration::from_secs(10));
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.public_message(), "Request timed out after 10s");
    }
    #[test]
    fn test_io_error_converts_to_internal() {
        fn open_missing() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))?
        }

        let err = open_missing().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_client_error());
        assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
    }
}
