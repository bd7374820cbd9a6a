//! Error types for flowboot.
//!
//! Every variant carries a stable code so scripts wrapping the CLI can
//! branch on the failure kind without parsing messages.

use thiserror::Error;

/// Result type alias for flowboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowboot error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),

    #[error("Invalid signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error(
        "Parameter order error: artifact '@{artifact}' is declared before value parameter '{value}'"
    )]
    ParameterOrder { artifact: String, value: String },

    #[error("Missing entrypoint: flow '{0}' has no template named 'main'")]
    MissingEntrypoint(String),

    #[error("Unknown template reference '{reference}': {reason}")]
    UnknownTemplateRef { reference: String, reason: String },

    #[error("Invalid dag expression '{expression}': {reason}")]
    InvalidDagExpression { expression: String, reason: String },

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_signature(signature: &str, reason: impl Into<String>) -> Self {
        Error::InvalidSignature {
            signature: signature.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unknown_template(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnknownTemplateRef {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_dag(expression: &str, reason: impl Into<String>) -> Self {
        Error::InvalidDagExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// Get the error code for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnboundVariable(_) => "UNBOUND_VARIABLE",
            Error::InvalidSignature { .. } => "INVALID_SIGNATURE",
            Error::ParameterOrder { .. } => "PARAMETER_ORDER",
            Error::MissingEntrypoint(_) => "MISSING_ENTRYPOINT",
            Error::UnknownTemplateRef { .. } => "UNKNOWN_TEMPLATE_REF",
            Error::InvalidDagExpression { .. } => "INVALID_DAG_EXPRESSION",
            Error::Compile(_) => "COMPILE_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error comes from the document being compiled rather than
    /// from the environment (files, network, configuration).
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Error::UnboundVariable(_)
                | Error::InvalidSignature { .. }
                | Error::ParameterOrder { .. }
                | Error::MissingEntrypoint(_)
                | Error::UnknownTemplateRef { .. }
                | Error::InvalidDagExpression { .. }
                | Error::Compile(_)
        )
    }

    /// Convert to a JSON error object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::UnboundVariable("x".into()).code(),
            "UNBOUND_VARIABLE"
        );
        assert_eq!(
            Error::invalid_signature("f(", "unbalanced parentheses").code(),
            "INVALID_SIGNATURE"
        );
        assert_eq!(
            Error::MissingEntrypoint("demo".into()).code(),
            "MISSING_ENTRYPOINT"
        );
        assert_eq!(Error::invalid_dag("A->", "empty").code(), "INVALID_DAG_EXPRESSION");
    }

    #[test]
    fn test_parameter_order_message() {
        let err = Error::ParameterOrder {
            artifact: "data".into(),
            value: "x".into(),
        };
        assert_eq!(
            err.to_string(),
            "Parameter order error: artifact '@data' is declared before value parameter 'x'"
        );
    }

    #[test]
    fn test_compile_error_classification() {
        assert!(Error::Compile("dup".into()).is_compile_error());
        assert!(Error::unknown_template("lib/echo", "not found").is_compile_error());
        assert!(!Error::Parse("bad".into()).is_compile_error());
        assert!(!Error::Config("bad".into()).is_compile_error());
    }

    #[test]
    fn test_to_json() {
        let json = Error::MissingEntrypoint("demo".into()).to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "MISSING_ENTRYPOINT");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("demo"));
    }
}
