use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigParse,
    ConfigInclude,
    ConfigInvalidValue,

    SitemapParse,

    CommandFailed,
    CommandTimeout,
    TransferFailed,

    SshConnectFailed,

    InternalIoError,
    InternalJsonError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigParse => "config.parse_error",
            ErrorCode::ConfigInclude => "config.include_error",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::SitemapParse => "sitemap.parse_error",

            ErrorCode::CommandFailed => "command.failed",
            ErrorCode::CommandTimeout => "command.timeout",
            ErrorCode::TransferFailed => "transfer.failed",

            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNotFoundDetails {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigIncludeDetails {
    pub path: String,
    /// Chain of including config files, outermost first.
    pub include_chain: Vec<String>,
    pub cause: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapParseDetails {
    pub path: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub phase: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailedDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    pub remote_path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        let details = serde_json::to_value(ConfigNotFoundDetails { path: path.clone() })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigNotFound,
            format!("Configuration file not found: {}", path),
            details,
        )
    }

    pub fn config_parse(path: impl Into<String>, error: impl Into<String>) -> Self {
        let details = serde_json::to_value(ConfigParseDetails {
            path: path.into(),
            error: error.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(ErrorCode::ConfigParse, "Malformed configuration", details)
    }

    /// Wrap a failure from an included config with the chain of including files.
    pub fn config_include(
        path: impl Into<String>,
        include_chain: Vec<String>,
        cause: Error,
    ) -> Self {
        let path = path.into();
        let cause_value = serde_json::json!({
            "code": cause.code.as_str(),
            "message": cause.message,
            "details": cause.details,
        });
        let details = serde_json::to_value(ConfigIncludeDetails {
            path: path.clone(),
            include_chain,
            cause: cause_value,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigInclude,
            format!("Failed to load included configuration: {}", path),
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn sitemap_parse(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let details = serde_json::to_value(SitemapParseDetails {
            path: path.into(),
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(ErrorCode::SitemapParse, "Malformed sitemap document", details)
            .with_hint("Set 'on_malformed_sitemap: rebuild' to replace the file with a fresh document")
    }

    pub fn command_failed(details: CommandFailedDetails) -> Self {
        let phase = details.phase.clone();
        let command = details.command.clone();
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::CommandFailed,
            format!("Command failed in phase '{}': {}", phase, command),
            details,
        )
    }

    pub fn command_timeout(
        phase: impl Into<String>,
        command: impl Into<String>,
        host: Option<String>,
    ) -> Self {
        let phase = phase.into();
        let command = command.into();
        let details = serde_json::json!({
            "phase": &phase,
            "command": &command,
            "host": host,
        });
        Self::new(
            ErrorCode::CommandTimeout,
            format!("Command timed out in phase '{}'", phase),
            details,
        )
        .retryable(true)
    }

    pub fn transfer_failed(
        local_path: Option<String>,
        remote_path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let remote_path = remote_path.into();
        let details = serde_json::to_value(TransferFailedDetails {
            local_path,
            remote_path: remote_path.clone(),
            error: error.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::TransferFailed,
            format!("Transfer failed: {}", remote_path),
            details,
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, error: impl Into<String>) -> Self {
        let host = host.into();
        let error = error.into();
        let details = serde_json::json!({
            "host": &host,
            "error": &error,
        });
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Failed to connect to {}", host),
            details,
        )
        .retryable(true)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let details = serde_json::json!({
            "error": error,
            "context": context,
        });
        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn retryable(mut self, value: bool) -> Self {
        self.retryable = Some(value);
        self
    }
}
