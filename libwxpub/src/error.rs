//! Error types for wxpub

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PublishError>;

/// Result of a single platform call that cannot fail locally
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Plugin '{name}' failed: {source}")]
    Plugin {
        name: String,
        #[source]
        source: Box<PublishError>,
    },

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PublishError {
    /// Wrap an error raised inside a plugin with the plugin's name
    pub fn plugin(name: impl Into<String>, cause: PublishError) -> Self {
        PublishError::Plugin {
            name: name.into(),
            source: Box::new(cause),
        }
    }

    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PublishError::InvalidInput(_) => 3,
            PublishError::File(_) => 4,
            PublishError::Platform(e) if e.is_credential_error() => 2,
            PublishError::Platform(_) => 1,
            PublishError::Config(_) => 1,
            PublishError::Plugin { source, .. } => source.exit_code(),
        }
    }

    /// The platform error at the root of this error, looking through plugin wrappers
    pub fn platform_error(&self) -> Option<&PlatformError> {
        match self {
            PublishError::Platform(e) => Some(e),
            PublishError::Plugin { source, .. } => source.platform_error(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Account already registered: {0}")]
    DuplicateAccount(String),

    #[error("Invalid account '{id}': {reason}")]
    InvalidAccount { id: String, reason: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No active account configured")]
    NoActiveAccount,

    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),
}

/// Errors reported by the platform API or the transport underneath it
///
/// Cloneable so that every waiter on a shared credential fetch receives the
/// same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{endpoint} rejected the request [{code}]: {message}")]
    Api {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("Unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl PlatformError {
    pub fn endpoint(&self) -> &str {
        match self {
            PlatformError::Api { endpoint, .. }
            | PlatformError::Network { endpoint, .. }
            | PlatformError::InvalidResponse { endpoint, .. } => endpoint,
        }
    }

    /// Platform errcode, when the platform answered with one
    pub fn code(&self) -> Option<i64> {
        match self {
            PlatformError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Transport failures are the only errors worth retrying blindly
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network { .. })
    }

    /// True when the failure came from one of the token endpoints
    pub fn is_credential_error(&self) -> bool {
        matches!(self.endpoint(), "/token" | "/stable_token")
    }
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported file {}: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },
}

impl FileError {
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FileError::NotFound(path.to_path_buf())
        } else {
            FileError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(endpoint: &str) -> PlatformError {
        PlatformError::Api {
            endpoint: endpoint.to_string(),
            code: 40001,
            message: "invalid credential".to_string(),
        }
    }

    #[test]
    fn test_exit_code_invalid_input() {
        let error = PublishError::InvalidInput("Empty article".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_credential_error() {
        let error = PublishError::Platform(api_error("/token"));
        assert_eq!(error.exit_code(), 2);

        let error = PublishError::Platform(api_error("/stable_token"));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_submission_error() {
        let error = PublishError::Platform(api_error("/draft/add"));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_file_error() {
        let error = PublishError::File(FileError::NotFound(PathBuf::from("missing.md")));
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_plugin_uses_cause() {
        let error = PublishError::plugin(
            "cover-upload",
            PublishError::File(FileError::NotFound(PathBuf::from("cover.jpg"))),
        );
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_plugin_error_message_names_plugin_and_cause() {
        let error = PublishError::plugin("P2", PublishError::InvalidInput("boom".to_string()));
        let message = error.to_string();
        assert!(message.contains("P2"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_api_error_message_includes_endpoint_and_code() {
        let error = PublishError::Platform(PlatformError::Api {
            endpoint: "/draft/add".to_string(),
            code: 40007,
            message: "invalid media_id".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Platform error: /draft/add rejected the request [40007]: invalid media_id"
        );
    }

    #[test]
    fn test_network_error_is_transient() {
        let network = PlatformError::Network {
            endpoint: "/draft/add".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(network.is_transient());
        assert!(!api_error("/draft/add").is_transient());
        assert_eq!(network.code(), None);
    }

    #[test]
    fn test_platform_error_looks_through_plugin() {
        let error = PublishError::plugin("cover-upload", PublishError::Platform(api_error("/material/add_material")));
        let platform = error.platform_error().expect("platform error");
        assert_eq!(platform.endpoint(), "/material/add_material");
        assert_eq!(platform.code(), Some(40001));
    }

    #[test]
    fn test_file_error_from_io_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = FileError::from_io(Path::new("article.md"), io);
        assert!(matches!(error, FileError::NotFound(_)));
        assert!(error.to_string().contains("article.md"));
    }

    #[test]
    fn test_config_error_formatting() {
        let error = PublishError::Config(ConfigError::DuplicateAccount("a".to_string()));
        assert_eq!(error.to_string(), "Configuration error: Account already registered: a");
    }

    #[test]
    fn test_platform_error_clone() {
        let original = api_error("/token");
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
