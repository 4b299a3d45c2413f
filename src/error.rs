/*!
 * Error types for Sacristan
 */

use sacristan_core_vigil::VigilError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SacristanError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum SacristanError {
    /// Configuration file missing, unreadable or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// State directory could not be created or opened
    #[error("state directory unavailable: {}", .0.display())]
    StateDir(PathBuf),

    /// Core component fault
    #[error(transparent)]
    Vigil(#[from] VigilError),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl SacristanError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // Transient faults: the operator can retry
            SacristanError::Vigil(e) if e.is_transient() => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            SacristanError::Vigil(VigilError::Storage("down".into())).exit_code(),
            EXIT_PARTIAL
        );
        assert_eq!(
            SacristanError::Config("bad toml".into()).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            SacristanError::Vigil(VigilError::CredentialExpired).exit_code(),
            EXIT_FATAL
        );
    }
}
