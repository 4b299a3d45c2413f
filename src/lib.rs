/*!
 * Sacristan - session-integrity and credential-resilience console
 *
 * Wires the pure-logic core components against production
 * infrastructure:
 * - File-backed persistent store with atomic writes
 * - GitHub REST identity endpoint for token vetting
 * - Host environment probe feeding the integrity fingerprint
 * - Background watchdog for fingerprint rechecks and credential
 *   revalidation
 * - Tiered Soft/Medium/Hard recovery over the live components
 */

pub mod cli_style;
pub mod config;
pub mod console;
pub mod env_probe;
pub mod error;
pub mod github;
pub mod logging;
pub mod store;

// Re-export commonly used types
pub use config::{ConsoleConfig, LogLevel};
pub use console::Console;
pub use env_probe::HostEnvironment;
pub use error::{Result, SacristanError, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
pub use github::GithubIdentity;
pub use store::FileStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
