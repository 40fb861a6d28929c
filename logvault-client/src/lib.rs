//! Client-side orchestration for LogVault.
//!
//! - [`MasterKeyProvider`]: lazily provisions one wrapped master key per user
//!   through an atomic insert-if-absent at the key store
//! - [`VaultSession`]: unwraps the key once per session, decrypts records on
//!   load and re-encrypts full payloads on write
//! - [`VaultConfig`]: KDF cost and DuckDB resource settings
//!
//! Key-level failures degrade a session to read-only fallback mode.
//! Record-level failures degrade only that record.

pub mod config;
pub mod error;
pub mod provider;
pub mod session;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use provider::MasterKeyProvider;
pub use session::{RecordContent, RecordView, SessionMode, VaultSession};

/// Installs a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Calling this more
/// than once is harmless.
pub fn init_logging(config: &VaultConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
