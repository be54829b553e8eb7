#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Per-context credential persistence for the Maestro CLI.
//!
//! Layout: `model.rs` (the persisted [`Credential`] record), `validate.rs`
//! (context name checks), `store.rs` ([`CredentialStore`] and the YAML-backed
//! [`FileCredentialStore`]).

pub mod error;
pub mod model;
pub mod store;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::Credential;
pub use store::{CONFIG_DIR_NAME, CredentialStore, FileCredentialStore};
pub use validate::validate_context;
