//! ranksync core library: domain types, role codec, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: `UserId`, `GroupSet`, `PersistedRecord`
//! - [`codec`]: RolesText encode / decode
//! - [`config`]: YAML configuration load / init
//! - [`error`]: [`ConfigError`], [`DecodeError`]

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DatabaseConfig};
pub use error::{ConfigError, DecodeError};
pub use types::{GroupSet, PersistedRecord, UserId};
