//! Durable storage for relay configuration.
//!
//! Guild routes are mirrored in memory and written through to a single JSON
//! file on every mutation.

mod error;
mod guild;

pub use error::{PersistenceError, PersistenceResult};
pub use guild::{DEFAULT_GUILD_CONFIG_FILE, GuildConfigStore, GuildRoute, LoadResult};
