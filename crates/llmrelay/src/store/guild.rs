//! File-backed guild routing store.
//!
//! Routes are kept in an in-memory map guarded by a single `RwLock` and
//! written through to `guild_configs.json` as a pretty-printed JSON array:
//!
//! ```json
//! [
//!   {
//!     "guild_id": "123",
//!     "llm_channel_id": "456"
//!   }
//! ]
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::{PersistenceError, PersistenceResult};

/// File name of the guild routing file inside the data directory.
pub const DEFAULT_GUILD_CONFIG_FILE: &str = "guild_configs.json";

/// Routing settings for one guild.
///
/// An empty `llm_channel_id` means the guild has been configured before but
/// currently has no active channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRoute {
    pub guild_id: String,
    #[serde(default)]
    pub llm_channel_id: String,
}

impl GuildRoute {
    fn unset(guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            llm_channel_id: String::new(),
        }
    }
}

/// Result of opening a store.
///
/// The store is always usable. `error` carries the reason it started empty
/// when the file existed but could not be read or parsed.
#[derive(Debug)]
pub struct LoadResult {
    pub store: GuildConfigStore,
    pub error: Option<PersistenceError>,
}

/// Thread-safe guild → LLM channel mapping with write-through persistence.
#[derive(Debug)]
pub struct GuildConfigStore {
    path: PathBuf,
    routes: RwLock<HashMap<String, GuildRoute>>,
}

impl GuildConfigStore {
    /// Open the store at `path`, loading any existing routes.
    ///
    /// A missing or empty file is a fresh start. A malformed file is reported
    /// in [`LoadResult::error`] and the store starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> LoadResult {
        let path = path.into();

        let (routes, error) = match read_routes(&path).await {
            Ok(Some(routes)) => {
                info!(
                    path = %path.display(),
                    guilds = routes.len(),
                    "Loaded guild configurations"
                );
                (routes, None)
            }
            Ok(None) => {
                info!(path = %path.display(), "No guild configurations found, starting fresh");
                (HashMap::new(), None)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not load guild configurations, starting with empty configs"
                );
                (HashMap::new(), Some(e))
            }
        };

        LoadResult {
            store: Self {
                path,
                routes: RwLock::new(routes),
            },
            error,
        }
    }

    /// Open the store at `{data_dir}/guild_configs.json`.
    pub async fn open_in(data_dir: impl AsRef<Path>) -> LoadResult {
        Self::open(data_dir.as_ref().join(DEFAULT_GUILD_CONFIG_FILE)).await
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the LLM channel configured for a guild.
    ///
    /// Returns `None` when the guild has no record or its channel is cleared.
    pub async fn get(&self, guild_id: &str) -> Option<String> {
        let routes = self.routes.read().await;
        routes
            .get(guild_id)
            .filter(|route| !route.llm_channel_id.is_empty())
            .map(|route| route.llm_channel_id.clone())
    }

    /// Set the LLM channel for a guild and persist all routes.
    ///
    /// If persisting fails the in-memory route is still updated; the error
    /// tells the caller the file is now behind.
    pub async fn set(&self, guild_id: &str, channel_id: &str) -> PersistenceResult<()> {
        let mut routes = self.routes.write().await;
        routes
            .entry(guild_id.to_string())
            .or_insert_with(|| GuildRoute::unset(guild_id))
            .llm_channel_id = channel_id.to_string();

        self.persist(&routes).await?;
        info!(guild_id = %guild_id, channel_id = %channel_id, "Set LLM channel");
        Ok(())
    }

    /// Clear the LLM channel for a guild and persist all routes.
    ///
    /// The guild record itself is kept. Unknown guilds are a successful no-op.
    pub async fn remove(&self, guild_id: &str) -> PersistenceResult<()> {
        let mut routes = self.routes.write().await;
        let Some(route) = routes.get_mut(guild_id) else {
            debug!(guild_id = %guild_id, "No guild configuration to remove");
            return Ok(());
        };
        route.llm_channel_id.clear();

        self.persist(&routes).await?;
        info!(guild_id = %guild_id, "Removed LLM channel configuration");
        Ok(())
    }

    /// Snapshot of all guild records, sorted by guild id.
    pub async fn routes(&self) -> Vec<GuildRoute> {
        let routes = self.routes.read().await;
        sorted(&routes).into_iter().cloned().collect()
    }

    /// Write every route to disk.
    ///
    /// Callers hold the write lock for the whole mutate-and-persist sequence,
    /// so the file always matches one point-in-time state of the map.
    async fn persist(&self, routes: &HashMap<String, GuildRoute>) -> PersistenceResult<()> {
        let content =
            serde_json::to_string_pretty(&sorted(routes)).map_err(PersistenceError::Serialization)?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PersistenceError::io(dir, e))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(PersistenceError::io(&self.path, e));
        }

        debug!(path = %self.path.display(), guilds = routes.len(), "Saved guild configurations");
        Ok(())
    }
}

fn sorted(routes: &HashMap<String, GuildRoute>) -> Vec<&GuildRoute> {
    let mut list: Vec<&GuildRoute> = routes.values().collect();
    list.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
    list
}

/// Read the routes file. `Ok(None)` means there is nothing to load yet.
async fn read_routes(path: &Path) -> PersistenceResult<Option<HashMap<String, GuildRoute>>> {
    let content = match fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    // A literal `null` is what an empty list looked like in older files.
    let list: Option<Vec<GuildRoute>> =
        serde_json::from_slice(&content).map_err(|e| PersistenceError::malformed(path, e))?;

    Ok(Some(
        list.unwrap_or_default()
            .into_iter()
            .map(|route| (route.guild_id.clone(), route))
            .collect(),
    ))
}
