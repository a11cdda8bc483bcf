//! Stale-while-revalidate cache: keys, entries, TTL policy, and persistence.

pub mod entry;
pub mod json_store;
pub mod key;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
pub mod staleness;
pub mod store;

use std::path::Path;

pub use entry::{Entry, Payload};
pub use key::{CacheKey, DataKind, SubjectId};
pub use staleness::StalenessPolicy;
pub use store::{BackingStore, CacheStore};

use crate::core::config::{BackingKind, CacheConfig};

/// Build the store selected by `config.backing` under `cache_dir`.
///
/// A backing store that cannot be opened is reported on stderr and the cache
/// runs memory-only; startup never fails because persistence is unavailable.
#[must_use]
pub fn open_store(config: &CacheConfig, cache_dir: &Path) -> CacheStore {
    let backing: crate::core::errors::Result<Option<Box<dyn BackingStore>>> = match config.backing
    {
        BackingKind::None => Ok(None),
        BackingKind::Json => json_store::JsonFileBackingStore::open(cache_dir.join("entries"))
            .map(|s| Some(Box::new(s) as Box<dyn BackingStore>)),
        #[cfg(feature = "sqlite")]
        BackingKind::Sqlite => sqlite_store::SqliteBackingStore::open(&cache_dir.join("cache.sqlite3"))
            .map(|s| Some(Box::new(s) as Box<dyn BackingStore>)),
        #[cfg(not(feature = "sqlite"))]
        BackingKind::Sqlite => Err(crate::core::errors::DpcError::InvalidConfig {
            details: "sqlite backing requires the sqlite feature".to_string(),
        }),
    };

    match backing {
        Ok(Some(backing)) => CacheStore::with_backing(backing),
        Ok(None) => CacheStore::new(),
        Err(e) => {
            eprintln!("[DPC-CACHE] persistence unavailable, running memory-only: {e}");
            CacheStore::new()
        }
    }
}
