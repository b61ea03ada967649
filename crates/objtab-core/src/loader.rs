//! Cached schema loading.
//!
//! Loading the same schema file twice through one `SchemaLoader` returns the
//! same `Arc<Schema>`, so callers can compare schemas by identity. The cache
//! is keyed by canonical path and is held by the loader value itself; there is
//! no process-wide registry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SchemaError;
use crate::schema::Schema;

#[derive(Debug, Default)]
pub struct SchemaLoader {
    cache: Mutex<HashMap<PathBuf, Arc<Schema>>>,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load, parse and check a schema file, or return the cached schema for a
    /// path loaded before.
    pub fn load(&self, path: &Path) -> Result<Arc<Schema>, SchemaError> {
        let canonical = fs::canonicalize(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // The lock is held across the load so concurrent callers asking for
        // the same path observe a single schema value.
        let mut cache = self.cache.lock();
        if let Some(schema) = cache.get(&canonical) {
            return Ok(Arc::clone(schema));
        }

        let text = fs::read_to_string(&canonical).map_err(|source| SchemaError::Io {
            path: canonical.clone(),
            source,
        })?;
        let schema = Arc::new(Schema::parse(&text, Some(&canonical))?);
        debug!(
            path = %canonical.display(),
            schema = %schema.name(),
            digest = %schema.digest(),
            "loaded schema"
        );
        cache.insert(canonical, Arc::clone(&schema));
        Ok(schema)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drop all cached schemas. Schemas already handed out stay valid.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
