//! Whole-state persistence for the session store

use super::model::RootState;
use crate::storage::KeyValueStore;
use crate::Error;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key holding the serialized root state
pub const STATE_KEY: &str = "toeai_state_v1";

/// Layout version written by this build.
///
/// Version 0 is the unversioned layout of older clients.
pub const SCHEMA_VERSION: u64 = 1;

const VERSION_FIELD: &str = "schemaVersion";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionedState<'a> {
    schema_version: u64,
    #[serde(flatten)]
    state: &'a RootState,
}

/// Reads and writes the root state as one blob under [`STATE_KEY`]
#[derive(Clone)]
pub struct StatePersistence {
    storage: Arc<dyn KeyValueStore>,
}

impl StatePersistence {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Load the persisted state.
    ///
    /// Never fails: a missing, unreadable, corrupted or newer-than-supported
    /// blob yields [`RootState::default`].
    pub fn load(&self) -> RootState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("No persisted state under {}, starting fresh", STATE_KEY);
                RootState::default()
            }
            Err(e) => {
                warn!("Discarding persisted state under {}: {}", STATE_KEY, e);
                RootState::default()
            }
        }
    }

    /// Serialize the entire state and overwrite the stored blob
    pub fn save(&self, state: &RootState) -> crate::Result<()> {
        let blob = serde_json::to_string(&VersionedState {
            schema_version: SCHEMA_VERSION,
            state,
        })?;
        self.storage.set(STATE_KEY, &blob)
    }

    fn try_load(&self) -> crate::Result<Option<RootState>> {
        let Some(raw) = self.storage.get(STATE_KEY)? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let mut value: Value = serde_json::from_str(&raw)?;
        if !value.is_object() {
            return Err(Error::Serialization(
                "persisted state is not an object".to_string(),
            ));
        }

        let version = match value.get(VERSION_FIELD) {
            None => 0,
            Some(v) => v.as_u64().ok_or_else(|| {
                Error::Serialization(format!("invalid {}: {}", VERSION_FIELD, v))
            })?,
        };
        migrate(&mut value, version)?;

        if let Some(map) = value.as_object_mut() {
            map.remove(VERSION_FIELD);
        }
        let mut state: RootState = serde_json::from_value(value)?;
        state.ensure_current_user();
        Ok(Some(state))
    }
}

/// Upgrade a raw state blob from `from` to [`SCHEMA_VERSION`] in place
fn migrate(value: &mut Value, from: u64) -> crate::Result<()> {
    if from > SCHEMA_VERSION {
        return Err(Error::Validation(format!(
            "state schema version {} is newer than supported version {}",
            from, SCHEMA_VERSION
        )));
    }

    let mut version = from;
    while version < SCHEMA_VERSION {
        match version {
            // The unversioned layout already matches version 1.
            0 => debug!("Migrating persisted state from unversioned layout"),
            _ => unreachable!("no migration step from version {}", version),
        }
        version += 1;
    }

    if let Some(map) = value.as_object_mut() {
        map.insert(VERSION_FIELD.to_string(), Value::from(SCHEMA_VERSION));
    }
    Ok(())
}
