//! Conflict resolution for sync rejections
//!
//! A conflict is raised when a peer already holds a version of the key that
//! is at least the pushed one. The resolver compares our mutation with the
//! peer's state and picks a winner (or produces a merged value).

use crate::cluster::config::ConflictStrategy;
use crate::codec::ValueCodec;
use crate::core::{CacheError, Result};
use crate::protocol::{Mutation, MutationPayload};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Our mutation wins and is re-pushed above the peer's version
    KeepLocal,
    /// The peer's state wins and is adopted locally
    AdoptRemote,
    /// A new value (raw, not codec-encoded) replaces both sides
    Merged(Vec<u8>),
}

/// Merges two conflicting raw values
pub trait MergeStrategy: Send + Sync {
    /// `later` wins where the values clash
    fn merge(&self, key: &str, earlier: &[u8], later: &[u8]) -> Result<Vec<u8>>;
}

/// User-supplied resolution for the `custom` strategy
pub trait ConflictHandler: Send + Sync {
    /// `ours`/`theirs` carry codec-encoded payloads. A `Merged` result holds
    /// the raw value to store.
    fn resolve(&self, key: &str, ours: &Mutation, theirs: &Mutation) -> Result<Resolution>;
}

/// Structural merge of JSON objects: union of fields, nested objects merged
/// recursively, `later` wins on any other clash
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMergeStrategy;

impl JsonMergeStrategy {
    fn merge_objects(earlier: &Map<String, Value>, later: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = earlier.clone();
        for (field, value) in later {
            let combined = match (merged.get(field), value) {
                (Some(Value::Object(a)), Value::Object(b)) => Value::Object(Self::merge_objects(a, b)),
                _ => value.clone(),
            };
            merged.insert(field.clone(), combined);
        }
        merged
    }
}

impl MergeStrategy for JsonMergeStrategy {
    fn merge(&self, key: &str, earlier: &[u8], later: &[u8]) -> Result<Vec<u8>> {
        let parse = |bytes: &[u8]| match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(CacheError::ConflictUnresolved(key.to_string())),
        };
        let merged = Self::merge_objects(&parse(earlier)?, &parse(later)?);
        Ok(serde_json::to_vec(&Value::Object(merged))?)
    }
}

/// Last-write-wins ordering: timestamp, then version, then origin id
pub fn lww_order(a: &Mutation, b: &Mutation) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then(a.version.cmp(&b.version))
        .then_with(|| a.origin.cmp(&b.origin))
}

#[derive(Clone)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    codec: Arc<dyn ValueCodec>,
    merge: Arc<dyn MergeStrategy>,
    handler: Option<Arc<dyn ConflictHandler>>,
}

impl ConflictResolver {
    /// `custom` requires a handler
    pub fn new(
        strategy: ConflictStrategy,
        codec: Arc<dyn ValueCodec>,
        merge: Arc<dyn MergeStrategy>,
        handler: Option<Arc<dyn ConflictHandler>>,
    ) -> Result<Self> {
        if strategy == ConflictStrategy::Custom && handler.is_none() {
            return Err(CacheError::InvalidConfig(
                "custom conflict resolution requires a conflict handler".to_string(),
            ));
        }
        Ok(Self {
            strategy,
            codec,
            merge,
            handler,
        })
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve `ours` against `theirs`. `Merged` values come back
    /// codec-encoded, ready to store.
    pub fn resolve(&self, ours: &Mutation, theirs: &Mutation) -> Result<Resolution> {
        let resolution = match self.strategy {
            ConflictStrategy::LastWriteWins => Self::last_write_wins(ours, theirs),
            ConflictStrategy::Merge => self.merge(ours, theirs)?,
            ConflictStrategy::Custom => match &self.handler {
                Some(handler) => handler.resolve(&ours.key, ours, theirs)?,
                None => return Err(CacheError::ConflictUnresolved(ours.key.clone())),
            },
        };

        debug!(
            "Conflict on {} (ours v{}, theirs v{} from {}): {:?}",
            ours.key, ours.version, theirs.version, theirs.origin, resolution
        );

        match resolution {
            Resolution::Merged(raw) => Ok(Resolution::Merged(self.codec.encode(&raw)?)),
            other => Ok(other),
        }
    }

    fn last_write_wins(ours: &Mutation, theirs: &Mutation) -> Resolution {
        if lww_order(ours, theirs) == Ordering::Less {
            Resolution::AdoptRemote
        } else {
            Resolution::KeepLocal
        }
    }

    /// Deletes carry no structure to merge, so they fall back to LWW
    fn merge(&self, ours: &Mutation, theirs: &Mutation) -> Result<Resolution> {
        let (MutationPayload::Set(our_entry), MutationPayload::Set(their_entry)) =
            (&ours.payload, &theirs.payload)
        else {
            return Ok(Self::last_write_wins(ours, theirs));
        };

        let our_value = self.codec.decode(&our_entry.value)?;
        let their_value = self.codec.decode(&their_entry.value)?;
        let merged = if lww_order(ours, theirs) == Ordering::Less {
            self.merge.merge(&ours.key, &our_value, &their_value)?
        } else {
            self.merge.merge(&ours.key, &their_value, &our_value)?
        };
        Ok(Resolution::Merged(merged))
    }
}
