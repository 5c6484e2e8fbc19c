use crate::cluster::config::ConsistencyLevel;
use crate::cluster::types::{NodeId, NodeStatus};
use crate::core::{CacheEntry, CacheError, Tombstone, now_millis};
use serde::{Deserialize, Serialize};

/// Mutation kind carried by replication and sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Set,
    Delete,
}

/// Versioned payload of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationPayload {
    Set(CacheEntry),
    Delete(Tombstone),
}

/// A versioned set/delete as shipped between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub key: String,
    pub payload: MutationPayload,
    pub origin: NodeId,
    pub version: u64,
    /// Time the mutation was produced (ms since epoch)
    pub timestamp: u64,
}

impl Mutation {
    pub fn set(entry: CacheEntry, origin: impl Into<NodeId>) -> Self {
        Self {
            key: entry.key.clone(),
            version: entry.version,
            timestamp: entry.created_at,
            origin: origin.into(),
            payload: MutationPayload::Set(entry),
        }
    }

    pub fn delete(tombstone: Tombstone, origin: impl Into<NodeId>) -> Self {
        Self {
            key: tombstone.key.clone(),
            version: tombstone.version,
            timestamp: tombstone.created_at,
            origin: origin.into(),
            payload: MutationPayload::Delete(tombstone),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self.payload {
            MutationPayload::Set(_) => OperationKind::Set,
            MutationPayload::Delete(_) => OperationKind::Delete,
        }
    }

    /// Same mutation re-stamped with a new version
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        match &mut self.payload {
            MutationPayload::Set(entry) => entry.version = version,
            MutationPayload::Delete(tombstone) => tombstone.version = version,
        }
        self
    }
}

/// What a node holds for a key: the entry and/or the tombstone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    pub entry: Option<CacheEntry>,
    pub tombstone: Option<Tombstone>,
}

impl KeyState {
    /// Highest version known for the key
    pub fn version(&self) -> u64 {
        let entry = self.entry.as_ref().map_or(0, |e| e.version);
        let tomb = self.tombstone.as_ref().map_or(0, |t| t.version);
        entry.max(tomb)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.tombstone.is_none()
    }

    /// The state as a mutation, preferring whichever side is newer
    pub fn to_mutation(&self, origin: &str) -> Option<Mutation> {
        match (&self.entry, &self.tombstone) {
            (Some(entry), Some(tomb)) if tomb.version >= entry.version => {
                Some(Mutation::delete(tomb.clone(), origin))
            }
            (Some(entry), _) => Some(Mutation::set(entry.clone(), origin)),
            (None, Some(tomb)) => Some(Mutation::delete(tomb.clone(), origin)),
            (None, None) => None,
        }
    }
}

/// Messages exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Forwarded read, executed on the receiving node. `consistency` is the
    /// caller's level; `None` uses the receiver's configured level.
    Get {
        key: String,
        consistency: Option<ConsistencyLevel>,
    },
    /// Forwarded write with the caller's raw value
    Set {
        key: String,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
        consistency: Option<ConsistencyLevel>,
    },
    /// Forwarded delete
    Delete { key: String },
    /// Replication of a mutation to a replica
    Replicate(Mutation),
    /// Sync-queue delivery of a mutation
    Sync { item_id: String, mutation: Mutation },
    /// Peer lookup of the stored state for a key
    FetchEntry { key: String },
    /// Liveness and load announcement
    Heartbeat {
        node_id: NodeId,
        address: String,
        http_address: Option<String>,
        status: NodeStatus,
        load: f64,
    },
}

impl ClusterMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Replicate(_) => "replicate",
            Self::Sync { .. } => "sync",
            Self::FetchEntry { .. } => "fetch",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Get { key, .. } | Self::Set { key, .. } | Self::Delete { key } => Some(key),
            Self::FetchEntry { key } => Some(key),
            Self::Replicate(m) | Self::Sync { mutation: m, .. } => Some(&m.key),
            Self::Heartbeat { .. } => None,
        }
    }
}

/// Message plus sender metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: NodeId,
    pub timestamp: u64,
    pub message: ClusterMessage,
}

impl Envelope {
    pub fn new(origin: impl Into<NodeId>, message: ClusterMessage) -> Self {
        Self {
            origin: origin.into(),
            timestamp: now_millis(),
            message,
        }
    }
}

/// Error categories that survive the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NodeUnavailable,
    CorruptEntry,
    ConflictUnresolved,
    NoNodes,
    Internal,
}

/// Replies to `ClusterMessage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterResponse {
    /// Forwarded get result (decoded value)
    Value(Option<Vec<u8>>),
    /// Forwarded set stored at `version`
    Written { version: u64 },
    /// Forwarded delete result
    Deleted(bool),
    /// Replicate/sync accepted
    Applied,
    /// Replicate/sync rejected: receiver already holds this or a newer version
    Stale(KeyState),
    /// FetchEntry result
    State(KeyState),
    HeartbeatAck { node_id: NodeId, leader: Option<NodeId> },
    Error { code: ErrorCode, message: String },
}

impl ClusterResponse {
    pub fn from_error(err: &CacheError) -> Self {
        let code = match err {
            CacheError::NodeUnavailable(_) | CacheError::Transport(_) => ErrorCode::NodeUnavailable,
            CacheError::CorruptEntry { .. } => ErrorCode::CorruptEntry,
            CacheError::ConflictUnresolved(_) => ErrorCode::ConflictUnresolved,
            CacheError::NoNodes => ErrorCode::NoNodes,
            _ => ErrorCode::Internal,
        };
        Self::Error {
            code,
            message: err.to_string(),
        }
    }

    /// Rebuild a local error from a remote error reply
    pub fn into_error(code: ErrorCode, message: String, key: &str) -> CacheError {
        match code {
            ErrorCode::NodeUnavailable => CacheError::NodeUnavailable(message),
            ErrorCode::CorruptEntry => CacheError::CorruptEntry {
                key: key.to_string(),
                reason: message,
            },
            ErrorCode::ConflictUnresolved => CacheError::ConflictUnresolved(key.to_string()),
            ErrorCode::NoNodes => CacheError::NoNodes,
            ErrorCode::Internal => CacheError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_key_state_version() {
        let entry = CacheEntry::new("k", b"v".to_vec(), None, 3, "node-a");
        let tomb = Tombstone::new("k", "node-b", 5, Duration::from_secs(10));

        let state = KeyState {
            entry: Some(entry.clone()),
            tombstone: Some(tomb.clone()),
        };
        assert_eq!(state.version(), 5);
        assert_eq!(state.to_mutation("node-a").unwrap().kind(), OperationKind::Delete);

        let state = KeyState {
            entry: Some(entry),
            tombstone: None,
        };
        assert_eq!(state.to_mutation("node-a").unwrap().kind(), OperationKind::Set);
        assert!(KeyState::default().to_mutation("node-a").is_none());
    }

    #[test]
    fn test_mutation_with_version() {
        let entry = CacheEntry::new("k", b"v".to_vec(), None, 1, "node-a");
        let m = Mutation::set(entry, "node-a").with_version(9);
        assert_eq!(m.version, 9);
        match m.payload {
            MutationPayload::Set(e) => assert_eq!(e.version, 9),
            MutationPayload::Delete(_) => panic!("expected set"),
        }
    }

    #[test]
    fn test_error_code_mapping() {
        let resp = ClusterResponse::from_error(&CacheError::NodeUnavailable("node-c".into()));
        match resp {
            ClusterResponse::Error { code, message } => {
                assert_eq!(code, ErrorCode::NodeUnavailable);
                let err = ClusterResponse::into_error(code, message, "k");
                assert!(matches!(err, CacheError::NodeUnavailable(_)));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
