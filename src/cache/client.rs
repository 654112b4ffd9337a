//! Cache-store capability consumed by the extraction engine.
//!
//! The engine needs only hashes and ranked sets, plus a way to apply several
//! writes at once. Keys are the stored byte form of a [`CacheKey`].
//!
//! [`CacheKey`]: super::key::CacheKey

use std::collections::HashMap;

use async_trait::async_trait;

use super::CacheResult;

/// Field name to serialized value
pub type Hash = HashMap<String, String>;

/// One command inside a [`Pipeline`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetHash {
        key: Vec<u8>,
    },
    SetHash {
        key: Vec<u8>,
        fields: Vec<(String, String)>,
    },
    /// Drop every field of the hash, then set `fields`
    ReplaceHash {
        key: Vec<u8>,
        fields: Vec<(String, String)>,
    },
    RemoveFields {
        key: Vec<u8>,
        fields: Vec<String>,
    },
    AddSorted {
        key: Vec<u8>,
        score: f64,
        member: Vec<u8>,
    },
    RangeSorted {
        key: Vec<u8>,
    },
}

/// Reply to one pipelined command, in command order
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Hash(Hash),
    Members(Vec<Vec<u8>>),
    Done,
}

impl Reply {
    /// Hash payload, empty for any other reply
    #[must_use]
    pub fn into_hash(self) -> Hash {
        match self {
            Reply::Hash(hash) => hash,
            _ => Hash::new(),
        }
    }

    #[must_use]
    pub fn into_members(self) -> Vec<Vec<u8>> {
        match self {
            Reply::Members(members) => members,
            _ => Vec::new(),
        }
    }
}

/// Batch of commands applied together.
///
/// Writes within one pipeline are atomic with respect to other clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_hash(&mut self, key: Vec<u8>) -> &mut Self {
        self.commands.push(Command::GetHash { key });
        self
    }

    pub fn set_hash(&mut self, key: Vec<u8>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::SetHash { key, fields });
        self
    }

    pub fn replace_hash(&mut self, key: Vec<u8>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::ReplaceHash { key, fields });
        self
    }

    pub fn remove_fields(&mut self, key: Vec<u8>, fields: Vec<String>) -> &mut Self {
        if !fields.is_empty() {
            self.commands.push(Command::RemoveFields { key, fields });
        }
        self
    }

    pub fn add_sorted(&mut self, key: Vec<u8>, score: f64, member: Vec<u8>) -> &mut Self {
        self.commands.push(Command::AddSorted { key, score, member });
        self
    }

    pub fn range_sorted(&mut self, key: Vec<u8>) -> &mut Self {
        self.commands.push(Command::RangeSorted { key });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

#[async_trait]
pub trait CacheClient: Send + Sync {
    /// All fields of a hash; empty when the key is unknown
    async fn get_hash(&self, key: &[u8]) -> CacheResult<Hash>;

    /// Merge fields into a hash, overwriting fields already present
    async fn set_hash(&self, key: &[u8], fields: &[(String, String)]) -> CacheResult<()>;

    /// Add or re-score a member of a ranked set
    async fn add_sorted(&self, key: &[u8], score: f64, member: &[u8]) -> CacheResult<()>;

    /// All members of a ranked set by ascending score, ties by member bytes
    async fn range_sorted(&self, key: &[u8]) -> CacheResult<Vec<Vec<u8>>>;

    /// Apply a pipeline and return one reply per command
    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<Reply>>;
}
