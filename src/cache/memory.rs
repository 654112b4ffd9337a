//! In-process cache client.
//!
//! Used by tests and by runs that opt out of a persistent cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CacheResult;
use super::client::{CacheClient, Command, Hash, Pipeline, Reply};

#[derive(Debug, Default)]
struct MemoryState {
    hashes: HashMap<Vec<u8>, Hash>,
    sorted: HashMap<Vec<u8>, Vec<(f64, Vec<u8>)>>,
}

impl MemoryState {
    fn apply(&mut self, command: Command) -> Reply {
        match command {
            Command::GetHash { key } => Reply::Hash(self.hashes.get(&key).cloned().unwrap_or_default()),
            Command::SetHash { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
                Reply::Done
            }
            Command::ReplaceHash { key, fields } => {
                self.hashes.insert(key, fields.into_iter().collect());
                Reply::Done
            }
            Command::RemoveFields { key, fields } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    for field in &fields {
                        hash.remove(field);
                    }
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
                Reply::Done
            }
            Command::AddSorted { key, score, member } => {
                let set = self.sorted.entry(key).or_default();
                set.retain(|(_, m)| *m != member);
                set.push((score, member));
                set.sort_by(|(sa, ma), (sb, mb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
                Reply::Done
            }
            Command::RangeSorted { key } => Reply::Members(
                self.sorted
                    .get(&key)
                    .map(|set| set.iter().map(|(_, m)| m.clone()).collect())
                    .unwrap_or_default(),
            ),
        }
    }
}

/// Hashes and ranked sets held behind one mutex; cloning shares the store
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCacheClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hashes stored, for diagnostics
    #[must_use]
    pub fn hash_count(&self) -> usize {
        self.state.lock().hashes.len()
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get_hash(&self, key: &[u8]) -> CacheResult<Hash> {
        Ok(self.state.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set_hash(&self, key: &[u8], fields: &[(String, String)]) -> CacheResult<()> {
        self.state.lock().apply(Command::SetHash {
            key: key.to_vec(),
            fields: fields.to_vec(),
        });
        Ok(())
    }

    async fn add_sorted(&self, key: &[u8], score: f64, member: &[u8]) -> CacheResult<()> {
        self.state.lock().apply(Command::AddSorted {
            key: key.to_vec(),
            score,
            member: member.to_vec(),
        });
        Ok(())
    }

    async fn range_sorted(&self, key: &[u8]) -> CacheResult<Vec<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .apply(Command::RangeSorted { key: key.to_vec() })
            .into_members())
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<Reply>> {
        let mut state = self.state.lock();
        Ok(pipeline
            .into_commands()
            .into_iter()
            .map(|command| state.apply(command))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_merge_fields() {
        let client = MemoryCacheClient::new();
        client
            .set_hash(b"k", &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();
        client.set_hash(b"k", &[("b".into(), "3".into())]).await.unwrap();
        let hash = client.get_hash(b"k").await.unwrap();
        assert_eq!(hash.get("a").map(String::as_str), Some("1"));
        assert_eq!(hash.get("b").map(String::as_str), Some("3"));
        assert!(client.get_hash(b"missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaced_hashes_lose_old_fields() {
        let client = MemoryCacheClient::new();
        client
            .set_hash(b"k", &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();

        let mut pipeline = Pipeline::new();
        pipeline.replace_hash(b"k".to_vec(), vec![("b".into(), "3".into())]);
        client.execute(pipeline).await.unwrap();
        let hash = client.get_hash(b"k").await.unwrap();
        assert_eq!(hash, Hash::from([("b".to_string(), "3".to_string())]));

        let mut pipeline = Pipeline::new();
        pipeline.remove_fields(b"k".to_vec(), vec!["b".into(), "missing".into()]);
        client.execute(pipeline).await.unwrap();
        assert!(client.get_hash(b"k").await.unwrap().is_empty());
        assert_eq!(client.hash_count(), 0);
    }

    #[tokio::test]
    async fn ranked_sets_order_by_score_then_member() {
        let client = MemoryCacheClient::new();
        client.add_sorted(b"s", 3.0, b"c").await.unwrap();
        client.add_sorted(b"s", 1.0, b"b").await.unwrap();
        client.add_sorted(b"s", 1.0, b"a").await.unwrap();
        // Re-scoring moves the member rather than duplicating it
        client.add_sorted(b"s", 0.0, b"c").await.unwrap();
        let members = client.range_sorted(b"s").await.unwrap();
        assert_eq!(members, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn pipeline_replies_in_order() {
        let client = MemoryCacheClient::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .set_hash(b"h".to_vec(), vec![("x".into(), "1".into())])
            .add_sorted(b"s".to_vec(), 1.0, b"h".to_vec())
            .get_hash(b"h".to_vec())
            .range_sorted(b"s".to_vec());
        let replies = client.execute(pipeline).await.unwrap();
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], Reply::Done);
        assert_eq!(replies[2].clone().into_hash().get("x").map(String::as_str), Some("1"));
        assert_eq!(replies[3].clone().into_members(), vec![b"h".to_vec()]);
    }
}
