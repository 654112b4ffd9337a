//! Persistent cache client backed by SQLite.
//!
//! Hashes and ranked sets live in two tables keyed by the encoded cache key.
//! A pipeline runs inside one transaction so its writes land together.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{SqliteConnection, SqlitePool};

use super::CacheResult;
use super::client::{CacheClient, Command, Hash, Pipeline, Reply};

const SCHEMA_SQL: &str = r#"
-- Hash fields: one row per (key, field)
CREATE TABLE IF NOT EXISTS hashes (
    key BLOB NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, field)
);

-- Ranked set members: one row per (key, member)
CREATE TABLE IF NOT EXISTS sorted_sets (
    key BLOB NOT NULL,
    member BLOB NOT NULL,
    score REAL NOT NULL,
    PRIMARY KEY (key, member)
);

-- Range queries walk a set in score order
CREATE INDEX IF NOT EXISTS idx_sorted_sets_score ON sorted_sets(key, score, member);
"#;

#[derive(Clone)]
pub struct SqliteCacheClient {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteCacheClient {
    /// Open an existing cache database or create a new one at `path`
    pub async fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn get_hash_on(conn: &mut SqliteConnection, key: &[u8]) -> CacheResult<Hash> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT field, value FROM hashes WHERE key = ?")
        .bind(key)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().collect())
}

async fn set_hash_on(
    conn: &mut SqliteConnection,
    key: &[u8],
    fields: &[(String, String)],
) -> CacheResult<()> {
    for (field, value) in fields {
        sqlx::query(
            r#"
            INSERT INTO hashes (key, field, value)
            VALUES (?, ?, ?)
            ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn remove_fields_on(conn: &mut SqliteConnection, key: &[u8], fields: &[String]) -> CacheResult<()> {
    for field in fields {
        sqlx::query("DELETE FROM hashes WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn replace_hash_on(
    conn: &mut SqliteConnection,
    key: &[u8],
    fields: &[(String, String)],
) -> CacheResult<()> {
    sqlx::query("DELETE FROM hashes WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    set_hash_on(conn, key, fields).await
}

async fn add_sorted_on(
    conn: &mut SqliteConnection,
    key: &[u8],
    score: f64,
    member: &[u8],
) -> CacheResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sorted_sets (key, member, score)
        VALUES (?, ?, ?)
        ON CONFLICT(key, member) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(key)
    .bind(member)
    .bind(score)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn range_sorted_on(conn: &mut SqliteConnection, key: &[u8]) -> CacheResult<Vec<Vec<u8>>> {
    let rows: Vec<(Vec<u8>,)> =
        sqlx::query_as("SELECT member FROM sorted_sets WHERE key = ? ORDER BY score ASC, member ASC")
            .bind(key)
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(|(member,)| member).collect())
}

async fn apply_on(conn: &mut SqliteConnection, command: Command) -> CacheResult<Reply> {
    Ok(match command {
        Command::GetHash { key } => Reply::Hash(get_hash_on(conn, &key).await?),
        Command::SetHash { key, fields } => {
            set_hash_on(conn, &key, &fields).await?;
            Reply::Done
        }
        Command::ReplaceHash { key, fields } => {
            replace_hash_on(conn, &key, &fields).await?;
            Reply::Done
        }
        Command::RemoveFields { key, fields } => {
            remove_fields_on(conn, &key, &fields).await?;
            Reply::Done
        }
        Command::AddSorted { key, score, member } => {
            add_sorted_on(conn, &key, score, &member).await?;
            Reply::Done
        }
        Command::RangeSorted { key } => Reply::Members(range_sorted_on(conn, &key).await?),
    })
}

#[async_trait]
impl CacheClient for SqliteCacheClient {
    async fn get_hash(&self, key: &[u8]) -> CacheResult<Hash> {
        let mut conn = self.pool.acquire().await?;
        get_hash_on(&mut conn, key).await
    }

    async fn set_hash(&self, key: &[u8], fields: &[(String, String)]) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        set_hash_on(&mut tx, key, fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_sorted(&self, key: &[u8], score: f64, member: &[u8]) -> CacheResult<()> {
        let mut conn = self.pool.acquire().await?;
        add_sorted_on(&mut conn, key, score, member).await
    }

    async fn range_sorted(&self, key: &[u8]) -> CacheResult<Vec<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        range_sorted_on(&mut conn, key).await
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<Reply>> {
        let mut tx = self.pool.begin().await?;
        let mut replies = Vec::with_capacity(pipeline.len());
        for command in pipeline.into_commands() {
            replies.push(apply_on(&mut tx, command).await?);
        }
        tx.commit().await?;
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn hashes_persist_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.sqlite");
        {
            let client = SqliteCacheClient::open(&path).await.unwrap();
            client
                .set_hash(b"k\x01a", &[("status".into(), "COMPLETED".into())])
                .await
                .unwrap();
            client.close().await;
        }
        let client = SqliteCacheClient::open(&path).await.unwrap();
        let hash = client.get_hash(b"k\x01a").await.unwrap();
        assert_eq!(hash.get("status").map(String::as_str), Some("COMPLETED"));
    }

    #[tokio::test]
    async fn replaced_hashes_drop_stale_fields() {
        let temp = TempDir::new().unwrap();
        let client = SqliteCacheClient::open(&temp.path().join("cache.sqlite"))
            .await
            .unwrap();
        client
            .set_hash(
                b"content",
                &[("title".into(), "Old".into()), ("_cache_version".into(), "v1".into())],
            )
            .await
            .unwrap();

        let mut pipeline = Pipeline::new();
        pipeline
            .replace_hash(b"content".to_vec(), vec![("title".into(), "New".into())])
            .remove_fields(b"info".to_vec(), vec!["cache_version".into()])
            .get_hash(b"content".to_vec());
        let replies = client.execute(pipeline).await.unwrap();
        assert_eq!(
            replies[2].clone().into_hash(),
            Hash::from([("title".to_string(), "New".to_string())])
        );
    }

    #[tokio::test]
    async fn pipeline_writes_then_reads() {
        let temp = TempDir::new().unwrap();
        let client = SqliteCacheClient::open(&temp.path().join("cache.sqlite"))
            .await
            .unwrap();
        let mut pipeline = Pipeline::new();
        pipeline
            .add_sorted(b"s".to_vec(), 2.0, b"second".to_vec())
            .add_sorted(b"s".to_vec(), 1.0, b"first".to_vec())
            .range_sorted(b"s".to_vec());
        let replies = client.execute(pipeline).await.unwrap();
        assert_eq!(
            replies[2].clone().into_members(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }
}
