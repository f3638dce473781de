//! `sqlx`-backed [`Saver`] implementations, gated behind the `sqlite` and
//! `postgres` features (spec §4.6 grounding: teacher's
//! `runtimes/checkpointer_sqlite.rs` connection/migration pattern,
//! generalized from the teacher's flat `session_id` key to the
//! `(lineage, namespace, checkpoint_id)` addressing scheme.).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use super::model::{Checkpoint, CheckpointMetadata, CheckpointTuple, CheckpointRef, PendingWrite};
use super::saver::{CheckpointerError, ListFilter, PutFullRequest, PutRequest, PutWritesRequest, Result, Saver};

fn to_backend_err(err: sqlx::Error) -> CheckpointerError {
    CheckpointerError::Backend { message: err.to_string() }
}

#[cfg(feature = "sqlite")]
mod sqlite_impl {
    use super::*;
    use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

    /// SQLite-backed [`Saver`]. Runs embedded migrations on connect when the
    /// `sqlite-migrations` feature is enabled.
    pub struct SqliteSaver {
        pool: SqlitePool,
    }

    impl SqliteSaver {
        #[instrument(skip(database_url))]
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pool = SqlitePool::connect(database_url).await.map_err(to_backend_err)?;
            #[cfg(feature = "sqlite-migrations")]
            {
                sqlx::migrate!("./migrations/sqlite").run(&pool).await.map_err(|e| CheckpointerError::Backend {
                    message: e.to_string(),
                })?;
            }
            Ok(Self { pool })
        }

        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }

        fn row_to_tuple(config: &CheckpointRef, row: SqliteRow) -> Result<CheckpointTuple> {
            let checkpoint_id: String = row.try_get("checkpoint_id").map_err(to_backend_err)?;
            let parent: Option<String> = row.try_get("parent_checkpoint_id").map_err(to_backend_err)?;
            let checkpoint_blob: Vec<u8> = row.try_get("checkpoint").map_err(to_backend_err)?;
            let metadata_blob: Vec<u8> = row.try_get("metadata").map_err(to_backend_err)?;
            let checkpoint: Checkpoint = serde_json::from_slice(&checkpoint_blob)?;
            let metadata: CheckpointMetadata = serde_json::from_slice(&metadata_blob)?;
            Ok(CheckpointTuple {
                config: config.clone().with_checkpoint_id(checkpoint_id),
                checkpoint,
                metadata,
                parent_config: parent.map(|pid| config.clone().with_checkpoint_id(pid)),
                pending_writes: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl Saver for SqliteSaver {
        async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
            if config.lineage_id.is_empty() {
                return Err(CheckpointerError::MissingLineage);
            }
            let row = if config.checkpoint_id.is_empty() {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE lineage_id = ? AND namespace = ? ORDER BY seq DESC LIMIT 1",
                )
                .bind(&config.lineage_id)
                .bind(&config.namespace)
                .fetch_optional(&self.pool)
                .await
            } else {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE lineage_id = ? AND namespace = ? AND checkpoint_id = ?",
                )
                .bind(&config.lineage_id)
                .bind(&config.namespace)
                .bind(&config.checkpoint_id)
                .fetch_optional(&self.pool)
                .await
            }
            .map_err(to_backend_err)?;

            let Some(row) = row else { return Ok(None) };
            let mut tuple = Self::row_to_tuple(config, row)?;
            tuple.pending_writes = fetch_writes(&self.pool, config, &tuple.config.checkpoint_id).await?;
            Ok(Some(tuple))
        }

        async fn list(&self, config: &CheckpointRef, filter: &ListFilter) -> Result<Vec<CheckpointTuple>> {
            let limit = filter.limit.unwrap_or(1000).min(1000) as i64;
            let before_seq: Option<i64> = match &filter.before {
                Some(cfg) => sqlx::query(
                    "SELECT seq FROM checkpoints WHERE lineage_id = ? AND namespace = ? AND checkpoint_id = ?",
                )
                .bind(&cfg.lineage_id)
                .bind(&cfg.namespace)
                .bind(&cfg.checkpoint_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(to_backend_err)?
                .map(|row| row.try_get::<i64, _>("seq"))
                .transpose()
                .map_err(to_backend_err)?,
                None => None,
            };

            let rows = sqlx::query(
                "SELECT * FROM checkpoints WHERE lineage_id = ? AND namespace = ? AND (? IS NULL OR seq < ?) ORDER BY seq DESC LIMIT ?",
            )
            .bind(&config.lineage_id)
            .bind(&config.namespace)
            .bind(before_seq)
            .bind(before_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(to_backend_err)?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let mut tuple = Self::row_to_tuple(config, row)?;
                if !filter.metadata.is_empty() {
                    let matches = filter.metadata.iter().all(|(k, v)| tuple.metadata.extra.get(k) == Some(v));
                    if !matches {
                        continue;
                    }
                }
                tuple.pending_writes = fetch_writes(&self.pool, config, &tuple.config.checkpoint_id).await?;
                out.push(tuple);
            }
            Ok(out)
        }

        async fn put(&self, req: PutRequest) -> Result<CheckpointRef> {
            if req.config.lineage_id.is_empty() {
                return Err(CheckpointerError::MissingLineage);
            }
            let parent = if req.config.checkpoint_id.is_empty() { None } else { Some(req.config.checkpoint_id.clone()) };
            let checkpoint_blob = serde_json::to_vec(&req.checkpoint)?;
            let metadata_blob = serde_json::to_vec(&req.metadata)?;
            let seq: i64 = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM checkpoints WHERE lineage_id = ? AND namespace = ?",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(to_backend_err)?
            .try_get("next_seq")
            .map_err(to_backend_err)?;

            sqlx::query(
                "INSERT OR REPLACE INTO checkpoints (lineage_id, namespace, checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at, seq) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .bind(&req.checkpoint.id)
            .bind(&parent)
            .bind(&checkpoint_blob)
            .bind(&metadata_blob)
            .bind(Utc::now().to_rfc3339())
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(to_backend_err)?;

            let _ = req.new_versions;
            Ok(req.config.with_checkpoint_id(req.checkpoint.id))
        }

        async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
            for write in &req.writes {
                let value_blob = serde_json::to_vec(&write.value)?;
                sqlx::query(
                    "INSERT OR REPLACE INTO checkpoint_writes (lineage_id, namespace, checkpoint_id, task_id, channel, value, sequence, task_path) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&req.config.lineage_id)
                .bind(&req.config.namespace)
                .bind(&req.config.checkpoint_id)
                .bind(&write.task_id)
                .bind(&write.channel)
                .bind(&value_blob)
                .bind(write.sequence as i64)
                .bind(&req.task_path)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            }
            Ok(())
        }

        async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointRef> {
            let mut tx = self.pool.begin().await.map_err(to_backend_err)?;
            let parent = if req.config.checkpoint_id.is_empty() { None } else { Some(req.config.checkpoint_id.clone()) };
            let checkpoint_blob = serde_json::to_vec(&req.checkpoint)?;
            let metadata_blob = serde_json::to_vec(&req.metadata)?;
            let seq: i64 = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM checkpoints WHERE lineage_id = ? AND namespace = ?",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .fetch_one(&mut *tx)
            .await
            .map_err(to_backend_err)?
            .try_get("next_seq")
            .map_err(to_backend_err)?;

            sqlx::query(
                "INSERT OR REPLACE INTO checkpoints (lineage_id, namespace, checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at, seq) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .bind(&req.checkpoint.id)
            .bind(&parent)
            .bind(&checkpoint_blob)
            .bind(&metadata_blob)
            .bind(Utc::now().to_rfc3339())
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(to_backend_err)?;

            for write in &req.pending_writes {
                let value_blob = serde_json::to_vec(&write.value)?;
                sqlx::query(
                    "INSERT OR REPLACE INTO checkpoint_writes (lineage_id, namespace, checkpoint_id, task_id, channel, value, sequence, task_path) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&req.config.lineage_id)
                .bind(&req.config.namespace)
                .bind(&req.checkpoint.id)
                .bind(&write.task_id)
                .bind(&write.channel)
                .bind(&value_blob)
                .bind(write.sequence as i64)
                .bind(&write.task_path)
                .execute(&mut *tx)
                .await
                .map_err(to_backend_err)?;
            }

            tx.commit().await.map_err(to_backend_err)?;
            let _ = req.new_versions;
            Ok(req.config.with_checkpoint_id(req.checkpoint.id))
        }

        async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
            sqlx::query("DELETE FROM checkpoint_writes WHERE lineage_id = ?")
                .bind(lineage_id)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            sqlx::query("DELETE FROM checkpoints WHERE lineage_id = ?")
                .bind(lineage_id)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.pool.close().await;
            Ok(())
        }
    }

    async fn fetch_writes(pool: &SqlitePool, config: &CheckpointRef, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        let rows = sqlx::query(
            "SELECT task_id, channel, value, sequence, task_path FROM checkpoint_writes WHERE lineage_id = ? AND namespace = ? AND checkpoint_id = ? ORDER BY sequence ASC",
        )
        .bind(&config.lineage_id)
        .bind(&config.namespace)
        .bind(checkpoint_id)
        .fetch_all(pool)
        .await
        .map_err(to_backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value_blob: Vec<u8> = row.try_get("value").map_err(to_backend_err)?;
            out.push(PendingWrite {
                task_id: row.try_get("task_id").map_err(to_backend_err)?,
                channel: row.try_get("channel").map_err(to_backend_err)?,
                value: serde_json::from_slice::<Value>(&value_blob)?,
                sequence: row.try_get::<i64, _>("sequence").map_err(to_backend_err)? as u64,
                task_path: row.try_get("task_path").map_err(to_backend_err)?,
            });
        }
        Ok(out)
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite_impl::SqliteSaver;

#[cfg(feature = "postgres")]
mod postgres_impl {
    use super::*;
    use sqlx::{PgPool, Row};

    /// Postgres-backed [`Saver`], structurally identical to [`super::SqliteSaver`]
    /// but using `PgPool` and `$n` bind placeholders.
    pub struct PostgresSaver {
        pool: PgPool,
    }

    impl PostgresSaver {
        #[instrument(skip(database_url))]
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pool = PgPool::connect(database_url).await.map_err(to_backend_err)?;
            #[cfg(feature = "postgres-migrations")]
            {
                sqlx::migrate!("./migrations/postgres").run(&pool).await.map_err(|e| CheckpointerError::Backend {
                    message: e.to_string(),
                })?;
            }
            Ok(Self { pool })
        }

        pub fn from_pool(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl Saver for PostgresSaver {
        async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
            if config.lineage_id.is_empty() {
                return Err(CheckpointerError::MissingLineage);
            }
            let row = if config.checkpoint_id.is_empty() {
                sqlx::query(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata FROM checkpoints WHERE lineage_id = $1 AND namespace = $2 ORDER BY seq DESC LIMIT 1",
                )
                .bind(&config.lineage_id)
                .bind(&config.namespace)
                .fetch_optional(&self.pool)
                .await
            } else {
                sqlx::query(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata FROM checkpoints WHERE lineage_id = $1 AND namespace = $2 AND checkpoint_id = $3",
                )
                .bind(&config.lineage_id)
                .bind(&config.namespace)
                .bind(&config.checkpoint_id)
                .fetch_optional(&self.pool)
                .await
            }
            .map_err(to_backend_err)?;

            let Some(row) = row else { return Ok(None) };
            let checkpoint_id: String = row.try_get("checkpoint_id").map_err(to_backend_err)?;
            let parent: Option<String> = row.try_get("parent_checkpoint_id").map_err(to_backend_err)?;
            let checkpoint: Value = row.try_get("checkpoint").map_err(to_backend_err)?;
            let metadata: Value = row.try_get("metadata").map_err(to_backend_err)?;
            let checkpoint: Checkpoint = serde_json::from_value(checkpoint)?;
            let metadata: CheckpointMetadata = serde_json::from_value(metadata)?;
            let pending_writes = fetch_writes(&self.pool, config, &checkpoint_id).await?;

            Ok(Some(CheckpointTuple {
                config: config.clone().with_checkpoint_id(checkpoint_id),
                checkpoint,
                metadata,
                parent_config: parent.map(|pid| config.clone().with_checkpoint_id(pid)),
                pending_writes,
            }))
        }

        async fn list(&self, config: &CheckpointRef, filter: &ListFilter) -> Result<Vec<CheckpointTuple>> {
            let limit = filter.limit.unwrap_or(1000).min(1000) as i64;
            let rows = sqlx::query(
                "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata FROM checkpoints WHERE lineage_id = $1 AND namespace = $2 ORDER BY seq DESC LIMIT $3",
            )
            .bind(&config.lineage_id)
            .bind(&config.namespace)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(to_backend_err)?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let checkpoint_id: String = row.try_get("checkpoint_id").map_err(to_backend_err)?;
                let parent: Option<String> = row.try_get("parent_checkpoint_id").map_err(to_backend_err)?;
                let checkpoint: Value = row.try_get("checkpoint").map_err(to_backend_err)?;
                let metadata: Value = row.try_get("metadata").map_err(to_backend_err)?;
                let checkpoint: Checkpoint = serde_json::from_value(checkpoint)?;
                let metadata: CheckpointMetadata = serde_json::from_value(metadata)?;
                if !filter.metadata.is_empty() {
                    let matches = filter.metadata.iter().all(|(k, v)| metadata.extra.get(k) == Some(v));
                    if !matches {
                        continue;
                    }
                }
                let pending_writes = fetch_writes(&self.pool, config, &checkpoint_id).await?;
                out.push(CheckpointTuple {
                    config: config.clone().with_checkpoint_id(checkpoint_id),
                    checkpoint,
                    metadata,
                    parent_config: parent.map(|pid| config.clone().with_checkpoint_id(pid)),
                    pending_writes,
                });
            }
            Ok(out)
        }

        async fn put(&self, req: PutRequest) -> Result<CheckpointRef> {
            if req.config.lineage_id.is_empty() {
                return Err(CheckpointerError::MissingLineage);
            }
            let parent = if req.config.checkpoint_id.is_empty() { None } else { Some(req.config.checkpoint_id.clone()) };
            let checkpoint_json = serde_json::to_value(&req.checkpoint)?;
            let metadata_json = serde_json::to_value(&req.metadata)?;
            let seq: i64 = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM checkpoints WHERE lineage_id = $1 AND namespace = $2",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(to_backend_err)?
            .try_get("next_seq")
            .map_err(to_backend_err)?;

            sqlx::query(
                "INSERT INTO checkpoints (lineage_id, namespace, checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at, seq) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (lineage_id, namespace, checkpoint_id) DO UPDATE SET parent_checkpoint_id = excluded.parent_checkpoint_id, checkpoint = excluded.checkpoint, metadata = excluded.metadata, created_at = excluded.created_at, seq = excluded.seq",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .bind(&req.checkpoint.id)
            .bind(&parent)
            .bind(&checkpoint_json)
            .bind(&metadata_json)
            .bind(Utc::now())
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(to_backend_err)?;

            let _ = req.new_versions;
            Ok(req.config.with_checkpoint_id(req.checkpoint.id))
        }

        async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
            for write in &req.writes {
                let value_json = serde_json::to_value(&write.value)?;
                sqlx::query(
                    "INSERT INTO checkpoint_writes (lineage_id, namespace, checkpoint_id, task_id, channel, value, sequence, task_path) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (lineage_id, namespace, checkpoint_id, task_id, channel) DO UPDATE SET value = excluded.value, sequence = excluded.sequence, task_path = excluded.task_path",
                )
                .bind(&req.config.lineage_id)
                .bind(&req.config.namespace)
                .bind(&req.config.checkpoint_id)
                .bind(&write.task_id)
                .bind(&write.channel)
                .bind(&value_json)
                .bind(write.sequence as i64)
                .bind(&req.task_path)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            }
            Ok(())
        }

        async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointRef> {
            let mut tx = self.pool.begin().await.map_err(to_backend_err)?;
            let parent = if req.config.checkpoint_id.is_empty() { None } else { Some(req.config.checkpoint_id.clone()) };
            let checkpoint_json = serde_json::to_value(&req.checkpoint)?;
            let metadata_json = serde_json::to_value(&req.metadata)?;
            let seq: i64 = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM checkpoints WHERE lineage_id = $1 AND namespace = $2",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .fetch_one(&mut *tx)
            .await
            .map_err(to_backend_err)?
            .try_get("next_seq")
            .map_err(to_backend_err)?;

            sqlx::query(
                "INSERT INTO checkpoints (lineage_id, namespace, checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at, seq) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (lineage_id, namespace, checkpoint_id) DO UPDATE SET parent_checkpoint_id = excluded.parent_checkpoint_id, checkpoint = excluded.checkpoint, metadata = excluded.metadata, created_at = excluded.created_at, seq = excluded.seq",
            )
            .bind(&req.config.lineage_id)
            .bind(&req.config.namespace)
            .bind(&req.checkpoint.id)
            .bind(&parent)
            .bind(&checkpoint_json)
            .bind(&metadata_json)
            .bind(Utc::now())
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(to_backend_err)?;

            for write in &req.pending_writes {
                let value_json = serde_json::to_value(&write.value)?;
                sqlx::query(
                    "INSERT INTO checkpoint_writes (lineage_id, namespace, checkpoint_id, task_id, channel, value, sequence, task_path) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (lineage_id, namespace, checkpoint_id, task_id, channel) DO UPDATE SET value = excluded.value, sequence = excluded.sequence, task_path = excluded.task_path",
                )
                .bind(&req.config.lineage_id)
                .bind(&req.config.namespace)
                .bind(&req.checkpoint.id)
                .bind(&write.task_id)
                .bind(&write.channel)
                .bind(&value_json)
                .bind(write.sequence as i64)
                .bind(&write.task_path)
                .execute(&mut *tx)
                .await
                .map_err(to_backend_err)?;
            }

            tx.commit().await.map_err(to_backend_err)?;
            let _ = req.new_versions;
            Ok(req.config.with_checkpoint_id(req.checkpoint.id))
        }

        async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
            sqlx::query("DELETE FROM checkpoint_writes WHERE lineage_id = $1")
                .bind(lineage_id)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            sqlx::query("DELETE FROM checkpoints WHERE lineage_id = $1")
                .bind(lineage_id)
                .execute(&self.pool)
                .await
                .map_err(to_backend_err)?;
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.pool.close().await;
            Ok(())
        }
    }
}

    async fn fetch_writes(pool: &PgPool, config: &CheckpointRef, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        let rows = sqlx::query(
            "SELECT task_id, channel, value, sequence, task_path FROM checkpoint_writes WHERE lineage_id = $1 AND namespace = $2 AND checkpoint_id = $3 ORDER BY sequence ASC",
        )
        .bind(&config.lineage_id)
        .bind(&config.namespace)
        .bind(checkpoint_id)
        .fetch_all(pool)
        .await
        .map_err(to_backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Value = row.try_get("value").map_err(to_backend_err)?;
            out.push(PendingWrite {
                task_id: row.try_get("task_id").map_err(to_backend_err)?,
                channel: row.try_get("channel").map_err(to_backend_err)?,
                value,
                sequence: row.try_get::<i64, _>("sequence").map_err(to_backend_err)? as u64,
                task_path: row.try_get("task_path").map_err(to_backend_err)?,
            });
        }
        Ok(out)
    }
}

#[cfg(feature = "postgres")]
pub use postgres_impl::PostgresSaver;
