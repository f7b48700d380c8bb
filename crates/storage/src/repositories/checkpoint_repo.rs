use sqlx::{Row, SqlitePool};

use common::models::CoreSnapshot;

use crate::StoreError;

pub struct CheckpointRepository;

impl CheckpointRepository {
    pub async fn save(pool: &SqlitePool, snapshot: &CoreSnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
                INSERT INTO checkpoints (id, taken_at, last_committed_cycle, body)
                VALUES (1, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    taken_at = excluded.taken_at,
                    last_committed_cycle = excluded.last_committed_cycle,
                    body = excluded.body
            "#,
        )
        .bind(snapshot.taken_at.to_rfc3339())
        .bind(snapshot.last_committed_cycle.map(|id| id.to_string()))
        .bind(body)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn latest(pool: &SqlitePool) -> Result<Option<CoreSnapshot>, StoreError> {
        let row = sqlx::query("SELECT body FROM checkpoints WHERE id = 1")
            .fetch_optional(pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }
}
