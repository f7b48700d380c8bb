use sqlx::{Row, SqlitePool};

use common::models::CycleRecord;

use crate::StoreError;

pub struct CycleRecordRepository;

impl CycleRecordRepository {
    /// Appends one record. A second insert for the same cycle id fails.
    pub async fn insert(pool: &SqlitePool, record: &CycleRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        sqlx::query(
            r#"
                INSERT INTO cycle_records (cycle_id, symbol, started_at, outcome, body)
                VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.cycle_id.to_string())
        .bind(&record.symbol)
        .bind(record.started_at.to_rfc3339())
        .bind(format!("{:?}", record.outcome))
        .bind(body)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent(pool: &SqlitePool, limit: u32) -> Result<Vec<CycleRecord>, StoreError> {
        let rows = sqlx::query("SELECT body FROM cycle_records ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body")?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }
}
