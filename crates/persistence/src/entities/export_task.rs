//! Export task entity (queued task row).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the export_tasks table.
#[derive(Debug, Clone, FromRow)]
pub struct ExportTaskEntity {
    pub id: Uuid,
    pub job_id: Uuid,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub available_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
