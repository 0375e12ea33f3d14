//! Export job entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::ExportJob;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the export_jobs table.
#[derive(Debug, Clone, FromRow)]
pub struct ExportJobEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub category: String,
    pub format: String,
    pub status: String,
    pub file_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ExportJobEntity> for ExportJob {
    type Error = String;

    fn try_from(entity: ExportJobEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            owner_id: entity.owner_id,
            category: entity.category.parse()?,
            format: entity.format.parse()?,
            status: entity.status.parse()?,
            file_url: entity.file_url,
            error_message: entity.error_message,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
