//! Export job domain models.
//!
//! An export job moves through `PENDING -> PROCESSING -> {COMPLETED | FAILED}`.
//! COMPLETED and FAILED are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Maximum stored length of a failure message, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Format used when the request does not name one.
pub const DEFAULT_EXPORT_FORMAT: &str = "XLSX";

/// Message returned when an export job is accepted.
pub const EXPORT_ACCEPTED_MESSAGE: &str = "Export job initiated successfully";

/// Data category an export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportCategory {
    Product,
    Stock,
    Warehouse,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 3] = [
        ExportCategory::Product,
        ExportCategory::Stock,
        ExportCategory::Warehouse,
    ];

    /// Worksheet name used in the generated artifact.
    pub fn sheet_name(&self) -> &'static str {
        match self {
            ExportCategory::Product => "Products",
            ExportCategory::Stock => "Stocks",
            ExportCategory::Warehouse => "Warehouses",
        }
    }

    /// Lower-cased name used as the artifact filename prefix.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ExportCategory::Product => "product",
            ExportCategory::Stock => "stock",
            ExportCategory::Warehouse => "warehouse",
        }
    }
}

impl std::fmt::Display for ExportCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportCategory::Product => write!(f, "PRODUCT"),
            ExportCategory::Stock => write!(f, "STOCK"),
            ExportCategory::Warehouse => write!(f, "WAREHOUSE"),
        }
    }
}

impl FromStr for ExportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PRODUCT" => Ok(ExportCategory::Product),
            "STOCK" => Ok(ExportCategory::Stock),
            "WAREHOUSE" => Ok(ExportCategory::Warehouse),
            _ => Err(format!("Unknown export category: {}", s)),
        }
    }
}

/// Artifact format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Xlsx => write!(f, "XLSX"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "XLSX" => Ok(ExportFormat::Xlsx),
            "CSV" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unsupported export format: {}", s)),
        }
    }
}

/// Export job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportJobStatus::Completed | ExportJobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// PROCESSING may be re-entered on redelivery.
    pub fn can_transition_to(&self, next: ExportJobStatus) -> bool {
        match (self, next) {
            (ExportJobStatus::Pending, ExportJobStatus::Processing) => true,
            (ExportJobStatus::Processing, ExportJobStatus::Processing) => true,
            (ExportJobStatus::Pending | ExportJobStatus::Processing, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// Lower-case label used for metrics and SSE event names.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExportJobStatus::Pending => "pending",
            ExportJobStatus::Processing => "processing",
            ExportJobStatus::Completed => "completed",
            ExportJobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExportJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportJobStatus::Pending => write!(f, "PENDING"),
            ExportJobStatus::Processing => write!(f, "PROCESSING"),
            ExportJobStatus::Completed => write!(f, "COMPLETED"),
            ExportJobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for ExportJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ExportJobStatus::Pending),
            "PROCESSING" => Ok(ExportJobStatus::Processing),
            "COMPLETED" => Ok(ExportJobStatus::Completed),
            "FAILED" => Ok(ExportJobStatus::Failed),
            _ => Err(format!("Unknown export job status: {}", s)),
        }
    }
}

/// Result of running the export pipeline for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed { file_url: String },
    Failed { reason: String },
}

impl ExportOutcome {
    /// Failure outcome with the message clipped to [`MAX_ERROR_MESSAGE_LEN`].
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        ExportOutcome::Failed {
            reason: truncate_error_message(&reason.to_string()),
        }
    }

    pub fn status(&self) -> ExportJobStatus {
        match self {
            ExportOutcome::Completed { .. } => ExportJobStatus::Completed,
            ExportOutcome::Failed { .. } => ExportJobStatus::Failed,
        }
    }
}

/// Clips a failure message to [`MAX_ERROR_MESSAGE_LEN`] characters.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// Artifact filename: `{category}_{yyyy_MM_dd_HH_mm_ss}.{ext}`.
pub fn export_filename(
    category: ExportCategory,
    format: ExportFormat,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{}_{}.{}",
        category.file_stem(),
        at.format("%Y_%m_%d_%H_%M_%S"),
        format.extension()
    )
}

/// Object key namespaced by owner.
pub fn export_storage_key(owner_id: Uuid, filename: &str) -> String {
    format!("exports/{}/{}", owner_id, filename)
}

/// Export job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub category: ExportCategory,
    pub format: ExportFormat,
    pub status: ExportJobStatus,
    pub file_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    /// New PENDING job with a time-ordered id.
    pub fn new_pending(
        owner_id: Uuid,
        category: ExportCategory,
        format: ExportFormat,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            category,
            format,
            status: ExportJobStatus::Pending,
            file_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the job to PROCESSING. Returns false when the job is terminal.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(ExportJobStatus::Processing) {
            return false;
        }
        self.status = ExportJobStatus::Processing;
        self.updated_at = now;
        true
    }

    /// Applies a terminal outcome. Returns false when the job is already terminal.
    pub fn apply_outcome(&mut self, outcome: &ExportOutcome, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(outcome.status()) {
            return false;
        }
        match outcome {
            ExportOutcome::Completed { file_url } => {
                self.file_url = Some(file_url.clone());
                self.error_message = None;
            }
            ExportOutcome::Failed { reason } => {
                self.file_url = None;
                self.error_message = Some(truncate_error_message(reason));
            }
        }
        self.status = outcome.status();
        self.updated_at = now;
        true
    }

    /// Download location, only once the job has completed.
    pub fn download_location(&self) -> Option<&str> {
        match self.status {
            ExportJobStatus::Completed => self.file_url.as_deref(),
            _ => None,
        }
    }

    /// Checks the result-field invariants for the current status.
    pub fn has_consistent_result(&self) -> bool {
        match self.status {
            ExportJobStatus::Completed => self.file_url.is_some() && self.error_message.is_none(),
            ExportJobStatus::Failed => self.file_url.is_none() && self.error_message.is_some(),
            ExportJobStatus::Pending | ExportJobStatus::Processing => {
                self.file_url.is_none() && self.error_message.is_none()
            }
        }
    }
}

/// Message handed from the request handler to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTask {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub category: ExportCategory,
    pub format: ExportFormat,
}

impl From<&ExportJob> for ExportTask {
    fn from(job: &ExportJob) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id,
            category: job.category,
            format: job.format,
        }
    }
}

/// Status update published on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatusUpdate {
    pub job_id: Uuid,
    pub status: ExportJobStatus,
    pub file_url: Option<String>,
    pub error_message: Option<String>,
}

impl ExportStatusUpdate {
    /// Per-job topic name.
    pub fn topic(&self) -> String {
        export_status_topic(self.job_id)
    }
}

impl From<&ExportJob> for ExportStatusUpdate {
    fn from(job: &ExportJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            file_url: job.file_url.clone(),
            error_message: job.error_message.clone(),
        }
    }
}

pub fn export_status_topic(job_id: Uuid) -> String {
    format!("export-status/{}", job_id)
}

/// Query parameters for initiating an export.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct InitiateExportQuery {
    #[validate(length(min = 1, max = 16, message = "format must be 1-16 characters"))]
    pub format: Option<String>,
}

impl InitiateExportQuery {
    pub fn format_or_default(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_EXPORT_FORMAT)
    }
}

/// Response for an accepted export request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateExportResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Response listing an owner's export jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExportJobsResponse {
    pub data: Vec<ExportJob>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending_job() -> ExportJob {
        ExportJob::new_pending(
            Uuid::new_v4(),
            ExportCategory::Product,
            ExportFormat::Xlsx,
            Utc::now(),
        )
    }

    #[test]
    fn test_category_from_str_is_case_insensitive() {
        assert_eq!(
            ExportCategory::from_str("product").unwrap(),
            ExportCategory::Product
        );
        assert_eq!(
            ExportCategory::from_str("STOCK").unwrap(),
            ExportCategory::Stock
        );
        assert_eq!(
            ExportCategory::from_str("Warehouse").unwrap(),
            ExportCategory::Warehouse
        );
        assert!(ExportCategory::from_str("customer").is_err());
    }

    #[test]
    fn test_category_display_round_trips() {
        for category in ExportCategory::ALL {
            assert_eq!(
                ExportCategory::from_str(&category.to_string()).unwrap(),
                category
            );
        }
    }

    #[test]
    fn test_category_sheet_names() {
        assert_eq!(ExportCategory::Product.sheet_name(), "Products");
        assert_eq!(ExportCategory::Stock.sheet_name(), "Stocks");
        assert_eq!(ExportCategory::Warehouse.sheet_name(), "Warehouses");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::from_str("xlsx").unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_str(" CSV ").unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::from_str("pdf").is_err());
        assert_eq!(
            ExportFormat::from_str(DEFAULT_EXPORT_FORMAT).unwrap(),
            ExportFormat::default()
        );
    }

    #[test]
    fn test_format_content_types() {
        assert_eq!(
            ExportFormat::Xlsx.content_type(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert!(ExportFormat::Csv.content_type().starts_with("text/csv"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExportJobStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert_eq!(
            ExportJobStatus::from_str("completed").unwrap(),
            ExportJobStatus::Completed
        );
    }

    #[test]
    fn test_status_transitions() {
        use ExportJobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            for next in [Pending, Processing, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_export_filename_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(
            export_filename(ExportCategory::Product, ExportFormat::Xlsx, at),
            "product_2024_01_15_10_30_00.xlsx"
        );
        assert_eq!(
            export_filename(ExportCategory::Stock, ExportFormat::Csv, at),
            "stock_2024_01_15_10_30_00.csv"
        );
    }

    #[test]
    fn test_export_storage_key() {
        let owner = Uuid::nil();
        assert_eq!(
            export_storage_key(owner, "product_2024_01_15_10_30_00.xlsx"),
            "exports/00000000-0000-0000-0000-000000000000/product_2024_01_15_10_30_00.xlsx"
        );
    }

    #[test]
    fn test_new_pending_job() {
        let job = pending_job();
        assert_eq!(job.status, ExportJobStatus::Pending);
        assert_eq!(job.created_at, job.updated_at);
        assert!(job.download_location().is_none());
        assert!(job.has_consistent_result());
    }

    #[test]
    fn test_apply_completed_outcome() {
        let mut job = pending_job();
        assert!(job.begin_processing(Utc::now()));

        let outcome = ExportOutcome::Completed {
            file_url: "https://cdn.example.com/exports/x.xlsx".to_string(),
        };
        assert!(job.apply_outcome(&outcome, Utc::now()));
        assert_eq!(job.status, ExportJobStatus::Completed);
        assert_eq!(
            job.download_location(),
            Some("https://cdn.example.com/exports/x.xlsx")
        );
        assert!(job.has_consistent_result());
    }

    #[test]
    fn test_terminal_job_rejects_further_transitions() {
        let mut job = pending_job();
        job.apply_outcome(&ExportOutcome::failed("No data to export"), Utc::now());

        assert!(!job.begin_processing(Utc::now()));
        assert!(!job.apply_outcome(
            &ExportOutcome::Completed {
                file_url: "https://late.example.com".to_string()
            },
            Utc::now()
        ));
        assert_eq!(job.status, ExportJobStatus::Failed);
        assert!(job.file_url.is_none());
        assert_eq!(job.error_message.as_deref(), Some("No data to export"));
    }

    #[test]
    fn test_failed_outcome_truncates_message() {
        let outcome = ExportOutcome::failed("x".repeat(MAX_ERROR_MESSAGE_LEN + 50));
        match outcome {
            ExportOutcome::Failed { reason } => {
                assert_eq!(reason.chars().count(), MAX_ERROR_MESSAGE_LEN)
            }
            _ => panic!("Expected failed outcome"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let message = "é".repeat(MAX_ERROR_MESSAGE_LEN + 1);
        let truncated = truncate_error_message(&message);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
        assert_eq!(truncate_error_message("short"), "short");
    }

    #[test]
    fn test_task_from_job() {
        let job = pending_job();
        let task = ExportTask::from(&job);
        assert_eq!(task.job_id, job.id);
        assert_eq!(task.owner_id, job.owner_id);
        assert_eq!(task.category, job.category);

        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("jobId").is_some());
        assert_eq!(json["category"], "PRODUCT");
        assert_eq!(json["format"], "XLSX");
    }

    #[test]
    fn test_status_update_topic() {
        let update = ExportStatusUpdate {
            job_id: Uuid::nil(),
            status: ExportJobStatus::Failed,
            file_url: None,
            error_message: Some("boom".to_string()),
        };
        assert_eq!(
            update.topic(),
            "export-status/00000000-0000-0000-0000-000000000000"
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["errorMessage"], "boom");
        assert!(json["fileUrl"].is_null());
    }

    #[test]
    fn test_initiate_query_validation() {
        let query = InitiateExportQuery { format: None };
        assert!(query.validate().is_ok());
        assert_eq!(query.format_or_default(), "XLSX");

        let query = InitiateExportQuery {
            format: Some(String::new()),
        };
        assert!(query.validate().is_err());

        let query = InitiateExportQuery {
            format: Some("x".repeat(17)),
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_job_json_is_camel_case() {
        let job = pending_job();
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("ownerId").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["status"], "PENDING");
    }
}
