//! Export pipeline wiring.
//!
//! Picks the job store, task channel and data source for the configured
//! backend and hands out the services built on them.

use domain::services::{
    BroadcastStatusNotifier, ExportJobStore, ExportQueryService, ExportReconciler,
    ExportRequestHandler, ExportWorker, InMemoryExportJobStore, InMemoryInventory,
    InMemoryTaskChannel, InventoryDataSource, ObjectStorage, SpreadsheetGenerator, StorageError,
    TaskChannel, WorkerSettings,
};
use chrono::Utc;
use domain::models::{Product, Stock, Warehouse};
use persistence::repositories::{ExportJobRepository, ExportTaskQueue, InventoryRepository};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::services::object_storage::build_object_storage;

/// Shared collaborators of the export services.
#[derive(Clone)]
pub struct ExportPipeline {
    pub store: Arc<dyn ExportJobStore>,
    pub channel: Arc<dyn TaskChannel>,
    pub data_source: Arc<dyn InventoryDataSource>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<BroadcastStatusNotifier>,
}

impl ExportPipeline {
    pub fn from_parts(
        store: Arc<dyn ExportJobStore>,
        channel: Arc<dyn TaskChannel>,
        data_source: Arc<dyn InventoryDataSource>,
        storage: Arc<dyn ObjectStorage>,
        notifier: Arc<BroadcastStatusNotifier>,
    ) -> Self {
        Self {
            store,
            channel,
            data_source,
            storage,
            notifier,
        }
    }

    /// Postgres-backed job store, task queue and inventory reads.
    pub fn postgres(pool: PgPool, config: &Config) -> Result<Self, StorageError> {
        Ok(Self::from_parts(
            Arc::new(ExportJobRepository::new(pool.clone())),
            Arc::new(ExportTaskQueue::new(
                pool.clone(),
                config.export.visibility_timeout(),
            )),
            Arc::new(InventoryRepository::new(pool)),
            build_object_storage(&config.object_storage)?,
            Arc::new(BroadcastStatusNotifier::new(config.export.notification_buffer)),
        ))
    }

    /// Process-local backends over a small demo inventory.
    pub fn in_memory(config: &Config) -> Result<Self, StorageError> {
        Ok(Self::from_parts(
            Arc::new(InMemoryExportJobStore::new()),
            Arc::new(InMemoryTaskChannel::new()),
            Arc::new(demo_inventory()),
            build_object_storage(&config.object_storage)?,
            Arc::new(BroadcastStatusNotifier::new(config.export.notification_buffer)),
        ))
    }

    pub fn request_handler(&self) -> ExportRequestHandler {
        ExportRequestHandler::new(self.store.clone(), self.channel.clone())
    }

    pub fn query_service(&self) -> ExportQueryService {
        ExportQueryService::new(self.store.clone())
    }

    pub fn worker(&self, settings: WorkerSettings) -> ExportWorker {
        ExportWorker::new(
            self.store.clone(),
            self.data_source.clone(),
            Arc::new(SpreadsheetGenerator),
            self.storage.clone(),
            self.notifier.clone(),
            settings,
        )
    }

    pub fn reconciler(&self) -> ExportReconciler {
        ExportReconciler::new(
            self.store.clone(),
            self.channel.clone(),
            self.notifier.clone(),
        )
    }
}

/// Inventory served by the memory backend: every category has rows.
pub fn demo_inventory() -> InMemoryInventory {
    let now = Utc::now();

    let product = |code: &str, name: &str, price: &str| Product {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: name.to_string(),
        description: None,
        price: Some(price.to_string()),
        category: Some("Equipment".to_string()),
        brand: None,
        sku: None,
        active: true,
        created_at: now,
        updated_at: now,
    };
    let warehouse = |id: i64, code: &str, city: &str| Warehouse {
        id,
        code: code.to_string(),
        name: city.to_string(),
        description: None,
        address: None,
        city: Some(city.to_string()),
        state_province: None,
        postal_code: None,
        country: Some("GB".to_string()),
        active: true,
        created_at: now,
        updated_at: now,
    };
    let stock = |product_code: &str, warehouse_code: &str, quantity: i32| Stock {
        id: Uuid::new_v4(),
        product_code: product_code.to_string(),
        warehouse_code: warehouse_code.to_string(),
        quantity,
        min_stock_level: 5,
        max_stock_level: Some(200),
        last_restock_date: None,
        created_at: now,
        updated_at: now,
    };

    InMemoryInventory::with_records(
        vec![
            product("P-001", "Pallet jack", "349.90"),
            product("P-002", "Stretch wrap", "18.50"),
        ],
        vec![
            stock("P-001", "WH-NORTH", 12),
            stock("P-002", "WH-NORTH", 3),
            stock("P-002", "WH-SOUTH", 140),
        ],
        vec![warehouse(1, "WH-NORTH", "Leeds"), warehouse(2, "WH-SOUTH", "Bristol")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{ExportCategory, ExportJobStatus};

    #[tokio::test]
    async fn test_demo_inventory_covers_every_category() {
        let inventory = demo_inventory();
        for category in [
            ExportCategory::Product,
            ExportCategory::Stock,
            ExportCategory::Warehouse,
        ] {
            assert!(!inventory.fetch_all(category).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_memory_backend_completes_exports() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let config = Config::load_for_test(&[
            ("storage.backend", "memory"),
            ("object_storage.local_root", root.as_str()),
        ])
        .unwrap();
        let pipeline = ExportPipeline::in_memory(&config).unwrap();

        let job_id = pipeline
            .request_handler()
            .initiate_export(Uuid::new_v4(), ExportCategory::Stock, "CSV")
            .await
            .unwrap();
        pipeline
            .worker(config.export.worker_settings())
            .drain(pipeline.channel.as_ref(), 10)
            .await
            .unwrap();

        let job = pipeline.store.find_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Completed);
        assert!(job.file_url.is_some());
    }
}
