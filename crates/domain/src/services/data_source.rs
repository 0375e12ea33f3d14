//! Bulk inventory reads for exports.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{ExportCategory, ExportDataset, Product, Stock, Warehouse};

#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error("Failed to fetch {category} data: {message}")]
    Fetch {
        category: ExportCategory,
        message: String,
    },
}

/// Whole-category snapshot read. Must be re-callable.
#[async_trait]
pub trait InventoryDataSource: Send + Sync {
    async fn fetch_all(&self, category: ExportCategory) -> Result<ExportDataset, DataSourceError>;
}

/// In-memory inventory for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    products: RwLock<Vec<Product>>,
    stocks: RwLock<Vec<Stock>>,
    warehouses: RwLock<Vec<Warehouse>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(
        products: Vec<Product>,
        stocks: Vec<Stock>,
        warehouses: Vec<Warehouse>,
    ) -> Self {
        Self {
            products: RwLock::new(products),
            stocks: RwLock::new(stocks),
            warehouses: RwLock::new(warehouses),
        }
    }

    pub async fn add_product(&self, product: Product) {
        self.products.write().await.push(product);
    }

    pub async fn add_stock(&self, stock: Stock) {
        self.stocks.write().await.push(stock);
    }

    pub async fn add_warehouse(&self, warehouse: Warehouse) {
        self.warehouses.write().await.push(warehouse);
    }
}

#[async_trait]
impl InventoryDataSource for InMemoryInventory {
    async fn fetch_all(&self, category: ExportCategory) -> Result<ExportDataset, DataSourceError> {
        let dataset = match category {
            ExportCategory::Product => {
                ExportDataset::from_records(self.products.read().await.as_slice())
            }
            ExportCategory::Stock => {
                ExportDataset::from_records(self.stocks.read().await.as_slice())
            }
            ExportCategory::Warehouse => {
                ExportDataset::from_records(self.warehouses.read().await.as_slice())
            }
        };
        Ok(dataset)
    }
}
