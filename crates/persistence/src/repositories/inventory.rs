//! Inventory repository: bulk reads feeding exports.

use async_trait::async_trait;
use domain::models::{ExportCategory, ExportDataset, Product, Stock, Warehouse};
use domain::services::{DataSourceError, InventoryDataSource};
use sqlx::PgPool;

use crate::entities::{ProductEntity, StockEntity, WarehouseEntity};
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct InventoryRepository {
    pool: PgPool,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All products ordered by code.
    pub async fn find_all_products(&self) -> Result<Vec<Product>, sqlx::Error> {
        let timer = QueryTimer::new("find_all_products");
        let result = sqlx::query_as::<_, ProductEntity>(
            r#"
            SELECT id, code, name, description, price::TEXT AS price, category, brand, sku,
                   active, created_at, updated_at
            FROM products
            ORDER BY code ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?.into_iter().map(Product::from).collect())
    }

    /// All warehouses ordered by code.
    pub async fn find_all_warehouses(&self) -> Result<Vec<Warehouse>, sqlx::Error> {
        let timer = QueryTimer::new("find_all_warehouses");
        let result = sqlx::query_as::<_, WarehouseEntity>(
            r#"
            SELECT id, code, name, description, address, city, state_province, postal_code,
                   country, active, created_at, updated_at
            FROM warehouses
            ORDER BY code ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?.into_iter().map(Warehouse::from).collect())
    }

    /// All stock rows with their product and warehouse codes.
    pub async fn find_all_stocks(&self) -> Result<Vec<Stock>, sqlx::Error> {
        let timer = QueryTimer::new("find_all_stocks");
        let result = sqlx::query_as::<_, StockEntity>(
            r#"
            SELECT s.id, p.code AS product_code, w.code AS warehouse_code, s.quantity,
                   s.min_stock_level, s.max_stock_level, s.last_restock_date,
                   s.created_at, s.updated_at
            FROM stocks s
            JOIN products p ON p.id = s.product_id
            JOIN warehouses w ON w.id = s.warehouse_id
            ORDER BY w.code ASC, p.code ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?.into_iter().map(Stock::from).collect())
    }
}

#[async_trait]
impl InventoryDataSource for InventoryRepository {
    async fn fetch_all(&self, category: ExportCategory) -> Result<ExportDataset, DataSourceError> {
        let fetch_error = |e: sqlx::Error| DataSourceError::Fetch {
            category,
            message: e.to_string(),
        };

        let dataset = match category {
            ExportCategory::Product => {
                ExportDataset::from_records(&self.find_all_products().await.map_err(fetch_error)?)
            }
            ExportCategory::Stock => {
                ExportDataset::from_records(&self.find_all_stocks().await.map_err(fetch_error)?)
            }
            ExportCategory::Warehouse => {
                ExportDataset::from_records(&self.find_all_warehouses().await.map_err(fetch_error)?)
            }
        };
        Ok(dataset)
    }
}
