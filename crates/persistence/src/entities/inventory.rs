//! Inventory entities (read-only row mappings for exports).

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::{Product, Stock, Warehouse};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the products table. `price` is selected as text
/// so decimal precision survives into the export.
#[derive(Debug, Clone, FromRow)]
pub struct ProductEntity {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductEntity> for Product {
    fn from(entity: ProductEntity) -> Self {
        Self {
            id: entity.id,
            code: entity.code,
            name: entity.name,
            description: entity.description,
            price: entity.price,
            category: entity.category,
            brand: entity.brand,
            sku: entity.sku,
            active: entity.active,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Database row mapping for the warehouses table.
#[derive(Debug, Clone, FromRow)]
pub struct WarehouseEntity {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WarehouseEntity> for Warehouse {
    fn from(entity: WarehouseEntity) -> Self {
        Self {
            id: entity.id,
            code: entity.code,
            name: entity.name,
            description: entity.description,
            address: entity.address,
            city: entity.city,
            state_province: entity.state_province,
            postal_code: entity.postal_code,
            country: entity.country,
            active: entity.active,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Stock row joined with its product and warehouse codes.
#[derive(Debug, Clone, FromRow)]
pub struct StockEntity {
    pub id: Uuid,
    pub product_code: String,
    pub warehouse_code: String,
    pub quantity: i32,
    pub min_stock_level: i32,
    pub max_stock_level: Option<i32>,
    pub last_restock_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StockEntity> for Stock {
    fn from(entity: StockEntity) -> Self {
        Self {
            id: entity.id,
            product_code: entity.product_code,
            warehouse_code: entity.warehouse_code,
            quantity: entity.quantity,
            min_stock_level: entity.min_stock_level,
            max_stock_level: entity.max_stock_level,
            last_restock_date: entity.last_restock_date,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
