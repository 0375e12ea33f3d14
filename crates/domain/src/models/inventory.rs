//! Inventory records read by the export pipeline.
//!
//! These are read-only snapshots of the catalog tables. Each record type
//! knows its column headers and how to render a row of string cells, which
//! is all the artifact generator needs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record that can be rendered as a spreadsheet row.
pub trait TabularRecord {
    /// Column headers, in cell order.
    fn headers() -> &'static [&'static str];

    /// Cell values, one per header.
    fn cells(&self) -> Vec<String>;
}

/// Catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// Decimal price rendered as text to keep the stored precision.
    pub price: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TabularRecord for Product {
    fn headers() -> &'static [&'static str] {
        &[
            "id",
            "code",
            "name",
            "description",
            "price",
            "category",
            "brand",
            "sku",
            "active",
            "created_at",
            "updated_at",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.code.clone(),
            self.name.clone(),
            opt(&self.description),
            opt(&self.price),
            opt(&self.category),
            opt(&self.brand),
            opt(&self.sku),
            self.active.to_string(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ]
    }
}

/// Warehouse location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
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

impl TabularRecord for Warehouse {
    fn headers() -> &'static [&'static str] {
        &[
            "id",
            "code",
            "name",
            "description",
            "address",
            "city",
            "state_province",
            "postal_code",
            "country",
            "active",
            "created_at",
            "updated_at",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.code.clone(),
            self.name.clone(),
            opt(&self.description),
            opt(&self.address),
            opt(&self.city),
            opt(&self.state_province),
            opt(&self.postal_code),
            opt(&self.country),
            self.active.to_string(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ]
    }
}

/// Stock level of one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
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

impl Stock {
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_stock_level
    }
}

impl TabularRecord for Stock {
    fn headers() -> &'static [&'static str] {
        &[
            "id",
            "product_code",
            "warehouse_code",
            "quantity",
            "min_stock_level",
            "max_stock_level",
            "low_stock",
            "last_restock_date",
            "created_at",
            "updated_at",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.product_code.clone(),
            self.warehouse_code.clone(),
            self.quantity.to_string(),
            self.min_stock_level.to_string(),
            self.max_stock_level
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.is_low_stock().to_string(),
            self.last_restock_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            timestamp(&self.created_at),
            timestamp(&self.updated_at),
        ]
    }
}

/// Collaborator-neutral dataset handed to the artifact generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportDataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportDataset {
    pub fn from_records<T: TabularRecord>(records: &[T]) -> Self {
        Self {
            headers: T::headers().iter().map(|h| h.to_string()).collect(),
            rows: records.iter().map(TabularRecord::cells).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}
