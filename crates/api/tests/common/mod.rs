//! Common test utilities for integration tests.
//!
//! The router runs against the in-memory job store and task channel, with
//! artifacts written to a temporary directory. Workers are driven by hand
//! so each test controls when tasks are processed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use chrono::Utc;
use domain::models::{Product, Warehouse};
use domain::services::{
    BroadcastStatusNotifier, DrainSummary, InMemoryExportJobStore,
    InMemoryInventory, InMemoryTaskChannel, InventoryDataSource,
};
use inventory_export_api::{
    app::{create_app, AppState},
    config::{
        Config, DatabaseConfig, ExportConfig, JwtAuthConfig, LoggingConfig, ObjectStorageConfig,
        SecurityConfig, ServerConfig, StorageBackend, StorageConfig,
    },
    services::{ExportPipeline, LocalObjectStorage},
};
use shared::jwt::JwtConfig;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const TEST_PUBLIC_BASE_URL: &str = "https://cdn.example.com";

/// Test configuration: in-memory backend, HS256 tokens, export rate limit off.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            cors_origins: vec![],
            export_rate_limit_per_hour: 0, // Disable export rate limiting for tests
        },
        jwt: JwtAuthConfig {
            secret: TEST_JWT_SECRET.to_string(),
            public_key: String::new(),
            private_key: String::new(),
            access_token_expiry_secs: 3600,
            leeway_secs: 0,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
        },
        export: ExportConfig {
            worker_enabled: false,
            ..ExportConfig::default()
        },
        object_storage: ObjectStorageConfig {
            public_base_url: TEST_PUBLIC_BASE_URL.to_string(),
            ..ObjectStorageConfig::default()
        },
    }
}

/// Router plus handles on the in-memory pipeline behind it.
pub struct TestApp {
    pub router: Router,
    pub pipeline: ExportPipeline,
    pub store: Arc<InMemoryExportJobStore>,
    pub channel: Arc<InMemoryTaskChannel>,
    pub notifier: Arc<BroadcastStatusNotifier>,
    pub config: Config,
    pub storage_dir: TempDir,
}

impl TestApp {
    /// App with a small seeded inventory.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let inventory = Arc::new(seeded_inventory().await);
        Self::build(config, inventory)
    }

    pub fn build(config: Config, data_source: Arc<dyn InventoryDataSource>) -> Self {
        let storage_dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryExportJobStore::new());
        let channel = Arc::new(InMemoryTaskChannel::new());
        let notifier = Arc::new(BroadcastStatusNotifier::new(
            config.export.notification_buffer,
        ));

        let pipeline = ExportPipeline::from_parts(
            store.clone(),
            channel.clone(),
            data_source,
            Arc::new(LocalObjectStorage::new(
                storage_dir.path(),
                &config.object_storage.public_base_url,
            )),
            notifier.clone(),
        );

        let state = AppState::new(config.clone(), None, &pipeline).unwrap();
        Self {
            router: create_app(state),
            pipeline,
            store,
            channel,
            notifier,
            config,
            storage_dir,
        }
    }

    /// Runs one worker drain over everything queued.
    pub async fn run_worker(&self) -> DrainSummary {
        self.pipeline
            .worker(self.config.export.worker_settings())
            .drain(self.channel.as_ref(), 100)
            .await
            .unwrap()
    }
}

pub async fn seeded_inventory() -> InMemoryInventory {
    let inventory = InMemoryInventory::new();
    let now = Utc::now();
    inventory
        .add_product(Product {
            id: Uuid::new_v4(),
            code: "P-001".to_string(),
            name: "Pallet jack".to_string(),
            description: Some("Manual, 2.5t".to_string()),
            price: Some("349.90".to_string()),
            category: Some("Equipment".to_string()),
            brand: None,
            sku: Some("PJ-25".to_string()),
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await;
    inventory
        .add_warehouse(Warehouse {
            id: 1,
            code: "WH-NORTH".to_string(),
            name: "North".to_string(),
            description: None,
            address: Some("1 Dock Road".to_string()),
            city: Some("Leeds".to_string()),
            state_province: None,
            postal_code: None,
            country: Some("GB".to_string()),
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await;
    inventory
}

/// Bearer token for `user_id` signed with the test secret.
pub fn bearer(user_id: Uuid) -> String {
    let jwt = JwtConfig::from_secret(TEST_JWT_SECRET, 3600, 0).unwrap();
    let (token, _jti) = jwt.generate_access_token(user_id).unwrap();
    token
}

pub fn get_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn post_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

/// Read the whole response body as text.
pub async fn response_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).into_owned()
}
