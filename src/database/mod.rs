use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::models::Product;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Stable id of a product: md5 of its detail URL.
pub fn product_id(product: &Product) -> String {
    format!("{:x}", md5::compute(product.detail_url.as_bytes()))
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            if let Some(parent) = Path::new(db_url.trim_start_matches("sqlite:")).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Create database file if it doesn't exist
            if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
                info!("Creating database file {}", db_url);
                Sqlite::create_database(db_url).await?;
            }
        }

        // Every connection to an in-memory database sees its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(db_url)
            .await?;

        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    pub async fn existing_product_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM products")
            .fetch_all(&self.pool)
            .await?;

        let ids = rows
            .into_iter()
            .map(|row| row.get::<String, _>("id"))
            .collect();

        Ok(ids)
    }

    /// Store products not seen before. Returns how many were new.
    pub async fn save_products(&self, source_url: &str, products: &[Product]) -> Result<usize> {
        let discovered_at: DateTime<Utc> = Utc::now();
        let mut inserted = 0;

        let mut tx = self.pool.begin().await?;
        for product in products {
            let result = sqlx::query(
                r"
                INSERT OR IGNORE INTO products
                    (id, title, sku, price, currency, moq, image_url, detail_url, description, source_url, discovered_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(product_id(product))
            .bind(&product.title)
            .bind(&product.sku)
            .bind(&product.price)
            .bind(&product.currency)
            .bind(&product.moq)
            .bind(&product.image_url)
            .bind(&product.detail_url)
            .bind(&product.description)
            .bind(source_url)
            .bind(discovered_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(inserted)
    }

    pub async fn products_for(&self, source_url: &str) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r"
            SELECT title, sku, price, currency, moq, image_url, detail_url, description
            FROM products
            WHERE source_url = ?
            ORDER BY discovered_at, rowid
            ",
        )
        .bind(source_url)
        .fetch_all(&self.pool)
        .await?;

        let products = rows
            .into_iter()
            .map(|row| Product {
                title: row.get("title"),
                sku: row.get("sku"),
                price: row.get("price"),
                currency: row.get("currency"),
                moq: row.get("moq"),
                image_url: row.get("image_url"),
                detail_url: row.get("detail_url"),
                description: row.get("description"),
            })
            .collect();

        Ok(products)
    }
}
