use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::domain::order::{Order, OrderItem, OrderStatus};
use crate::ports::{OrderRepository, Product, ProductStock, User, UserDirectory};

// ============================================================================
// PostgreSQL Adapters
// ============================================================================
//
// Tables are expected to exist:
//   users(id UUID PK, name TEXT, email TEXT)
//   products(id UUID PK, name TEXT, price DOUBLE PRECISION, stock INT)
//   orders(id UUID PK, user_id UUID, items TEXT, status TEXT, total DOUBLE
//          PRECISION, created_at TIMESTAMPTZ, updated_at TIMESTAMPTZ)
//
// Order items are stored as a JSON array in a text column.
//
// ============================================================================

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    tracing::info!(max_connections = max_connections, "Connecting to PostgreSQL");

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a user unless one with the same id exists.
    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING")
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .execute(&self.pool)
            .await
            .context("Failed to insert user")?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<(Uuid, String, String)> =
            sqlx::query_as("SELECT id, name, email FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query user")?;

        Ok(row.map(|(id, name, email)| User { id, name, email }))
    }
}

#[derive(Clone)]
pub struct PgProductStock {
    pool: PgPool,
}

impl PgProductStock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a product unless one with the same id exists.
    pub async fn insert(&self, product: &Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, name, price, stock) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price)
        .bind(product.stock)
        .execute(&self.pool)
        .await
        .context("Failed to insert product")?;
        Ok(())
    }
}

#[async_trait]
impl ProductStock for PgProductStock {
    async fn get_product_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        let row: Option<(Uuid, String, f64, i32)> =
            sqlx::query_as("SELECT id, name, price, stock FROM products WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query product")?;

        Ok(row.map(|(id, name, price, stock)| Product {
            id,
            name,
            price,
            stock,
        }))
    }

    async fn update_stock(&self, id: Uuid, quantity: i32) -> Result<()> {
        let result = sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
            .bind(id)
            .bind(quantity)
            .execute(&self.pool)
            .await
            .context("Failed to update stock")?;

        if result.rows_affected() == 0 {
            bail!("product not found: {}", id);
        }
        Ok(())
    }
}

type OrderRow = (Uuid, Uuid, String, String, DateTime<Utc>, DateTime<Utc>);

const ORDER_COLUMNS: &str = "id, user_id, items, status, created_at, updated_at";

fn decode_order((id, user_id, items, status, created_at, updated_at): OrderRow) -> Result<Order> {
    let items: Vec<OrderItem> =
        serde_json::from_str(&items).with_context(|| format!("Corrupt items for order {}", id))?;
    let status: OrderStatus = status.parse()?;

    Order::restore(id, user_id, items, status, created_at, updated_at)
        .with_context(|| format!("Stored order {} is invalid", id))
}

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order) -> Result<()> {
        let items = serde_json::to_string(order.items())?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, items, status, total, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id())
        .bind(order.user_id())
        .bind(items)
        .bind(order.status().as_str())
        .bind(order.total())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .context("Failed to insert order")?;

        tracing::debug!(order_id = %order.id(), "Order row inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query order")?;

        row.map(decode_order).transpose()
    }

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query orders by user")?;

        rows.into_iter().map(decode_order).collect()
    }

    async fn update(&self, order: &Order) -> Result<u64> {
        let items = serde_json::to_string(order.items())?;

        let result = sqlx::query(
            "UPDATE orders SET items = $2, status = $3, total = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(order.id())
        .bind(items)
        .bind(order.status().as_str())
        .bind(order.total())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .context("Failed to update order")?;

        Ok(result.rows_affected())
    }
}
