use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::Order;
use crate::messaging::Event;

// ============================================================================
// Collaborator Ports
// ============================================================================
//
// Boundaries the order workflow talks to. Lookups return `Ok(None)` for a
// missing entity and `Err` for a boundary failure.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    pub stock: i32,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
}

/// Source of truth for per-product available quantity.
///
/// `update_stock` sets an absolute quantity; callers compute `current ± delta`.
/// No arithmetic and no cross-call state lives behind this boundary, so a
/// read followed by a write is not atomic.
#[async_trait]
pub trait ProductStock: Send + Sync {
    async fn get_product_by_id(&self, id: Uuid) -> Result<Option<Product>>;

    async fn update_stock(&self, id: Uuid, quantity: i32) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: &Order) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>>;

    /// Returns the number of rows affected. Zero means the order is gone.
    async fn update(&self, order: &Order) -> Result<u64>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}
