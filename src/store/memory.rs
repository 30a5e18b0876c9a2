use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::order::Order;
use crate::ports::{OrderRepository, Product, ProductStock, User, UserDirectory};

// ============================================================================
// In-Memory Adapters
// ============================================================================
//
// Used by the demo binary when no database is configured and as fakes in
// tests. Each adapter can be told to fail so compensation paths can be
// exercised.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<Uuid, Product>>,
    failing_updates: RwLock<HashSet<Uuid>>,
    lookups: AtomicU64,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn stock_of(&self, id: Uuid) -> Option<i32> {
        self.products.read().await.get(&id).map(|p| p.stock)
    }

    pub async fn set_price(&self, id: Uuid, price: f64) {
        if let Some(product) = self.products.write().await.get_mut(&id) {
            product.price = price;
        }
    }

    /// Make every `update_stock` call for `id` fail until cleared.
    pub async fn fail_updates_for(&self, id: Uuid) {
        self.failing_updates.write().await.insert(id);
    }

    pub async fn clear_failures(&self) {
        self.failing_updates.write().await.clear();
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductStock for InMemoryProductCatalog {
    async fn get_product_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn update_stock(&self, id: Uuid, quantity: i32) -> Result<()> {
        if self.failing_updates.read().await.contains(&id) {
            bail!("stock update rejected for product {}", id);
        }

        let mut products = self.products.write().await;
        match products.get_mut(&id) {
            Some(product) => {
                product.stock = quantity;
                Ok(())
            }
            None => bail!("product not found: {}", id),
        }
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of calls made through the `OrderRepository` trait.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<()> {
        self.count_call();
        if self.fail_creates.load(Ordering::SeqCst) {
            bail!("order store unavailable");
        }

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            bail!("order already exists: {}", order.id());
        }
        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.count_call();
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.count_call();
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(Order::created_at);
        Ok(orders)
    }

    async fn update(&self, order: &Order) -> Result<u64> {
        self.count_call();
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("order store unavailable");
        }

        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id()) {
            Some(existing) => {
                *existing = order.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
