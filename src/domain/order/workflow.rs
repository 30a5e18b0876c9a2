use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::messaging::Event;
use crate::metrics::Metrics;
use crate::ports::{EventPublisher, OrderRepository, Product, ProductStock, User, UserDirectory};
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

use super::aggregate::{Order, OrderAggregate};
use super::commands::CreateOrderRequest;
use super::errors::{OrderError, ValidationError, WorkflowError};
use super::events::{OrderCancelled, OrderCreated, OrderEvent, OrderStatusUpdated};
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Workflow Service
// ============================================================================
//
// Orchestrates: users + product stock → aggregate → stock changes → order
// store → event. The only component that talks to both product stock and
// order persistence.
//
// Stock is adjusted with read-then-write calls through `ProductStock`. There
// is no per-product lock and no version token, so two concurrent orders for
// the same product can both pass the stock check and oversell it. Ordering
// between orders touching one product is left to the storage boundary.
//
// ============================================================================

/// Stock consumed from one product by the order being placed.
struct StockLine {
    product: Product,
    consumed: i32,
}

impl StockLine {
    fn remaining(&self) -> i32 {
        self.product.stock - self.consumed
    }
}

pub struct OrderWorkflowService {
    users: Arc<dyn UserDirectory>,
    products: Arc<dyn ProductStock>,
    orders: Arc<dyn OrderRepository>,
    publisher: Arc<dyn EventPublisher>,
    compensation_retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OrderWorkflowService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        products: Arc<dyn ProductStock>,
        orders: Arc<dyn OrderRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            products,
            orders,
            publisher,
            compensation_retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_compensation_retry(mut self, config: RetryConfig) -> Self {
        self.compensation_retry = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Place an order: check stock, snapshot prices, decrement stock, persist.
    ///
    /// Stock is decremented before the order is stored. If storing fails the
    /// decrements are reverted on a best-effort basis; a crash in between
    /// leaves stock decremented with no order.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, WorkflowError> {
        let started = Instant::now();
        let result = self.place_order(request).await;
        self.observe("create_order", started, &result);

        if let (Ok(_), Some(metrics)) = (&result, &self.metrics) {
            metrics.orders_created.inc();
        }
        result
    }

    async fn place_order(&self, request: CreateOrderRequest) -> Result<Order, WorkflowError> {
        let user = self.require_user(request.user_id).await?;

        tracing::info!(
            user_id = %user.id,
            item_count = request.items.len(),
            "Creating new order"
        );

        // One lookup per distinct product; lines are kept in first-seen order
        let mut lines: Vec<StockLine> = Vec::new();
        let mut line_index: HashMap<Uuid, usize> = HashMap::new();
        let mut order_items = Vec::with_capacity(request.items.len());

        for requested in &request.items {
            let index = match line_index.get(&requested.product_id) {
                Some(&index) => index,
                None => {
                    let product = self.require_product(requested.product_id).await?;
                    lines.push(StockLine { product, consumed: 0 });
                    line_index.insert(requested.product_id, lines.len() - 1);
                    lines.len() - 1
                }
            };

            let line = &mut lines[index];
            let cumulative = line.consumed.saturating_add(requested.quantity);
            if cumulative > line.product.stock {
                tracing::warn!(
                    product_id = %line.product.id,
                    requested = cumulative,
                    available = line.product.stock,
                    "Insufficient stock"
                );
                return Err(WorkflowError::InsufficientStock {
                    product_id: line.product.id,
                    product_name: line.product.name.clone(),
                    requested: cumulative,
                    available: line.product.stock,
                });
            }
            line.consumed = cumulative;

            order_items.push(OrderItem::new(
                requested.product_id,
                requested.quantity,
                line.product.price,
            ));
        }

        let aggregate = OrderAggregate::create(Uuid::new_v4(), user.id, order_items)?;
        aggregate.validate()?;
        let order = aggregate.into_order();

        self.decrement_stock(order.id(), &lines).await?;

        if let Err(e) = self.orders.create(&order).await {
            tracing::error!(
                order_id = %order.id(),
                error = %e,
                "Failed to persist order, restoring stock"
            );
            self.revert_decrements(order.id(), &lines).await;
            return Err(WorkflowError::persistence("order create", e));
        }

        tracing::info!(
            order_id = %order.id(),
            user_id = %order.user_id(),
            total = order.total(),
            "Order created"
        );

        self.publish(OrderEvent::Created(OrderCreated {
            order_id: order.id(),
            user_id: order.user_id(),
            total: order.total(),
        }));

        Ok(order)
    }

    async fn decrement_stock(&self, order_id: Uuid, lines: &[StockLine]) -> Result<(), WorkflowError> {
        for (applied, line) in lines.iter().enumerate() {
            if let Err(e) = self
                .products
                .update_stock(line.product.id, line.remaining())
                .await
            {
                tracing::error!(
                    order_id = %order_id,
                    product_id = %line.product.id,
                    error = %e,
                    "Stock decrement failed, restoring earlier decrements"
                );
                self.revert_decrements(order_id, &lines[..applied]).await;
                return Err(WorkflowError::persistence("stock decrement", e));
            }

            tracing::debug!(
                order_id = %order_id,
                product_id = %line.product.id,
                new_stock = line.remaining(),
                "Stock decremented"
            );
        }
        Ok(())
    }

    /// Put every line's product back to the stock level read before the
    /// order was placed. Failures are logged and counted only.
    async fn revert_decrements(&self, order_id: Uuid, lines: &[StockLine]) {
        let products: &dyn ProductStock = self.products.as_ref();

        for line in lines {
            let product_id = line.product.id;
            let original = line.product.stock;

            let outcome = retry_with_backoff("restore_stock", &self.compensation_retry, move |_attempt| {
                products.update_stock(product_id, original)
            })
            .await;

            self.record_compensation(order_id, product_id, line.consumed, outcome);
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get_order_by_id(&self, id: Uuid) -> Result<Order, WorkflowError> {
        if id.is_nil() {
            return Err(OrderError::from(ValidationError::EmptyOrderId).into());
        }
        self.load_order(id).await
    }

    pub async fn get_orders_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>, WorkflowError> {
        self.require_user(user_id).await?;

        self.orders
            .get_by_user_id(user_id)
            .await
            .map_err(|e| WorkflowError::persistence("order lookup by user", e))
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub async fn update_order_status(
        &self,
        id: Uuid,
        new_status: OrderStatus,
    ) -> Result<Order, WorkflowError> {
        let started = Instant::now();
        let result = self.transition(id, new_status).await;
        self.observe("update_order_status", started, &result);
        result
    }

    async fn transition(&self, id: Uuid, new_status: OrderStatus) -> Result<Order, WorkflowError> {
        let existing = self.get_order_by_id(id).await?;
        let old_status = existing.status();

        let mut aggregate = OrderAggregate::from_order(existing);
        aggregate.update_status(new_status)?;
        let order = aggregate.into_order();

        self.persist_update(&order, "order status update").await?;

        tracing::info!(
            order_id = %id,
            old_status = %old_status,
            new_status = %new_status,
            "Order status updated"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(old_status.as_str(), new_status.as_str());
        }

        self.publish(OrderEvent::StatusUpdated(OrderStatusUpdated {
            order_id: id,
            old_status,
            new_status,
        }));

        Ok(order)
    }

    // ------------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------------

    /// Cancel an order. Stock is given back only if the order still held it
    /// (pending or confirmed); each item is restored independently.
    pub async fn cancel_order(&self, id: Uuid) -> Result<Order, WorkflowError> {
        let started = Instant::now();
        let result = self.cancel(id).await;
        self.observe("cancel_order", started, &result);

        if let (Ok(_), Some(metrics)) = (&result, &self.metrics) {
            metrics.orders_cancelled.inc();
        }
        result
    }

    async fn cancel(&self, id: Uuid) -> Result<Order, WorkflowError> {
        let existing = self.get_order_by_id(id).await?;
        let prior_status = existing.status();

        let mut aggregate = OrderAggregate::from_order(existing);
        aggregate.cancel()?;
        let order = aggregate.into_order();

        if prior_status.holds_stock() {
            for item in order.items() {
                self.release_stock(id, item).await;
            }
        } else {
            tracing::debug!(
                order_id = %id,
                prior_status = %prior_status,
                "Order no longer holds stock, nothing to restore"
            );
        }

        self.persist_update(&order, "order cancel").await?;

        tracing::info!(order_id = %id, prior_status = %prior_status, "Order cancelled");

        self.publish(OrderEvent::Cancelled(OrderCancelled {
            order_id: id,
            user_id: order.user_id(),
            total: order.total(),
        }));

        Ok(order)
    }

    /// Add an item's quantity back to the product's current stock.
    async fn release_stock(&self, order_id: Uuid, item: &OrderItem) {
        let products: &dyn ProductStock = self.products.as_ref();
        let product_id = item.product_id;
        let quantity = item.quantity;

        let outcome = retry_with_backoff("release_stock", &self.compensation_retry, move |_attempt| async move {
            let product = products
                .get_product_by_id(product_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("product not found: {}", product_id))?;
            products.update_stock(product_id, product.stock + quantity).await
        })
        .await;

        self.record_compensation(order_id, product_id, quantity, outcome);
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn require_user(&self, user_id: Uuid) -> Result<User, WorkflowError> {
        if user_id.is_nil() {
            return Err(WorkflowError::InvalidUser(user_id));
        }

        self.users
            .get_user_by_id(user_id)
            .await
            .map_err(|e| WorkflowError::persistence("user lookup", e))?
            .ok_or(WorkflowError::InvalidUser(user_id))
    }

    async fn require_product(&self, product_id: Uuid) -> Result<Product, WorkflowError> {
        self.products
            .get_product_by_id(product_id)
            .await
            .map_err(|e| WorkflowError::persistence("product lookup", e))?
            .ok_or(WorkflowError::InvalidProduct(product_id))
    }

    async fn load_order(&self, id: Uuid) -> Result<Order, WorkflowError> {
        self.orders
            .get_by_id(id)
            .await
            .map_err(|e| WorkflowError::persistence("order lookup", e))?
            .ok_or(WorkflowError::NotFound(id))
    }

    async fn persist_update(&self, order: &Order, operation: &'static str) -> Result<(), WorkflowError> {
        let rows = self
            .orders
            .update(order)
            .await
            .map_err(|e| WorkflowError::persistence(operation, e))?;

        if rows == 0 {
            tracing::error!(order_id = %order.id(), "Order vanished before update");
            return Err(WorkflowError::persistence(
                operation,
                format!("order {} no longer exists", order.id()),
            ));
        }
        Ok(())
    }

    fn record_compensation(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        outcome: RetryResult<(), anyhow::Error>,
    ) {
        let restored = outcome.is_success();
        match outcome {
            RetryResult::Success(()) => tracing::info!(
                order_id = %order_id,
                product_id = %product_id,
                quantity = quantity,
                "Stock restored"
            ),
            RetryResult::Failed { error, attempts } => tracing::error!(
                order_id = %order_id,
                product_id = %product_id,
                quantity = quantity,
                attempts = attempts,
                error = %error,
                "Stock restoration failed, manual correction required"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_compensation(restored);
        }
    }

    /// Fire-and-forget: the publish runs on its own task and its outcome
    /// never reaches the caller.
    fn publish(&self, event: OrderEvent) {
        let event_type = event.event_type();
        let envelope = match Event::from_order_event(&event) {
            Ok(envelope) => envelope.with_metadata("source", "order-workflow"),
            Err(e) => {
                tracing::error!(event_type = event_type, error = %e, "Failed to encode event");
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish_failure(event_type);
                }
                return;
            }
        };

        let publisher = Arc::clone(&self.publisher);
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let event_id = envelope.event_id;
            if let Err(e) = publisher.publish(envelope).await {
                tracing::error!(
                    event_type = event_type,
                    event_id = %event_id,
                    error = %e,
                    "Failed to publish event"
                );
                if let Some(metrics) = metrics {
                    metrics.record_publish_failure(event_type);
                }
            }
        });
    }

    fn observe<T>(&self, operation: &'static str, started: Instant, result: &Result<T, WorkflowError>) {
        if let Err(e) = result {
            tracing::warn!(operation = operation, kind = e.kind(), error = %e, "Order operation rejected");
        }

        if let Some(metrics) = &self.metrics {
            let rejection = result.as_ref().err().map(WorkflowError::kind);
            metrics.record_operation(operation, started.elapsed().as_secs_f64(), rejection);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ORDER_CANCELLED, ORDER_CREATED, ORDER_STATUS_UPDATED};
    use crate::messaging::EventBus;
    use crate::store::{InMemoryOrderRepository, InMemoryProductCatalog, InMemoryUserDirectory};
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        products: Arc<InMemoryProductCatalog>,
        orders: Arc<InMemoryOrderRepository>,
        bus: EventBus,
        service: OrderWorkflowService,
        user_id: Uuid,
    }

    impl Fixture {
        async fn new() -> Self {
            let users = Arc::new(InMemoryUserDirectory::new());
            let products = Arc::new(InMemoryProductCatalog::new());
            let orders = Arc::new(InMemoryOrderRepository::new());
            let bus = EventBus::new();

            let user_id = Uuid::new_v4();
            users
                .insert(User {
                    id: user_id,
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                })
                .await;

            let service = OrderWorkflowService::new(
                users,
                products.clone(),
                orders.clone(),
                Arc::new(bus.clone()),
            )
            .with_compensation_retry(RetryConfig::none());

            Self {
                products,
                orders,
                bus,
                service,
                user_id,
            }
        }

        async fn add_product(&self, name: &str, price: f64, stock: i32) -> Uuid {
            let id = Uuid::new_v4();
            self.products
                .insert(Product {
                    id,
                    name: name.to_string(),
                    price,
                    stock,
                })
                .await;
            id
        }

        async fn stock(&self, id: Uuid) -> i32 {
            self.products.stock_of(id).await.unwrap()
        }

        async fn capture(&self, event_type: &str) -> mpsc::UnboundedReceiver<Event> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.bus
                .subscribe(event_type, move |event| {
                    let tx = tx.clone();
                    async move {
                        tx.send(event)?;
                        Ok::<(), anyhow::Error>(())
                    }
                    .boxed()
                })
                .await;
            rx
        }

        async fn create(&self, items: &[(Uuid, i32)]) -> Result<Order, WorkflowError> {
            let request = items
                .iter()
                .fold(CreateOrderRequest::new(self.user_id), |req, (id, qty)| req.item(*id, *qty));
            self.service.create_order(request).await
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not published in time")
            .expect("event channel closed")
    }

    /// Stock boundary whose increases fail, so compensation always fails.
    struct NoRestockCatalog {
        inner: Arc<InMemoryProductCatalog>,
    }

    #[async_trait]
    impl ProductStock for NoRestockCatalog {
        async fn get_product_by_id(&self, id: Uuid) -> anyhow::Result<Option<Product>> {
            self.inner.get_product_by_id(id).await
        }

        async fn update_stock(&self, id: Uuid, quantity: i32) -> anyhow::Result<()> {
            let current = self.inner.stock_of(id).await.unwrap_or_default();
            if quantity > current {
                anyhow::bail!("restock rejected");
            }
            self.inner.update_stock(id, quantity).await
        }
    }

    /// Order store whose updates never find the row.
    struct VanishingOrders {
        inner: Arc<InMemoryOrderRepository>,
    }

    #[async_trait]
    impl OrderRepository for VanishingOrders {
        async fn create(&self, order: &Order) -> anyhow::Result<()> {
            self.inner.create(order).await
        }

        async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Order>> {
            self.inner.get_by_id(id).await
        }

        async fn get_by_user_id(&self, user_id: Uuid) -> anyhow::Result<Vec<Order>> {
            self.inner.get_by_user_id(user_id).await
        }

        async fn update(&self, _order: &Order) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _event: Event) -> anyhow::Result<()> {
            anyhow::bail!("broker unavailable")
        }
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_order_lifecycle_scenario() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Keyboard", 10.0, 5).await;

        let order = fx.create(&[(p1, 3)]).await.unwrap();
        assert_eq!(order.total(), 30.0);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(fx.stock(p1).await, 2);

        let confirmed = fx
            .service
            .update_order_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status(), OrderStatus::Confirmed);

        let err = fx
            .service
            .update_order_status(order.id(), OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Order(OrderError::InvalidTransition {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Delivered,
            })
        ));

        let cancelled = fx.service.cancel_order(order.id()).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(fx.stock(p1).await, 5);
    }

    #[tokio::test]
    async fn test_split_lines_checked_cumulatively() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Mouse", 4.0, 5).await;

        let err = fx.create(&[(p1, 3), (p1, 3)]).await.unwrap_err();
        match err {
            WorkflowError::InsufficientStock {
                product_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(product_id, p1);
                assert_eq!(requested, 6);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(fx.stock(p1).await, 5);
        assert!(fx.orders.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_product_resolved_once_and_decremented_by_sum() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Cable", 2.5, 10).await;

        let order = fx.create(&[(p1, 3), (p1, 4)]).await.unwrap();

        assert_eq!(fx.products.lookup_count(), 1);
        assert_eq!(fx.stock(p1).await, 3);
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.total(), 17.5);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_user() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Cable", 2.5, 10).await;

        for user_id in [Uuid::new_v4(), Uuid::nil()] {
            let request = CreateOrderRequest::new(user_id).item(p1, 1);
            let err = fx.service.create_order(request).await.unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidUser(id) if id == user_id));
        }
        assert_eq!(fx.stock(p1).await, 10);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_product() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Cable", 2.5, 10).await;
        let missing = Uuid::new_v4();

        let err = fx.create(&[(p1, 1), (missing, 1)]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidProduct(id) if id == missing));
        assert_eq!(fx.stock(p1).await, 10);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_quantity_before_touching_stock() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Cable", 2.5, 10).await;

        let err = fx.create(&[(p1, 0)]).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Order(OrderError::Validation(ValidationError::InvalidQuantity { .. }))
        ));

        let err = fx.create(&[]).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Order(OrderError::Validation(ValidationError::EmptyItems))
        ));
        assert_eq!(fx.stock(p1).await, 10);
    }

    #[tokio::test]
    async fn test_price_is_snapshot_at_order_time() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Monitor", 100.0, 3).await;

        let order = fx.create(&[(p1, 1)]).await.unwrap();
        fx.products.set_price(p1, 150.0).await;

        let stored = fx.service.get_order_by_id(order.id()).await.unwrap();
        assert_eq!(stored.items()[0].price, 100.0);
        assert_eq!(stored.total(), 100.0);
    }

    #[tokio::test]
    async fn test_persistence_failure_restores_all_stock() {
        let fx = Fixture::new().await;
        let pa = fx.add_product("A", 1.0, 8).await;
        let pb = fx.add_product("B", 2.0, 4).await;
        fx.orders.fail_creates(true);

        let err = fx.create(&[(pa, 2), (pb, 1), (pa, 3)]).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence { operation: "order create", .. }));
        assert_eq!(fx.stock(pa).await, 8);
        assert_eq!(fx.stock(pb).await, 4);
    }

    #[tokio::test]
    async fn test_failed_decrement_restores_earlier_products() {
        let fx = Fixture::new().await;
        let pa = fx.add_product("A", 1.0, 8).await;
        let pb = fx.add_product("B", 2.0, 4).await;
        fx.products.fail_updates_for(pb).await;

        let err = fx.create(&[(pa, 2), (pb, 1)]).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence { operation: "stock decrement", .. }));
        assert_eq!(fx.stock(pa).await, 8);
        assert_eq!(fx.stock(pb).await, 4);
        assert!(fx.orders.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_original_error() {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let user_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        users
            .insert(User {
                id: user_id,
                name: "Bo".to_string(),
                email: "bo@example.com".to_string(),
            })
            .await;
        catalog
            .insert(Product {
                id: product_id,
                name: "Lamp".to_string(),
                price: 20.0,
                stock: 3,
            })
            .await;
        orders.fail_creates(true);

        let service = OrderWorkflowService::new(
            users,
            Arc::new(NoRestockCatalog { inner: catalog.clone() }),
            orders,
            Arc::new(EventBus::new()),
        )
        .with_compensation_retry(RetryConfig::none());

        let err = service
            .create_order(CreateOrderRequest::new(user_id).item(product_id, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence { operation: "order create", .. }));
        // Compensation could not run, stock stays decremented
        assert_eq!(catalog.stock_of(product_id).await, Some(1));
    }

    #[tokio::test]
    async fn test_created_event_published() {
        let fx = Fixture::new().await;
        let mut rx = fx.capture(ORDER_CREATED).await;
        let p1 = fx.add_product("Desk", 50.0, 2).await;

        let order = fx.create(&[(p1, 2)]).await.unwrap();
        let event = next_event(&mut rx).await;

        assert_eq!(event.aggregate_id, order.id());
        assert_eq!(event.payload["order_id"], order.id().to_string());
        assert_eq!(event.payload["user_id"], fx.user_id.to_string());
        assert_eq!(event.payload["total"], 100.0);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_create() {
        let users = Arc::new(InMemoryUserDirectory::new());
        let products = Arc::new(InMemoryProductCatalog::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let user_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        users
            .insert(User {
                id: user_id,
                name: "Cy".to_string(),
                email: "cy@example.com".to_string(),
            })
            .await;
        products
            .insert(Product {
                id: product_id,
                name: "Chair".to_string(),
                price: 35.0,
                stock: 1,
            })
            .await;

        let service = OrderWorkflowService::new(users, products, orders.clone(), Arc::new(FailingPublisher))
            .with_metrics(metrics.clone());

        let order = service
            .create_order(CreateOrderRequest::new(user_id).item(product_id, 1))
            .await
            .unwrap();
        assert_eq!(orders.len().await, 1);
        assert_eq!(order.total(), 35.0);
        assert_eq!(metrics.orders_created.get(), 1);

        let failures = metrics.event_publish_failures.with_label_values(&[ORDER_CREATED]);
        for _ in 0..50 {
            if failures.get() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(failures.get(), 1);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_order_by_id_not_found() {
        let fx = Fixture::new().await;
        let missing = Uuid::new_v4();

        let err = fx.service.get_order_by_id(missing).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_get_orders_for_unknown_user_skips_order_store() {
        let fx = Fixture::new().await;

        let err = fx.service.get_orders_by_user_id(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidUser(_)));
        assert_eq!(fx.orders.call_count(), 0);
    }

    #[tokio::test]
    async fn test_get_orders_by_user_id() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Pen", 1.5, 10).await;

        fx.create(&[(p1, 1)]).await.unwrap();
        fx.create(&[(p1, 2)]).await.unwrap();

        let orders = fx.service.get_orders_by_user_id(fx.user_id).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.user_id() == fx.user_id));
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_status_update_publishes_old_and_new_status() {
        let fx = Fixture::new().await;
        let mut rx = fx.capture(ORDER_STATUS_UPDATED).await;
        let p1 = fx.add_product("Pen", 1.5, 10).await;
        let order = fx.create(&[(p1, 1)]).await.unwrap();

        fx.service
            .update_order_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.payload["old_status"], "pending");
        assert_eq!(event.payload["new_status"], "confirmed");

        let stored = fx.service.get_order_by_id(order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_status_update_unknown_order() {
        let fx = Fixture::new().await;

        let err = fx
            .service
            .update_order_status(Uuid::new_v4(), OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_update_zero_rows_is_persistence_error() {
        let users = Arc::new(InMemoryUserDirectory::new());
        let products = Arc::new(InMemoryProductCatalog::new());
        let inner = Arc::new(InMemoryOrderRepository::new());
        let user_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        users
            .insert(User {
                id: user_id,
                name: "Di".to_string(),
                email: "di@example.com".to_string(),
            })
            .await;
        products
            .insert(Product {
                id: product_id,
                name: "Mug".to_string(),
                price: 7.0,
                stock: 4,
            })
            .await;

        let service = OrderWorkflowService::new(
            users,
            products,
            Arc::new(VanishingOrders { inner }),
            Arc::new(EventBus::new()),
        );

        let order = service
            .create_order(CreateOrderRequest::new(user_id).item(product_id, 1))
            .await
            .unwrap();
        let err = service
            .update_order_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_status_update_store_failure() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Pen", 1.5, 10).await;
        let order = fx.create(&[(p1, 1)]).await.unwrap();
        fx.orders.fail_updates(true);

        let err = fx
            .service
            .update_order_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Persistence { operation: "order status update", .. }));

        fx.orders.fail_updates(false);
        let stored = fx.service.get_order_by_id(order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_every_invalid_transition_rejected() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("Pen", 1.5, 10).await;
        let order = fx.create(&[(p1, 1)]).await.unwrap();

        for target in [OrderStatus::Pending, OrderStatus::Shipped, OrderStatus::Delivered] {
            let err = fx
                .service
                .update_order_status(order.id(), target)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::Order(OrderError::InvalidTransition { .. })
            ));
        }
    }

    // ------------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_pending_restores_each_item() {
        let fx = Fixture::new().await;
        let mut rx = fx.capture(ORDER_CANCELLED).await;
        let pa = fx.add_product("A", 3.0, 10).await;
        let pb = fx.add_product("B", 4.0, 10).await;

        let order = fx.create(&[(pa, 2), (pb, 1)]).await.unwrap();
        assert_eq!(fx.stock(pa).await, 8);
        assert_eq!(fx.stock(pb).await, 9);

        fx.service.cancel_order(order.id()).await.unwrap();

        assert_eq!(fx.stock(pa).await, 10);
        assert_eq!(fx.stock(pb).await, 10);

        let event = next_event(&mut rx).await;
        assert_eq!(event.payload["user_id"], fx.user_id.to_string());
        assert_eq!(event.payload["total"], 10.0);
    }

    #[tokio::test]
    async fn test_cancel_shipped_restores_nothing() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("A", 3.0, 10).await;
        let order = fx.create(&[(p1, 4)]).await.unwrap();

        fx.service
            .update_order_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap();
        fx.service
            .update_order_status(order.id(), OrderStatus::Shipped)
            .await
            .unwrap();

        let cancelled = fx.service.cancel_order(order.id()).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(fx.stock(p1).await, 6);
    }

    #[tokio::test]
    async fn test_cancel_terminal_orders() {
        let fx = Fixture::new().await;
        let p1 = fx.add_product("A", 3.0, 10).await;

        let delivered = fx.create(&[(p1, 1)]).await.unwrap();
        for status in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            fx.service.update_order_status(delivered.id(), status).await.unwrap();
        }
        let err = fx.service.cancel_order(delivered.id()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Order(OrderError::TerminalState(OrderStatus::Delivered))
        ));

        let cancelled = fx.create(&[(p1, 1)]).await.unwrap();
        fx.service.cancel_order(cancelled.id()).await.unwrap();
        let err = fx.service.cancel_order(cancelled.id()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Order(OrderError::AlreadyCancelled)));

        // Second cancel must not restore stock twice
        assert_eq!(fx.stock(p1).await, 9);
    }

    #[tokio::test]
    async fn test_cancel_continues_when_one_restoration_fails() {
        let fx = Fixture::new().await;
        let pa = fx.add_product("A", 3.0, 10).await;
        let pb = fx.add_product("B", 4.0, 10).await;
        let order = fx.create(&[(pa, 2), (pb, 1)]).await.unwrap();

        fx.products.fail_updates_for(pa).await;
        let cancelled = fx.service.cancel_order(order.id()).await.unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(fx.stock(pa).await, 8);
        assert_eq!(fx.stock(pb).await, 10);

        let stored = fx.service.get_order_by_id(order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let fx = Fixture::new().await;
        let err = fx.service.cancel_order(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_metrics_track_rejections() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let fx = Fixture::new().await;
        let service = OrderWorkflowService::new(
            Arc::new(InMemoryUserDirectory::new()),
            fx.products.clone(),
            fx.orders.clone(),
            Arc::new(EventBus::new()),
        )
        .with_metrics(metrics.clone());

        let _ = service
            .create_order(CreateOrderRequest::new(Uuid::new_v4()).item(Uuid::new_v4(), 1))
            .await;

        let rejected = metrics
            .orders_rejected
            .with_label_values(&["create_order", "invalid_user"])
            .get();
        assert_eq!(rejected, 1);
        assert_eq!(metrics.orders_created.get(), 0);
    }
}
