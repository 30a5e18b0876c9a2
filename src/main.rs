use futures_util::FutureExt;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use order_workflow::config::Config;
use order_workflow::domain::order::{
    CreateOrderRequest, OrderStatus, OrderWorkflowService, ORDER_CANCELLED, ORDER_CREATED,
    ORDER_STATUS_UPDATED,
};
use order_workflow::messaging::{EventBus, RedpandaEventPublisher};
use order_workflow::metrics::{self, Metrics};
use order_workflow::ports::{EventPublisher, OrderRepository, Product, ProductStock, User, UserDirectory};
use order_workflow::store::{
    self, InMemoryOrderRepository, InMemoryProductCatalog, InMemoryUserDirectory, PgOrderRepository,
    PgProductStock, PgUserDirectory,
};

struct Stores {
    users: Arc<dyn UserDirectory>,
    products: Arc<dyn ProductStock>,
    orders: Arc<dyn OrderRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_workflow=debug")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(environment = %config.environment, "Starting order workflow demo");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    if config.metrics.enabled {
        let registry = Arc::new(metrics.registry().clone());
        let port = config.metrics.port;
        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            if let Err(e) = system.block_on(metrics::start_metrics_server(registry, port)) {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    }

    // === 2. Demo data ===
    let user = User {
        id: Uuid::new_v4(),
        name: "Demo Customer".to_string(),
        email: "customer@example.com".to_string(),
    };
    let product = Product {
        id: Uuid::new_v4(),
        name: "Mechanical Keyboard".to_string(),
        price: 10.0,
        stock: 5,
    };

    // === 3. Storage ===
    let stores = match &config.database.url {
        Some(url) => {
            let pool = store::connect(url, config.database.max_connections).await?;
            let users = PgUserDirectory::new(pool.clone());
            let products = PgProductStock::new(pool.clone());
            users.insert(&user).await?;
            products.insert(&product).await?;

            Stores {
                users: Arc::new(users),
                products: Arc::new(products),
                orders: Arc::new(PgOrderRepository::new(pool)),
            }
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            let users = InMemoryUserDirectory::new();
            let products = InMemoryProductCatalog::new();
            users.insert(user.clone()).await;
            products.insert(product.clone()).await;

            Stores {
                users: Arc::new(users),
                products: Arc::new(products),
                orders: Arc::new(InMemoryOrderRepository::new()),
            }
        }
    };

    // === 4. Event publishing ===
    let publisher: Arc<dyn EventPublisher> = match &config.redpanda.brokers {
        Some(brokers) => Arc::new(
            RedpandaEventPublisher::new(brokers, &config.redpanda.topic)?.with_metrics(metrics.clone()),
        ),
        None => {
            tracing::info!("REDPANDA_BROKERS not set, using in-memory event bus");
            let bus = EventBus::new();
            for event_type in [ORDER_CREATED, ORDER_STATUS_UPDATED, ORDER_CANCELLED] {
                bus.subscribe(event_type, |event| {
                    async move {
                        tracing::info!(
                            event_type = %event.event_type,
                            aggregate_id = %event.aggregate_id,
                            payload = %event.payload,
                            "Event received"
                        );
                        Ok::<(), anyhow::Error>(())
                    }
                    .boxed()
                })
                .await;
            }
            Arc::new(bus)
        }
    };

    let service = OrderWorkflowService::new(
        stores.users,
        stores.products.clone(),
        stores.orders,
        publisher,
    )
    .with_compensation_retry(config.compensation.retry_config())
    .with_metrics(metrics.clone());

    // === 5. Order lifecycle ===
    run_scenario(&service, stores.products.as_ref(), user.id, product.id).await?;

    if config.metrics.enabled {
        tracing::info!(port = config.metrics.port, "Serving metrics, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("Shutting down");
    Ok(())
}

async fn run_scenario(
    service: &OrderWorkflowService,
    products: &dyn ProductStock,
    user_id: Uuid,
    product_id: Uuid,
) -> anyhow::Result<()> {
    let order = service
        .create_order(CreateOrderRequest::new(user_id).item(product_id, 3))
        .await?;
    let stock = stock_of(products, product_id).await;
    tracing::info!(order_id = %order.id(), total = order.total(), stock = ?stock, "Order placed");

    let order = service
        .update_order_status(order.id(), OrderStatus::Confirmed)
        .await?;
    tracing::info!(order_id = %order.id(), status = %order.status(), "Order confirmed");

    match service
        .update_order_status(order.id(), OrderStatus::Delivered)
        .await
    {
        Ok(_) => tracing::warn!(order_id = %order.id(), "Delivery skipped shipping"),
        Err(e) => tracing::info!(order_id = %order.id(), error = %e, "Delivery rejected as expected"),
    }

    let order = service.cancel_order(order.id()).await?;
    let stock = stock_of(products, product_id).await;
    tracing::info!(order_id = %order.id(), status = %order.status(), stock = ?stock, "Order cancelled");

    let history = service.get_orders_by_user_id(user_id).await?;
    tracing::info!(user_id = %user_id, orders = history.len(), "Order history loaded");

    // Let spawned event publications drain before the runtime stops
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}

async fn stock_of(products: &dyn ProductStock, product_id: Uuid) -> Option<i32> {
    match products.get_product_by_id(product_id).await {
        Ok(product) => product.map(|p| p.stock),
        Err(e) => {
            tracing::warn!(product_id = %product_id, error = %e, "Failed to read stock");
            None
        }
    }
}
