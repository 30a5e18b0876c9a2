// ============================================================================
// Order Workflow - order placement with stock compensation
// ============================================================================
//
// Layers:
// - domain:    order aggregate, lifecycle rules and the workflow service
// - ports:     traits for users, product stock, order storage and events
// - store:     in-memory and PostgreSQL adapters
// - messaging: event envelope, in-memory bus and Redpanda publisher
// - metrics:   Prometheus registry and HTTP exposition
// - utils:     retry with backoff and circuit breaker
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod ports;
pub mod store;
pub mod utils;

pub use config::Config;
pub use domain::order::{
    CreateOrderRequest, Order, OrderAggregate, OrderError, OrderItem, OrderStatus,
    OrderWorkflowService, WorkflowError,
};
