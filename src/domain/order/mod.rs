// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderItem, OrderStatus)
// - Events (OrderCreated, OrderStatusUpdated, OrderCancelled)
// - Requests (CreateOrderRequest)
// - Errors (ValidationError, OrderError, WorkflowError)
// - Aggregate (Order record and OrderAggregate rules)
// - Workflow (OrderWorkflowService orchestration)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod workflow;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use workflow::*;
