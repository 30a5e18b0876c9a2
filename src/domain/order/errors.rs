use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Order ID cannot be empty")]
    EmptyOrderId,

    #[error("User ID cannot be empty")]
    EmptyUserId,

    #[error("Order must have at least one item")]
    EmptyItems,

    #[error("Invalid item at position {position}: product ID cannot be empty")]
    EmptyProductId { position: usize },

    #[error("Invalid item at position {position}: quantity must be greater than zero, got {quantity}")]
    InvalidQuantity { position: usize, quantity: i32 },

    #[error("Invalid item at position {position}: price must be greater than zero, got {price}")]
    InvalidPrice { position: usize, price: f64 },

    #[error("Order total must be greater than zero, got {0}")]
    NonPositiveTotal(f64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Cannot cancel order in terminal status: {0}")]
    TerminalState(OrderStatus),

    #[error("Can only add items to pending orders, order is {0}")]
    NotMutable(OrderStatus),
}

// ============================================================================
// Workflow Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Invalid user ID: {0}")]
    InvalidUser(Uuid),

    #[error("Invalid product ID: {0}")]
    InvalidProduct(Uuid),

    #[error("Insufficient stock for product {product_name} ({product_id}): requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        product_name: String,
        requested: i32,
        available: i32,
    },

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Persistence failure during {operation}: {reason}")]
    Persistence {
        operation: &'static str,
        reason: String,
    },
}

impl WorkflowError {
    pub(crate) fn persistence(operation: &'static str, err: impl std::fmt::Display) -> Self {
        WorkflowError::Persistence {
            operation,
            reason: err.to_string(),
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Order(OrderError::Validation(_)) => "validation",
            WorkflowError::Order(OrderError::InvalidTransition { .. }) => "invalid_transition",
            WorkflowError::Order(OrderError::AlreadyCancelled) => "already_cancelled",
            WorkflowError::Order(OrderError::TerminalState(_)) => "terminal_state",
            WorkflowError::Order(OrderError::NotMutable(_)) => "not_mutable",
            WorkflowError::InvalidUser(_) => "invalid_user",
            WorkflowError::InvalidProduct(_) => "invalid_product",
            WorkflowError::InsufficientStock { .. } => "insufficient_stock",
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Persistence { .. } => "persistence",
        }
    }
}
