use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Events - Notifications emitted by the order workflow
// ============================================================================

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_STATUS_UPDATED: &str = "order.status.updated";
pub const ORDER_CANCELLED: &str = "order.cancelled";

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderEvent {
    Created(OrderCreated),
    StatusUpdated(OrderStatusUpdated),
    Cancelled(OrderCancelled),
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => ORDER_CREATED,
            OrderEvent::StatusUpdated(_) => ORDER_STATUS_UPDATED,
            OrderEvent::Cancelled(_) => ORDER_CANCELLED,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Created(e) => e.order_id,
            OrderEvent::StatusUpdated(e) => e.order_id,
            OrderEvent::Cancelled(e) => e.order_id,
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Created - emitted once the order and its stock changes are persisted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub total: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderStatusUpdated {
    pub order_id: Uuid,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

/// Order Cancelled - lifecycle ended, stock possibly restored
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub total: f64,
}
