use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::errors::{OrderError, ValidationError};
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Record - plain data, read-only outside the aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    id: Uuid,
    user_id: Uuid,
    items: Vec<OrderItem>,
    status: OrderStatus,
    total: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Rehydrate a stored order. The total is recomputed from the items.
    pub fn restore(
        id: Uuid,
        user_id: Uuid,
        items: Vec<OrderItem>,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let order = Self {
            id,
            user_id,
            total: calculate_total(&items),
            items,
            status,
            created_at,
            updated_at,
        };
        validate_order(&order)?;
        Ok(order)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

/// Sole owner of order mutation. Wraps an [`Order`] record.
#[derive(Debug, Clone)]
pub struct OrderAggregate {
    order: Order,
}

impl OrderAggregate {
    /// Build a new pending order.
    pub fn create(id: Uuid, user_id: Uuid, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        validate_user_id(user_id)?;
        validate_items(&items)?;

        let now = Utc::now();
        let order = Order {
            id,
            user_id,
            total: calculate_total(&items),
            items,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        Ok(Self { order })
    }

    pub fn from_order(order: Order) -> Self {
        Self { order }
    }

    pub fn update_status(&mut self, new_status: OrderStatus) -> Result<(), OrderError> {
        let current = self.order.status;
        if !current.can_transition_to(new_status) {
            return Err(OrderError::InvalidTransition {
                from: current,
                to: new_status,
            });
        }

        self.order.status = new_status;
        self.touch();
        Ok(())
    }

    /// Cancel the order. Shipped orders may still be cancelled; only
    /// delivered and already-cancelled orders are rejected.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.order.status {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            OrderStatus::Delivered => return Err(OrderError::TerminalState(OrderStatus::Delivered)),
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Shipped => {}
        }

        self.order.status = OrderStatus::Cancelled;
        self.touch();
        Ok(())
    }

    pub fn add_item(&mut self, item: OrderItem) -> Result<(), OrderError> {
        if self.order.status != OrderStatus::Pending {
            return Err(OrderError::NotMutable(self.order.status));
        }
        validate_item(self.order.items.len(), &item)?;

        self.order.items.push(item);
        self.order.total = calculate_total(&self.order.items);
        self.touch();
        Ok(())
    }

    /// Re-check every invariant. Called before persistence.
    pub fn validate(&self) -> Result<(), OrderError> {
        validate_order(&self.order)
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn into_order(self) -> Order {
        self.order
    }

    fn touch(&mut self) {
        self.order.updated_at = Utc::now();
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_order(order: &Order) -> Result<(), OrderError> {
    if order.id.is_nil() {
        return Err(ValidationError::EmptyOrderId.into());
    }
    validate_user_id(order.user_id)?;
    validate_items(&order.items)?;

    if order.total <= 0.0 {
        return Err(ValidationError::NonPositiveTotal(order.total).into());
    }

    Ok(())
}

fn validate_user_id(user_id: Uuid) -> Result<(), ValidationError> {
    if user_id.is_nil() {
        return Err(ValidationError::EmptyUserId);
    }
    Ok(())
}

fn validate_items(items: &[OrderItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyItems);
    }

    for (position, item) in items.iter().enumerate() {
        validate_item(position, item)?;
    }

    Ok(())
}

fn validate_item(position: usize, item: &OrderItem) -> Result<(), ValidationError> {
    if item.product_id.is_nil() {
        return Err(ValidationError::EmptyProductId { position });
    }
    if item.quantity <= 0 {
        return Err(ValidationError::InvalidQuantity {
            position,
            quantity: item.quantity,
        });
    }
    // `!(x > 0)` also rejects NaN
    if !(item.price > 0.0) {
        return Err(ValidationError::InvalidPrice {
            position,
            price: item.price,
        });
    }
    Ok(())
}

fn calculate_total(items: &[OrderItem]) -> f64 {
    items.iter().map(OrderItem::subtotal).sum()
}

// ============================================================================
// Unit Tests
// ============================================================================
