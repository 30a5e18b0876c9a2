use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order Requests - Represent caller intent
// ============================================================================

/// A line as requested by the caller. Price is resolved from the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub items: Vec<RequestedItem>,
}

impl CreateOrderRequest {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            items: Vec::new(),
        }
    }

    pub fn item(mut self, product_id: Uuid, quantity: i32) -> Self {
        self.items.push(RequestedItem {
            product_id,
            quantity,
        });
        self
    }
}
