// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates and the workflows that drive them. Storage, users, products and
// event delivery are reached only through the traits in `crate::ports`.
//
// ============================================================================

pub mod order;
