// ============================================================================
// Messaging - event envelope and publishers
// ============================================================================

mod event;
mod event_bus;
mod redpanda;

pub use event::Event;
pub use event_bus::{EventBus, EventHandler};
pub use redpanda::RedpandaEventPublisher;
