// Private module declarations
mod memory;
mod postgres;

pub use memory::{InMemoryOrderRepository, InMemoryProductCatalog, InMemoryUserDirectory};
pub use postgres::{connect, PgOrderRepository, PgProductStock, PgUserDirectory};
