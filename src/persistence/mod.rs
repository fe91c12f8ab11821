pub mod memory;
pub mod sqlx_impl;

pub use memory::MemoryPersistence;
pub use sqlx_impl::SqlxPersistence;
