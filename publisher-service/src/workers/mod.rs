pub mod send_pool;

pub use send_pool::{OverflowPolicy, PoolConfig, SendPool};
