pub mod common;
pub mod node;
pub mod node_pool;
pub mod pod;
pub mod snapshot;
