mod dispatch;
pub mod error;
mod link;
mod pool;
mod promise;

pub use error::{PoolError, PromiseError};
pub use pool::{Node, NodeId, NodeInfo, NodePool, PoolCounts};
pub use promise::{Phase, Promise};
