//! hive-node internals, exposed as a library so integration tests can wire
//! dispatchers without a running Lightning node.

pub mod dispatch;
pub mod logging;
pub mod tasks;
