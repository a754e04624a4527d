//! hive-state — persistent state database for the hive coordinator.

mod db;

pub use db::StateDb;
