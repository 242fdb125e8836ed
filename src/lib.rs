pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod reaper;
pub mod session;
pub mod staging;
pub mod wal;
pub mod wire;
