//! Durable booking engine for rentable spaces. Conflict-checked
//! scheduling with payment tracking, served over a newline-delimited
//! JSON protocol.

pub mod auth;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod tls;
pub mod wal;
pub mod wire;
