//! Postgres-backed persistence for the task orchestrator: task and agent
//! rows, the priority queue, named locks, and task-update pub/sub.

pub mod config;
pub mod models;
pub mod pool;
pub mod pubsub;
pub mod queries;
