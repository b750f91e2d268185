//! Worker Agent Framework (C6) and Worker Process Entrypoint (C7): the
//! `Agent` trait, its bounded-concurrency execution wrapper, an HTTP server
//! exposing the worker invocation envelope, and registration/heartbeat
//! helpers tying a capability implementation to the orchestrator's state
//! store.

pub mod base;
pub mod registration;
pub mod server;

pub use base::{Agent, AgentHealth, AgentRuntime, TaskInput, TaskOutput};
