pub mod agents;
pub mod locks;
pub mod queue;
pub mod tasks;
