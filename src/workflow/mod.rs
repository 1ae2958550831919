pub mod builder;
pub mod engine;
pub mod types;

pub use builder::WorkflowBuilder;
pub use engine::run_workflow;
pub use types::*;
