//! Task workflow: transition legality, workflow definitions and primary/subtask orchestration.

mod orchestrator;
mod provider;
mod transitions;

pub use orchestrator::{on_task_written, WorkflowOutcome};
pub use provider::{
    CodeKey, MemoryWorkflowProvider, Workflow, WorkflowDefinition, WorkflowProvider, WorkflowStep,
};
pub use transitions::is_valid_transition;
