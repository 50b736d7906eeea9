// Public module exports
pub mod cancel;
pub mod dispatcher;
pub mod orchestrator;
pub mod standardize;
pub mod state;

// Re-export main types for convenience
pub use cancel::{CancellationToken, RequestManager};
pub use dispatcher::{Dispatch, reduce};
pub use orchestrator::{NoopObserver, Orchestrator, SessionContext, StageObserver, StageStopper};
pub use state::{BatchPlan, Stage, StageState, StageStatus, WorkflowState};
