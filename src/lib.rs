pub mod error;
pub mod types;
pub mod validator;

pub mod stream;
pub mod transport;
pub mod workflow;

pub mod init;

pub use crate::error::{AppError, ErrorCode, Result};
pub use crate::stream::{StreamEvent, StreamOutcome};
pub use crate::transport::{EndpointPaths, HttpTransport, Transport};
pub use crate::workflow::{
    CancellationToken, Orchestrator, RequestManager, SessionContext, Stage, StageObserver,
    StageStatus, WorkflowState,
};
