//! 核心编排层：节点与空间、调用与结果、错误与恢复、并发闸门、会话监管、编排器与注册表

pub mod concurrency;
pub mod error;
pub mod mas;
pub mod node;
pub mod recovery;
pub mod registry;
pub mod request;
pub mod session_supervisor;
pub mod shutdown;
pub mod space;

pub use concurrency::{ConcurrencyGate, GatePermit};
pub use error::{ErrorKind, OxyError, RecoveryAction};
pub use mas::{Mas, MasBuilder, MasSettings, NodeOutcome};
pub use node::{
    DelegateFailurePolicy, MasterConfig, ModelConfig, Node, NodeKind, NodeLocation, ReActConfig,
    ToolConfig,
};
pub use recovery::RecoveryEngine;
pub use registry::MasRegistry;
pub use request::{CallInput, ErrorInfo, ExecResult, OxyRequest, OxyResponse, OxyState};
pub use session_supervisor::{SessionLease, SessionSupervisor};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use space::{builtin_default_space, OxySpace, SpaceCatalog, SpaceOrigin};
