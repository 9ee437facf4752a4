//! Declarative graph data model and the executor that steps it (spec §3, §4.1).

mod compile_error;
mod condition;
mod edge_spec;
mod executor;
mod exec_result;
mod node_impl;
mod node_spec;
mod session;
mod spec;

pub use compile_error::CompilationError;
pub use condition::{evaluate as evaluate_condition, EvalEnv};
pub use edge_spec::{EdgeCondition, EdgeSpec};
pub use exec_result::{ExecutionResult, ExecutionStatus};
pub use executor::{ExecutorConfig, GraphExecutor, RunDeps};
pub use node_impl::{FunctionImpl, FunctionRegistry, NodeImplementation, NodeRegistry, NodeRunOutcome};
pub use node_spec::{NodeKind, NodeSpec};
pub use session::{ResumeInput, SessionState};
pub use spec::{GraphSpec, LoopConfig};
