//! # statechart-core
//!
//! Hierarchical state machine runtime.
//!
//! This crate provides:
//! - Model records and validation (states, regions, pseudostates, transitions)
//! - Transition resolution with conflict policies and pseudostate chains
//! - Run-to-completion event dispatch with deferral and triggerless cascades
//! - Timers and cancellable do-activities on a tokio runtime
//! - Serializable snapshots with silent restore

pub mod action;
pub mod activity;
pub mod config;
pub mod context;
pub mod data;
mod dispatcher;
pub mod error;
pub mod executor;
pub mod extended;
pub mod guard;
pub mod hooks;
pub mod interceptor;
pub mod listener;
pub mod machine;
pub mod message;
pub mod model;
mod resolver;
#[cfg(test)]
mod testing;
mod timer;

pub use action::{Action, ActionFailure, DoActivity, Guard, Stage, StateContext};
pub use activity::{ActivityContext, CancellationToken, Interrupted};
pub use config::{
    ActivityConfig, ConfigError, ConflictPolicy, DoActivityPolicy, ExecutorConfig, MachineConfig,
    StateMachineConfig,
};
pub use context::StateMachineContext;
pub use data::{
    BranchData, ModelData, PseudoStateKind, StateData, StateId, TransitionData, TransitionKind,
    DEFAULT_REGION,
};
pub use error::{ActionError, CoreError};
pub use executor::TaskExecutor;
pub use extended::{ExtendedState, ExtendedStateListener};
pub use guard::GuardExpr;
pub use hooks::{EnsembleHook, RuleAuthorizer, TransitionAuthorizer};
pub use interceptor::StateMachineInterceptor;
pub use listener::{LoggingListener, StateMachineListener};
pub use machine::StateMachine;
pub use message::{EventResult, Message, HEADER_DO_ACTION_TIMEOUT, HEADER_PRINCIPAL};
pub use model::{Model, TransitionInfo};

