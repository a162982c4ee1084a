//! # statechart-persist
//!
//! Persistence boundary for statechart machines.
//!
//! This crate provides:
//! - A versioned, checksummed codec for [`StateMachineContext`] records
//! - The [`StateMachinePersist`] store trait and an in-memory store
//! - [`DefaultStateMachinePersister`] to persist and restore machines by key
//! - [`PersistingInterceptor`] to persist after every state change
//!
//! [`StateMachineContext`]: statechart_core::StateMachineContext

pub mod codec;
pub mod error;
pub mod interceptor;
pub mod persist;
pub mod persister;

pub use codec::{ContextCodec, CODEC_VERSION, CONTEXT_MAGIC, MAX_RECORD_SIZE};
pub use error::PersistError;
pub use interceptor::PersistingInterceptor;
pub use persist::{InMemoryStateMachinePersist, StateMachinePersist};
pub use persister::DefaultStateMachinePersister;
