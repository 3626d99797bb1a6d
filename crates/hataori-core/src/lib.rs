//! Core traits and types for the hataori workflow engine.
//!
//! This crate provides the contracts shared by the engine and by the things
//! plugged into it, without any runtime dependency. Implement
//! [`ActivityProvider`] to expose activities and [`WorkflowStorage`] /
//! [`ActivityStorage`] to persist executions.
//!
//! # Core Types
//!
//! - [`ActivityProvider`] - Named units of callable work
//! - [`WorkflowStorage`] / [`ActivityStorage`] - Persistence contracts
//! - [`WorkflowRecord`] / [`ActivityKey`] - What gets persisted
//! - [`WorkflowError`] - Error type for every fallible operation
//! - [`WorkflowName`], [`WorkflowId`], [`ProviderName`], [`ActivityName`],
//!   [`ActivityId`] - Name and identifier newtypes

mod error;
mod name;
mod provider;
mod storage;

pub use error::{Phase, WorkflowError};
pub use name::{ActivityId, ActivityName, ProviderName, WorkflowId, WorkflowName};
pub use provider::ActivityProvider;
pub use storage::{ActivityKey, ActivityStorage, WorkflowRecord, WorkflowStorage};
