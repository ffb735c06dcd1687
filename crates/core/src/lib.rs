//! # toolflow core
//!
//! Domain types, traits, and error definitions for the toolflow orchestration
//! runtime. This crate has **no framework dependencies**: it defines the model
//! that the filter, agent, provider, and gateway crates build against.
//!
//! ## Layout
//!
//! - [`tool`]: tool specifications, invocation request/result, the handler trait
//!   and the [`ToolRegistry`].
//! - [`message`]: conversation messages and the per-run [`ConversationState`].
//! - [`provider`]: the model capability ([`Provider`]) the engine calls at DECIDE.
//! - [`event`]: the five-variant [`FlowEvent`] stream a run produces.
//! - [`error`]: `thiserror` enums for each bounded context.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{ActionRecord, EventClock, FlowEvent};
pub use message::{ConversationId, ConversationState, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{
    Parameters, ToolHandler, ToolInvocationRequest, ToolInvocationResult, ToolParameter,
    ToolRegistry, ToolSpec, handler_fn,
};
