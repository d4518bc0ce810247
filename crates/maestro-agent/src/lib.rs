//! Agent catalog and language-model completion clients for Maestro.
//!
//! Agents are static descriptors; the only capability the workflow engine
//! needs from the outside world is [`CompletionClient`], implemented here for
//! Claude, OpenAI-compatible providers, and an offline echo backend.

pub mod backends;
pub mod client;
pub mod config;
pub mod failover;
pub mod registry;
pub mod stream;

pub use client::{
    collect_stream, Completion, CompletionClient, CompletionRequest, CompletionStream, LlmClient,
    TokenUsage,
};
pub use config::{LlmProvider, ModelConfig};
pub use failover::{FailoverClient, RetryPolicy};
pub use registry::{builtin_agents, AgentDescriptor, AgentProvider, AgentRegistry};
pub use stream::CompletionChunk;
