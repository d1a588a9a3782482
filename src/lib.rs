// src/lib.rs

// Import the top-level `squadron` module.
pub mod squadron;

// Re-export the submodules at the crate root so callers write
// squadron::clients::openai instead of squadron::squadron::clients::openai.
pub use squadron::{
    agent, client_wrapper, clients, clock, config, conversation, error, event, fallback, kv,
    orchestrator, prompt, quality, rate, retry, runtime, tool_protocol, tools,
};

// Re-exporting key items for easier external access.
pub use squadron::client_wrapper::{ChatRequest, LlmResponse, Message, ProviderClient, Role};
pub use squadron::error::{FailureKind, SquadronError};
pub use squadron::orchestrator::{Mode, Orchestrator, OrchestratorResult};
pub use squadron::runtime::Squadron;
