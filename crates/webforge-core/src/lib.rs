pub mod agents;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod store;

pub use agents::{AgentError, AgentResult, ChatCompletion, ChatMessage, ChatResponse};
pub use config::Settings;
pub use events::EventBus;
pub use orchestrator::{BuildInputs, OrchestratorError, SinglePageOrchestrator};
pub use store::{BuildStateStore, InMemoryBuildStateStore, StoreError};
