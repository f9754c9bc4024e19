mod harness;
mod runner;
mod settings;

pub use harness::{create_instruction, HarnessConfig};
pub use runner::{AgentBackend, AgentRequest, ProcessBackend};
pub use settings::Credentials;
