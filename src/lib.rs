pub mod agent;
pub mod engine;
pub mod error;
pub mod filter;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod reasoner;
pub mod settings;
pub mod store;
pub mod table;
pub mod tools;

pub use engine::AgentService;
pub use error::AgentError;
pub use settings::Settings;
