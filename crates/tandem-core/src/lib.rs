pub mod browser;
pub mod categorize;
pub mod config;
pub mod events;
pub mod library;
pub mod loader;
pub mod orchestrator;
pub mod reasoner;
pub mod recovery;
pub mod reporter;
pub mod sandbox;
pub mod step_executor;
pub mod strategies;
pub mod synthesize;

pub use tandem_common as common;

pub use browser::Browser;
pub use config::TandemConfig;
pub use orchestrator::Orchestrator;
pub use reasoner::Reasoner;
