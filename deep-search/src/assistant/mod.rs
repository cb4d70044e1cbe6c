pub mod chat;
pub mod configuration;
pub mod connectors;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod model;
pub mod planner;
pub mod prompts;
pub mod state;
pub mod utils;
