pub mod assistant;
pub mod server;

pub use assistant::configuration::Configuration;
pub use assistant::error::{ChatError, ConfigurationError, FailureReason, ModelError};
pub use assistant::graph::ResearchGraph;
pub use assistant::state::{
    ConversationTurn, ExtractedDocument, ExtractionStatus, Origin, Phase, Report, ResearchContext,
    ResearchSession, Role, SourceResult, StatusUpdate,
};

use dotenv::dotenv;

pub fn init() {
    dotenv().ok();
}
