use std::sync::Arc;
use tracing::{info, warn};

use super::configuration::GenerationConfig;
use super::error::{ChatError, ModelError};
use super::model::GenerativeModel;
use super::prompts::{format_follow_up_instructions, with_system_instruction};
use super::state::{ConversationTurn, ResearchContext};
use super::utils::strip_think_tags;

/// Answers follow-up questions against a finished report.
pub struct FollowUpChat {
    model: Arc<dyn GenerativeModel>,
    generation: GenerationConfig,
    system_instruction: String,
}

impl FollowUpChat {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        generation: GenerationConfig,
        system_instruction: String,
    ) -> Self {
        Self {
            model,
            generation,
            system_instruction,
        }
    }

    /// Asks one question. On success the user turn and the assistant turn are
    /// appended to `history` and the assistant turn is returned. On failure
    /// `history` is left exactly as it was.
    pub async fn ask(
        &self,
        context: &ResearchContext,
        history: &mut Vec<ConversationTurn>,
        question: &str,
    ) -> Result<ConversationTurn, ChatError> {
        let report = context.report.as_ref().ok_or(ChatError::NoReport)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let prompt = with_system_instruction(
            &self.system_instruction,
            &format_follow_up_instructions(&context.topic, &report.body, &format_history(history), question),
        );

        let answer = match self.model.generate(&prompt, &self.generation).await {
            Ok(raw) => strip_think_tags(&raw),
            Err(e) => {
                warn!(topic = %context.topic, error = %e, "follow-up question failed");
                return Err(e.into());
            }
        };
        if answer.is_empty() {
            return Err(ChatError::Model(ModelError::EmptyResponse));
        }

        let turn = ConversationTurn::assistant(answer);
        history.push(ConversationTurn::user(question));
        history.push(turn.clone());
        info!(topic = %context.topic, turns = history.len(), "answered follow-up question");
        Ok(turn)
    }
}

pub fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
