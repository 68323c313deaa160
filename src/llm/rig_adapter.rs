//! Bridges rig's `CompletionModel` to the crate's `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};
use rig::one_or_many::OneOrMany;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};

/// Any rig completion model, exposed as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

/// A chat transcript split the way rig's request builder takes it.
#[derive(Debug)]
struct RigParts {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

/// System messages become the preamble; the last other message is the prompt.
fn split_messages(messages: Vec<ChatMessage>, provider: &str) -> Result<RigParts, LlmError> {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for msg in messages {
        match msg.role.as_str() {
            "system" => system.push(msg.content),
            "assistant" => turns.push(Message::assistant(msg.content)),
            _ => turns.push(Message::user(msg.content)),
        }
    }

    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: "request has no user or assistant message".into(),
    })?;

    Ok(RigParts {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history: turns,
        prompt,
    })
}

/// Concatenate the text parts of a completion choice.
fn collect_text(choice: OneOrMany<AssistantContent>) -> String {
    choice
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parts = split_messages(request.messages, self.provider)?;

        let mut builder = self
            .model
            .completion_request(parts.prompt)
            .messages(parts.history);
        if let Some(preamble) = parts.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        debug!(provider = self.provider, model = %self.model_name, "Sending completion request");
        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: e.to_string(),
        })?;

        let content = collect_text(response.choice);
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no text in response".into(),
            });
        }

        Ok(CompletionResponse {
            content,
            total_tokens: Some(response.usage.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_preamble() {
        let parts = split_messages(
            vec![
                ChatMessage::system("You analyze messages."),
                ChatMessage::user("Fiyat nedir?"),
            ],
            "openai",
        )
        .unwrap();
        assert_eq!(parts.preamble.as_deref(), Some("You analyze messages."));
        assert!(parts.history.is_empty());
        assert!(matches!(parts.prompt, Message::User { .. }));
    }

    #[test]
    fn earlier_turns_become_history() {
        let parts = split_messages(
            vec![
                ChatMessage::user("first"),
                ChatMessage {
                    role: "assistant".into(),
                    content: "reply".into(),
                },
                ChatMessage::user("second"),
            ],
            "openai",
        )
        .unwrap();
        assert!(parts.preamble.is_none());
        assert_eq!(parts.history.len(), 2);
        assert!(matches!(parts.history[1], Message::Assistant { .. }));
    }

    #[test]
    fn system_only_request_is_rejected() {
        let err = split_messages(vec![ChatMessage::system("s")], "openai").unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[test]
    fn collect_text_joins_text_parts() {
        let choice = OneOrMany::many(vec![
            AssistantContent::text("{\"a\":"),
            AssistantContent::text("1}"),
        ])
        .unwrap();
        assert_eq!(collect_text(choice), "{\"a\":1}");
        assert_eq!(collect_text(OneOrMany::one(AssistantContent::text("ok"))), "ok");
    }
}
