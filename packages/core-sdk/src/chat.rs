use std::future::Future;

use crate::error::Result;
use crate::llm;
use crate::models::{ChatMessage, CompletionRequest, Provider, Role};

/**
 * \brief An append-only chat transcript driving one completion per turn.
 *
 * Each turn is stateless from the provider's perspective: the raw user
 * text is the whole prompt, no transcript replay. Sends are serialized
 * by construction (&mut self); callers that share a session across
 * tasks wrap it in an async mutex.
 */
#[derive(Debug, Default)]
pub struct ChatSession {
    transcript: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /**
     * \brief Send one user turn through the given provider.
     *
     * Blank input is a no-op (nothing appended, no network). The user
     * message is appended before the network call; on failure the
     * transcript keeps the user entry and no assistant entry is added.
     * Returns the assistant reply, or None for the blank no-op.
     */
    pub async fn send(
        &mut self,
        provider: &Provider,
        model: &str,
        temperature: f64,
        max_output_tokens: u32,
        text: &str,
    ) -> Result<Option<String>> {
        let provider = provider.clone();
        let model = model.to_string();
        self.send_with(text, move |prompt| async move {
            let mut req = CompletionRequest::new(model, prompt);
            req.temperature = temperature;
            req.max_output_tokens = max_output_tokens;
            llm::complete(&provider, &req).await
        })
        .await
    }

    /**
     * \brief Same contract as send(), with the completion call injected.
     */
    pub async fn send_with<F, Fut>(&mut self, text: &str, complete: F) -> Result<Option<String>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.transcript.push(ChatMessage::now(Role::User, text));
        let reply = complete(text.to_string()).await?;
        self.transcript
            .push(ChatMessage::now(Role::Assistant, &reply));
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::ProviderKind;

    #[tokio::test]
    async fn test_blank_input_is_a_no_op() {
        let mut session = ChatSession::new();
        let reply = session
            .send_with("   \n", |_| async {
                panic!("no completion call expected for blank input")
            })
            .await
            .expect("blank send");
        assert!(reply.is_none());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_successful_turn_appends_user_then_assistant() {
        let mut session = ChatSession::new();
        let reply = session
            .send_with("hi", |prompt| async move {
                assert_eq!(prompt, "hi");
                Ok("hello there".to_string())
            })
            .await
            .expect("send");
        assert_eq!(reply.as_deref(), Some("hello there"));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hi");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].content, "hello there");
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_the_user_entry_only() {
        let mut session = ChatSession::new();
        let err = session
            .send_with("hi", |_| async {
                Err(Error::Provider {
                    provider: ProviderKind::HuggingFace,
                    status: 503,
                    message: "loading".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_missing_key_surfaces_configuration_error_with_user_entry() {
        let mut session = ChatSession::new();
        let provider = Provider::new(ProviderKind::Gemini, "");
        let err = session
            .send(&provider, "gemini-1.5-pro", 0.7, 256, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ProviderKind::Gemini)));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, "hi");
    }

    #[tokio::test]
    async fn test_turns_are_stateless_prompts() {
        let mut session = ChatSession::new();
        session
            .send_with("first", |p| async move { Ok(format!("echo {}", p)) })
            .await
            .expect("first turn");
        // Second turn must receive only its own text, never the history.
        session
            .send_with("second", |p| async move {
                assert_eq!(p, "second");
                Ok("ok".to_string())
            })
            .await
            .expect("second turn");
        assert_eq!(session.transcript().len(), 4);
    }
}
