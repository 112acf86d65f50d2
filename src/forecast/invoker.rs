//! "Ask until parseable, or give up."
//!
//! The invoker combines the completion client, the extractor and the
//! conversation store. Only content failures are retried; a transport
//! failure or a missing conversation ends the invocation at once.

use std::sync::Arc;

use crate::errors::ForecastError;
use crate::extract::{ExtractOutcome, JsonObject, classify};
use crate::forecast::types::{
    Acceptance, AttemptOutcome, AttemptRecord, CompletionResult, ForecastRequest, Phase,
    ResponseShape, ResultMetadata,
};
use crate::llm::types::last_assistant_reply;
use crate::llm::{ChatMessage, CompletionClient, ConversationStore};
use crate::prompts::FORECASTER_SYSTEM_PROMPT;

pub struct RetryingInvoker {
    client: Arc<dyn CompletionClient>,
    store: Arc<ConversationStore>,
    model: String,
    system_prompt: String,
    shape: ResponseShape,
}

impl RetryingInvoker {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<ConversationStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            model: model.into(),
            system_prompt: FORECASTER_SYSTEM_PROMPT.to_string(),
            shape: ResponseShape::default(),
        }
    }

    /// Replace the system message that seeds new conversations.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Set the shape a parsed reply must have to be accepted.
    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Invoke `request` for `phase`, making at most `max_retries` attempts.
    ///
    /// Generation seeds the conversation with the system message and the
    /// prompt, and appends the accepted reply so the reflection pass sees
    /// the full exchange. Reflection sends the existing conversation with
    /// its prompt appended and records the exchange once accepted; a reply
    /// that opens with "true" but carries no JSON accepts the previous
    /// answer.
    pub async fn invoke(
        &self,
        request: &ForecastRequest,
        phase: Phase,
        max_retries: u32,
    ) -> CompletionResult {
        let mut result = CompletionResult {
            request_id: request.request_id.clone(),
            storm_id: request.storm_id.clone(),
            raw_text: String::new(),
            parsed_object: None,
            metadata: ResultMetadata {
                lead_time_hours: request.lead_time_hours,
                model: self.model.clone(),
                phase,
                attempts: 0,
                acceptance: None,
            },
            attempt_log: Vec::new(),
            error: None,
        };

        let conversation = match self.prepare_conversation(request, phase) {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::error!(request_id = %request.request_id, %phase, error = %e, "Cannot start invocation");
                result.error = Some(e.to_string());
                return result;
            }
        };
        let prior_reply = last_assistant_reply(&conversation).map(str::to_string);

        for attempt in 1..=max_retries {
            let retries_remaining = max_retries - attempt;
            result.metadata.attempts = attempt;

            let text = match self.client.complete(&self.model, &conversation).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        %phase,
                        attempt,
                        error = %e,
                        "Completion call failed; not retrying"
                    );
                    result.attempt_log.push(AttemptRecord {
                        attempt,
                        raw_text: String::new(),
                        outcome: AttemptOutcome::TransportFailed {
                            message: e.to_string(),
                        },
                        retries_remaining,
                    });
                    result.error = Some(e.to_string());
                    return result;
                }
            };
            result.raw_text = text.clone();

            match self.accept(&text, phase, prior_reply.as_deref()) {
                Ok((object, acceptance)) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        %phase,
                        attempt,
                        ?acceptance,
                        "Reply accepted"
                    );
                    result.attempt_log.push(AttemptRecord {
                        attempt,
                        raw_text: text.clone(),
                        outcome: AttemptOutcome::Accepted { acceptance },
                        retries_remaining,
                    });

                    // Only accepted exchanges join the thread; rejected
                    // attempts resend the same conversation.
                    let exchange = match phase {
                        Phase::Generation => vec![ChatMessage::assistant(text)],
                        Phase::Reflection => vec![
                            ChatMessage::user(&request.rendered_prompt),
                            ChatMessage::assistant(text),
                        ],
                    };
                    if let Err(e) = self.store.append(&request.request_id, exchange) {
                        result.error = Some(e.to_string());
                        return result;
                    }

                    result.parsed_object = Some(object);
                    result.metadata.acceptance = Some(acceptance);
                    return result;
                }
                Err(reason) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        %phase,
                        attempt,
                        retries_remaining,
                        %reason,
                        "Reply rejected"
                    );
                    result.attempt_log.push(AttemptRecord {
                        attempt,
                        raw_text: text,
                        outcome: AttemptOutcome::Rejected { reason },
                        retries_remaining,
                    });
                }
            }
        }

        tracing::warn!(
            request_id = %request.request_id,
            %phase,
            attempts = result.metadata.attempts,
            "Retry budget exhausted without a usable reply"
        );
        result.error = Some(format!(
            "no usable reply after {} attempt(s)",
            result.metadata.attempts
        ));
        result
    }

    fn prepare_conversation(
        &self,
        request: &ForecastRequest,
        phase: Phase,
    ) -> Result<Vec<ChatMessage>, ForecastError> {
        match phase {
            Phase::Generation => {
                self.store.ensure(
                    &request.request_id,
                    vec![
                        ChatMessage::system(&self.system_prompt),
                        ChatMessage::user(&request.rendered_prompt),
                    ],
                )?;
                self.store.get(&request.request_id)
            }
            Phase::Reflection => {
                let mut thread = self.store.get(&request.request_id)?;
                thread.push(ChatMessage::user(&request.rendered_prompt));
                Ok(thread)
            }
        }
    }

    fn accept(
        &self,
        text: &str,
        phase: Phase,
        prior_reply: Option<&str>,
    ) -> Result<(JsonObject, Acceptance), String> {
        let (object, acceptance) = match classify(text, phase, prior_reply) {
            ExtractOutcome::Parsed(object) => (object, Acceptance::Parsed),
            ExtractOutcome::ImplicitAccept(object) => (object, Acceptance::Affirmed),
            ExtractOutcome::NeedsRetry(reason) => return Err(reason),
        };
        self.shape.validate(&object)?;
        Ok((object, acceptance))
    }
}
