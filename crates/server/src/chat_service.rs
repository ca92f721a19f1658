//! The chat flow: call the provider, account for it, answer the caller.
//!
//! The provider handle is injected once at construction; there is no lazy
//! global client. Every attempt lands in the ledger exactly once: success
//! records carry usage, latency, and cost; failures (timeouts included)
//! produce a best-effort error record that never masks the original error.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokenscope::chat::{ChatMessage, ChatProvider};
use tokenscope::pricing::RateTable;

use crate::session::error::{SessionError, SessionResult};
use crate::session::store::{EventDescriptor, EventLedger, Session, SuccessRecord};
use crate::session::SqliteStorage;

/// What a successful chat returns to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub response: String,
    pub event_id: String,
}

pub struct ChatService {
    provider: Arc<dyn ChatProvider>,
    storage: Arc<SqliteStorage>,
    rates: RateTable,
    /// Recorded on every event as the invocation endpoint descriptor.
    endpoint: String,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        storage: Arc<SqliteStorage>,
        rates: RateTable,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            storage,
            rates,
            endpoint: endpoint.into(),
        }
    }

    pub async fn chat(&self, session: &Session, message: &str) -> SessionResult<ChatOutcome> {
        if !session.is_active {
            return Err(SessionError::Inactive(session.token.clone()));
        }

        let descriptor = EventDescriptor {
            model: Some(self.provider.model().to_string()),
            provider: Some(self.provider.name().to_string()),
            endpoint: Some(self.endpoint.clone()),
        };
        let messages = vec![ChatMessage::user(message)];

        let started = Instant::now();
        let result = self.provider.chat(&messages).await;
        let latency_ms = started.elapsed().as_millis() as u32;

        match result {
            Ok(reply) => {
                let cost_usd = match self.rates.cost_usd(
                    self.provider.name(),
                    &reply.model,
                    reply.usage.input_tokens,
                    reply.usage.output_tokens,
                ) {
                    Ok(cost) => cost,
                    Err(err) => {
                        self.record_error_best_effort(session, descriptor, &err.to_string())
                            .await;
                        return Err(SessionError::RateUnknown(err));
                    }
                };

                let record = SuccessRecord {
                    tokens_prompt: reply.usage.input_tokens,
                    tokens_completion: reply.usage.output_tokens,
                    latency_ms,
                    cost_usd,
                    messages: json!([{"role": "user", "content": message}]),
                    response: reply.text.clone(),
                };
                let event = self
                    .storage
                    .record_success(session, descriptor, record)
                    .await?;

                log::info!(
                    "chat for session {} used {} tokens in {}ms",
                    session.token,
                    event.tokens_total,
                    latency_ms
                );
                Ok(ChatOutcome {
                    response: reply.text,
                    event_id: event.id,
                })
            }
            Err(err) => {
                log::error!("chat failed for session {}: {}", session.token, err);
                self.record_error_best_effort(session, descriptor, &err.to_string())
                    .await;
                Err(SessionError::Provider(err))
            }
        }
    }

    /// A secondary failure to persist the error record is logged, never
    /// raised: the caller must see the original provider error.
    async fn record_error_best_effort(
        &self,
        session: &Session,
        descriptor: EventDescriptor,
        error_message: &str,
    ) {
        if let Err(ledger_err) = self
            .storage
            .record_error(session, descriptor, error_message)
            .await
        {
            log::error!(
                "failed to record error event for session {}: {}",
                session.token,
                ledger_err
            );
        }
    }
}
