//! Presence-gated assistant
//!
//! The assistant only answers while no staff member has been active within
//! the configured window. It never fails outward: backend errors and timeouts
//! become a scripted reply that hands the client to a human.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use frontdesk_shared::ClientContext;

use crate::notifications::truncate_preview;
use crate::realtime::PresenceRegistry;

pub mod backend;
pub mod escalation;

pub use backend::{AnthropicBackend, AssistantError, CompletionBackend, PromptMessage, PromptRole};
pub use escalation::{needs_escalation, suggested_actions, SuggestedAction, ESCALATION_REASON};

pub const FALLBACK_MESSAGE: &str =
    "I'm having trouble answering right now. A member of our team will get back to you shortly.";

pub const FALLBACK_REASON: &str = "technical error";

/// Longest history line copied into the prompt
const SNIPPET_LINE_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Staff seen within this window keep the assistant quiet
    pub staff_activity_window: Duration,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            timeout: Duration::from_secs(15),
            staff_activity_window: Duration::from_secs(300),
        }
    }
}

/// Structured answer handed back to the realtime layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantReply {
    pub message: String,
    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
    pub suggested_actions: Vec<SuggestedAction>,
}

impl AssistantReply {
    fn from_completion(client_message: &str, text: String) -> Self {
        let should_escalate = needs_escalation(client_message, &text);
        let suggested_actions = suggested_actions(&text, should_escalate);
        Self {
            message: text.trim().to_string(),
            should_escalate,
            escalation_reason: should_escalate.then(|| ESCALATION_REASON.to_string()),
            suggested_actions,
        }
    }

    pub fn fallback() -> Self {
        Self {
            message: FALLBACK_MESSAGE.to_string(),
            should_escalate: true,
            escalation_reason: Some(FALLBACK_REASON.to_string()),
            suggested_actions: vec![SuggestedAction::EscalateToHuman],
        }
    }
}

pub struct AssistantGate {
    presence: Arc<PresenceRegistry>,
    backend: Arc<dyn CompletionBackend>,
    settings: AssistantSettings,
}

impl AssistantGate {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        backend: Arc<dyn CompletionBackend>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            presence,
            backend,
            settings,
        }
    }

    /// Answer a client message, or `None` when a human is around.
    ///
    /// Issues at most one backend request per call.
    pub async fn get_response(&self, client_message: &str, context: &ClientContext) -> Option<AssistantReply> {
        let active_staff = self
            .presence
            .count_staff_active_since(self.settings.staff_activity_window)
            .await;
        if active_staff > 0 {
            tracing::debug!(active_staff, "Staff active, assistant stays quiet");
            return None;
        }

        let system_prompt = build_system_prompt(context);
        let messages = [PromptMessage::user(client_message)];

        let outcome = tokio::time::timeout(
            self.settings.timeout,
            self.backend
                .complete(&system_prompt, &messages, self.settings.max_tokens),
        )
        .await;

        let reply = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => AssistantReply::from_completion(client_message, text),
            Ok(Ok(_)) => {
                tracing::warn!("Assistant backend returned an empty reply");
                AssistantReply::fallback()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Assistant backend failed");
                AssistantReply::fallback()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Assistant backend timed out"
                );
                AssistantReply::fallback()
            }
        };

        tracing::info!(
            should_escalate = reply.should_escalate,
            actions = reply.suggested_actions.len(),
            "Assistant replied"
        );

        Some(reply)
    }
}

/// Prompt describing the hotel desk and what is known about the client
pub fn build_system_prompt(context: &ClientContext) -> String {
    let mut prompt = String::from(
        "You are the virtual front desk assistant of a hotel. No staff member is \
         available right now. Answer briefly and politely, only using the client \
         information below. Never promise refunds, discounts or cancellations; \
         tell the client a staff member will follow up instead.\n\n",
    );

    let _ = writeln!(prompt, "Client: {}", context.name);
    if let Some(code) = &context.client_code {
        let _ = writeln!(prompt, "Client code: {}", code);
    }

    if context.recent_invoices.is_empty() {
        prompt.push_str("Recent invoices: none\n");
    } else {
        prompt.push_str("Recent invoices:\n");
        for invoice in &context.recent_invoices {
            let due = invoice
                .due_at
                .map(|d| d.date().to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                prompt,
                "- {}: {:.2}, {}, due {}",
                invoice.number, invoice.total, invoice.status, due
            );
        }
    }

    if !context.last_conversation.is_empty() {
        prompt.push_str("Last conversation:\n");
        for line in &context.last_conversation {
            let line = truncate_preview(line, SNIPPET_LINE_CHARS);
            let _ = writeln!(prompt, "> {}", line);
        }
    }

    prompt
}
