//! Escalation heuristics for assistant exchanges
//!
//! A fixed keyword list, deliberately coarse. Matching is case-insensitive
//! substring search, so "cancel" also catches "cancellation".

use serde::Serialize;

/// Terms that hand the exchange over to a human
pub const ESCALATION_TRIGGERS: &[&str] = &[
    "complaint",
    "refund",
    "cancel",
    "discount",
    "negotiat",
    "urgent",
    "manager",
    "serious problem",
];

pub const ESCALATION_REASON: &str = "client request requires human attention";

/// UI shortcut offered next to an assistant answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ShowInvoices,
    ShowProfile,
    EscalateToHuman,
}

/// Scan the inbound message and the generated reply for trigger terms
pub fn needs_escalation(client_message: &str, reply: &str) -> bool {
    let haystack = format!("{} {}", client_message, reply).to_lowercase();
    ESCALATION_TRIGGERS
        .iter()
        .any(|trigger| haystack.contains(trigger))
}

pub fn suggested_actions(reply: &str, escalate: bool) -> Vec<SuggestedAction> {
    let reply = reply.to_lowercase();
    let mut actions = Vec::new();
    if reply.contains("invoice") {
        actions.push(SuggestedAction::ShowInvoices);
    }
    if reply.contains("profile") || reply.contains("account") {
        actions.push(SuggestedAction::ShowProfile);
    }
    if escalate {
        actions.push(SuggestedAction::EscalateToHuman);
    }
    actions
}
