//! Capability checks for conversations
//!
//! One function per action so role strings are compared in exactly one place.

use std::collections::HashSet;

use frontdesk_shared::{normalize_role, Conversation, Principal};

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    support_roles: HashSet<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(support_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            support_roles: support_roles
                .into_iter()
                .map(|role| {
                    let role: String = role.into();
                    normalize_role(&role)
                })
                .filter(|role| !role.is_empty())
                .collect(),
        }
    }

    pub fn support_roles(&self) -> &HashSet<String> {
        &self.support_roles
    }

    /// Staff whose role is in the support set
    pub fn is_support_staff(&self, principal: &Principal) -> bool {
        principal
            .role()
            .is_some_and(|role| self.support_roles.contains(&normalize_role(role)))
    }

    /// Clients see their own conversations, support staff see all of them
    pub fn can_access(&self, principal: &Principal, conversation: &Conversation) -> bool {
        match principal {
            Principal::Client { id, .. } => conversation.client_id == *id,
            Principal::Staff { .. } => self.is_support_staff(principal),
        }
    }

    /// Close and reopen are staff-only
    pub fn can_moderate(&self, principal: &Principal) -> bool {
        self.is_support_staff(principal)
    }

    pub fn can_open_conversation(&self, principal: &Principal) -> bool {
        matches!(principal, Principal::Client { .. })
    }

    /// Sending arbitrary notifications and reading global stats
    pub fn can_administer(&self, principal: &Principal) -> bool {
        self.is_support_staff(principal)
    }
}
