//! Thread classification — who are we writing to, and why.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::InputError;
use crate::message::{RawMessage, display_name, parse_mailbox};

/// Template fields every drafting prompt asks the model to fill.
pub const FIELD_RECIPIENT_NAME: &str = "recipient_name";
pub const FIELD_SENDER_NAME: &str = "sender_name";

/// What kind of draft the thread calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    /// Someone answered a message we sent; reply to them.
    Reply,
    /// Nudge or first response on a thread.
    FollowUp,
}

impl ThreadRole {
    pub fn label(&self) -> &'static str {
        match self {
            ThreadRole::Reply => "reply",
            ThreadRole::FollowUp => "follow_up",
        }
    }
}

/// Derived once per thread, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub role: ThreadRole,
    /// The latest message in the thread was written by us.
    pub already_replied: bool,
    /// First message of the thread.
    pub original_message: Option<RawMessage>,
    /// Everything after the first message, oldest first.
    pub prior_replies: Vec<RawMessage>,
    /// Who the draft should greet.
    pub recipient_name: String,
}

impl ThreadContext {
    /// Template fields the validator must find filled in the draft.
    pub fn required_fills(&self) -> BTreeSet<String> {
        [FIELD_RECIPIENT_NAME, FIELD_SENDER_NAME]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// The most recent message of the thread.
    pub fn latest(&self) -> Option<&RawMessage> {
        self.prior_replies.last().or(self.original_message.as_ref())
    }
}

/// Does this From header belong to `identity`?
///
/// Case-insensitive match on the whole header, its display name, or its
/// address.
pub fn is_self(sender: &str, identity: &str) -> bool {
    let identity = identity.trim();
    if identity.is_empty() {
        return false;
    }
    if sender.trim().eq_ignore_ascii_case(identity) {
        return true;
    }
    let (name, address) = parse_mailbox(sender);
    name.is_some_and(|n| n.eq_ignore_ascii_case(identity))
        || address.is_some_and(|a| a.eq_ignore_ascii_case(identity))
}

/// Classify a thread relative to the authenticated user.
pub fn classify(thread: &[RawMessage], self_identity: &str) -> Result<ThreadContext, InputError> {
    if self_identity.trim().is_empty() {
        return Err(InputError::MissingIdentity);
    }
    let (first, rest) = thread.split_first().ok_or(InputError::EmptyThread)?;
    let (latest, earlier) = thread.split_last().ok_or(InputError::EmptyThread)?;

    let latest_is_self = is_self(&latest.sender, self_identity);
    let self_wrote_earlier = earlier.iter().any(|m| is_self(&m.sender, self_identity));

    let role = if !latest_is_self && self_wrote_earlier {
        ThreadRole::Reply
    } else {
        ThreadRole::FollowUp
    };

    let recipient_name = match role {
        ThreadRole::Reply => display_name(&latest.sender).to_string(),
        ThreadRole::FollowUp if is_self(&first.sender, self_identity) => first
            .recipients
            .first()
            .map(|r| display_name(r).to_string())
            .unwrap_or_default(),
        ThreadRole::FollowUp => display_name(&first.sender).to_string(),
    };

    Ok(ThreadContext {
        role,
        already_replied: latest_is_self,
        original_message: Some(first.clone()),
        prior_replies: rest.to_vec(),
        recipient_name,
    })
}
