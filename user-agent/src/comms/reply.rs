//! Replies for messages whose sender blocks on a verdict.

use serde::Serialize;
use shared::constants::REPLY_SIZE;

use crate::comms::events::{AccessNotification, Event};

/// `FLT_TO_USER_REPLY`: a nonzero `block` denies the file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplyPayload {
    pub block: u32,
}

impl ReplyPayload {
    pub const SIZE: usize = REPLY_SIZE;

    pub const fn allow() -> Self {
        Self { block: 0 }
    }

    pub const fn deny() -> Self {
        Self { block: 1 }
    }

    pub fn is_deny(&self) -> bool {
        self.block != 0
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        self.block.to_ne_bytes()
    }
}

/// Decides the verdict for a file access notification.
pub trait ReplyPolicy: Send {
    fn decide(&self, notification: &AccessNotification) -> ReplyPayload;
}

/// Same verdict for every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPolicy {
    pub block: bool,
}

impl ReplyPolicy for StaticPolicy {
    fn decide(&self, _: &AccessNotification) -> ReplyPayload {
        if self.block { ReplyPayload::deny() } else { ReplyPayload::allow() }
    }
}

/// Build the reply owed for `event`, or `None` when its kind expects none.
pub fn build_reply(event: &Event, policy: &dyn ReplyPolicy) -> Option<ReplyPayload> {
    match event {
        Event::Access(notification) => Some(policy.decide(notification)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::{HandleEvent, HandleOperation, TextEvent};

    fn access(path: &str) -> Event {
        Event::Access(AccessNotification { path: path.into() })
    }

    #[test]
    fn default_policy_allows() {
        let reply = build_reply(&access(r"C:\secret.txt"), &StaticPolicy::default()).unwrap();
        assert_eq!(reply, ReplyPayload::allow());
        assert_eq!(reply.to_bytes(), [0, 0, 0, 0]);
    }

    #[test]
    fn reply_is_always_protocol_sized() {
        let long = "x".repeat(5000);
        for policy in [StaticPolicy { block: false }, StaticPolicy { block: true }] {
            for path in ["", r"C:\a", long.as_str()] {
                let reply = build_reply(&access(path), &policy).unwrap();
                assert_eq!(reply.to_bytes().len(), REPLY_SIZE);
                assert_eq!(reply.is_deny(), policy.block);
            }
        }
    }

    #[test]
    fn only_access_notifications_get_replies() {
        let policy = StaticPolicy::default();
        let text = Event::Text(TextEvent { message: "HelloWorld".into() });
        let handle = Event::Handle(HandleEvent {
            operation: HandleOperation::Create,
            pid: 1,
            caller_pid: 2,
        });
        assert_eq!(build_reply(&text, &policy), None);
        assert_eq!(build_reply(&handle, &policy), None);
    }

    #[test]
    fn reply_kinds_match_event_kinds() {
        assert!(access("x").kind().requires_reply());
        assert!(!Event::Text(TextEvent { message: String::new() }).kind().requires_reply());
    }
}
