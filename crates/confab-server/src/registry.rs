use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use confab_protocol::CommandError;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::client::ClientSender;

/// History cap per conversation; oldest entries are evicted first.
pub const MAX_MESSAGES: usize = 10;

/// A display name's binding to a connection within one conversation.
pub struct Member {
    pub channel: ClientSender,
}

struct ConversationInner {
    members: HashMap<String, Member>,
    history: VecDeque<String>,
}

/// A named group of members sharing a bounded message history.
///
/// All access goes through [`Conversation::lock`]. Handlers hold the
/// guard across both the mutation and the resulting fan-out, so
/// concurrent join/send/remove from different connections observe each
/// operation's state change and its events as one indivisible unit.
pub struct Conversation {
    id: String,
    inner: Mutex<ConversationInner>,
}

impl Conversation {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(ConversationInner {
                members: HashMap::new(),
                history: VecDeque::with_capacity(MAX_MESSAGES),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the conversation lock for one operation.
    pub fn lock(&self) -> ConversationGuard<'_> {
        ConversationGuard {
            inner: self.inner.lock(),
        }
    }

    pub fn contains_member(&self, name: &str) -> bool {
        self.lock().contains_member(name)
    }

    pub fn member_count(&self) -> usize {
        self.lock().member_count()
    }
}

/// Exclusive access to one conversation's members and history.
pub struct ConversationGuard<'a> {
    inner: MutexGuard<'a, ConversationInner>,
}

impl ConversationGuard<'_> {
    /// Register a member under `name`. On success returns the channels
    /// of the members present before the join, for presence events.
    pub fn try_join(
        &mut self,
        name: &str,
        channel: ClientSender,
    ) -> Result<Vec<ClientSender>, CommandError> {
        if self.inner.members.contains_key(name) {
            return Err(CommandError::NameTaken);
        }
        let existing = self
            .inner
            .members
            .values()
            .map(|m| m.channel.clone())
            .collect();
        self.inner
            .members
            .insert(name.to_string(), Member { channel });
        Ok(existing)
    }

    /// Append an already-encoded message, evicting the oldest entry
    /// when the cap is exceeded. Returns every member's channel,
    /// including the sender's.
    pub fn append_message(&mut self, encoded: String) -> Vec<ClientSender> {
        self.inner.history.push_back(encoded);
        if self.inner.history.len() > MAX_MESSAGES {
            self.inner.history.pop_front();
        }
        self.inner
            .members
            .values()
            .map(|m| m.channel.clone())
            .collect()
    }

    /// Stored history entries joined by commas, oldest first.
    pub fn history_joined(&self) -> String {
        self.inner
            .history
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Remove a member by name. Returns the channels of the remaining
    /// members, or `None` if the name was not a member.
    pub fn remove_member(&mut self, name: &str) -> Option<Vec<ClientSender>> {
        self.inner.members.remove(name)?;
        Some(
            self.inner
                .members
                .values()
                .map(|m| m.channel.clone())
                .collect(),
        )
    }

    pub fn contains_member(&self, name: &str) -> bool {
        self.inner.members.contains_key(name)
    }

    pub fn member_count(&self) -> usize {
        self.inner.members.len()
    }
}

/// Process-wide mapping from conversation id to conversation, created
/// lazily. Creation is atomic per id: two connections joining the same
/// unseen id always observe the same instance.
pub struct ConversationRegistry {
    conversations: DashMap<String, Arc<Conversation>>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Conversation> {
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Conversation::new(id)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_protocol::{EventName, ServerMessage};

    fn channel() -> ClientSender {
        ClientSender::pair(32).0
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let registry = ConversationRegistry::new();
        let a = registry.get_or_create("room1");
        let b = registry.get_or_create("room1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.id(), "room1");
    }

    #[test]
    fn join_rejects_duplicate_name() {
        let conv = Conversation::new("room1");
        conv.lock().try_join("Alice", channel()).unwrap();

        let err = conv.lock().try_join("Alice", channel()).unwrap_err();
        assert_eq!(err, CommandError::NameTaken);
        assert_eq!(conv.member_count(), 1);
    }

    #[test]
    fn join_returns_existing_members_channels() {
        let conv = Conversation::new("room1");
        assert!(conv.lock().try_join("Alice", channel()).unwrap().is_empty());
        assert_eq!(conv.lock().try_join("Bob", channel()).unwrap().len(), 1);
        assert_eq!(conv.lock().try_join("Carol", channel()).unwrap().len(), 2);
    }

    #[test]
    fn history_caps_at_ten_fifo() {
        let conv = Conversation::new("room1");
        for i in 1..=11 {
            conv.lock().append_message(format!("msg{i}"));
        }

        let joined = conv.lock().history_joined();
        let entries: Vec<&str> = joined.split(',').collect();
        assert_eq!(entries.len(), MAX_MESSAGES);
        assert_eq!(entries[0], "msg2");
        assert_eq!(entries[9], "msg11");
    }

    #[test]
    fn history_preserves_send_order() {
        let conv = Conversation::new("room1");
        conv.lock().append_message("first".into());
        conv.lock().append_message("second".into());
        assert_eq!(conv.lock().history_joined(), "first,second");
    }

    #[test]
    fn empty_history_joins_to_empty_string() {
        let conv = Conversation::new("room1");
        assert_eq!(conv.lock().history_joined(), "");
    }

    #[test]
    fn remove_member_returns_remaining() {
        let conv = Conversation::new("room1");
        conv.lock().try_join("Alice", channel()).unwrap();
        conv.lock().try_join("Bob", channel()).unwrap();

        let remaining = conv.lock().remove_member("Alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!conv.contains_member("Alice"));
        assert!(conv.contains_member("Bob"));
    }

    #[test]
    fn remove_unknown_member_is_none() {
        let conv = Conversation::new("room1");
        conv.lock().try_join("Alice", channel()).unwrap();
        assert!(conv.lock().remove_member("Bob").is_none());
        assert_eq!(conv.member_count(), 1);
    }

    #[test]
    fn append_message_returns_all_member_channels() {
        let conv = Conversation::new("room1");
        conv.lock().try_join("Alice", channel()).unwrap();
        conv.lock().try_join("Bob", channel()).unwrap();
        assert_eq!(conv.lock().append_message("hi".into()).len(), 2);
    }

    #[test]
    fn concurrent_send_cannot_interleave_with_join_fanout() {
        // A send racing a join must wait for the join's fan-out: the
        // guard stays held from mutation through event emission, so an
        // observer never sees the operations' effects interleaved.
        let conv = Arc::new(Conversation::new("room1"));
        let (carol, mut carol_rx) = ClientSender::pair(32);
        conv.lock().try_join("Carol", carol).unwrap();

        let mut room = conv.lock();
        let existing = room.try_join("Alice", channel()).unwrap();

        let sender_conv = Arc::clone(&conv);
        let sender = std::thread::spawn(move || {
            // Blocks until the join below releases the guard.
            let mut room = sender_conv.lock();
            let members = room.append_message("Bob%3A%20hi".into());
            for member in &members {
                member.send(&ServerMessage::event(EventName::NewMessage, "Bob%3A%20hi"));
            }
        });

        for member in &existing {
            member.send(&ServerMessage::event(EventName::MemberJoined, "Alice"));
        }
        drop(room);
        sender.join().unwrap();

        let first: serde_json::Value =
            serde_json::from_str(&carol_rx.try_recv().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&carol_rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["name"], "member-joined");
        assert_eq!(second["name"], "new-message");
    }
}
