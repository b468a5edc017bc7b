use serde::{Deserialize, Serialize};

/// Role of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

/// Conversation state for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_identifier: String,
    /// Conversation id assigned by the reply backend; empty until the first reply.
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: String,
    pub room_id: String,
    pub room_name: String,
    system_prompt: Option<String>,
    messages: Vec<HistoryMessage>,
    user_message_count: u32,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        user_identifier: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Self {
        let mut session = Self {
            session_id: session_id.into(),
            user_identifier: user_identifier.into(),
            conversation_id: String::new(),
            user_id: String::new(),
            user_name: String::new(),
            room_id: String::new(),
            room_name: String::new(),
            system_prompt,
            messages: Vec::new(),
            user_message_count: 0,
        };
        session.reset();
        session
    }

    /// Drop history and conversation state, keeping identity and system prompt.
    pub fn reset(&mut self) {
        self.messages.clear();
        if let Some(prompt) = self.system_prompt.as_ref().filter(|p| !p.is_empty()) {
            self.messages.push(HistoryMessage {
                role: Role::System,
                content: prompt.clone(),
            });
        }
        self.conversation_id.clear();
        self.user_message_count = 0;
    }

    pub fn set_user_info(&mut self, user_id: impl Into<String>, user_name: impl Into<String>) {
        self.user_id = user_id.into();
        self.user_name = user_name.into();
    }

    pub fn set_room_info(&mut self, room_id: impl Into<String>, room_name: impl Into<String>) {
        self.room_id = room_id.into();
        self.room_name = room_name.into();
    }

    /// Count one user message against the current backend conversation.
    ///
    /// Once more than `max` messages have been sent the conversation id is
    /// cleared so the backend starts a fresh conversation. `max == 0` disables
    /// rotation.
    pub fn count_user_message(&mut self, max: u32) {
        if max == 0 {
            return;
        }
        self.user_message_count += 1;
        if self.user_message_count > max {
            self.conversation_id.clear();
            self.user_message_count = 1;
        }
    }

    #[must_use]
    pub fn user_message_count(&self) -> u32 {
        self.user_message_count
    }

    pub fn add_query(&mut self, query: impl Into<String>) {
        self.messages.push(HistoryMessage {
            role: Role::User,
            content: query.into(),
        });
    }

    /// Record a backend reply. Blank replies are ignored.
    pub fn add_reply(&mut self, reply: &str) {
        if reply.trim().is_empty() {
            return;
        }
        self.messages.push(HistoryMessage {
            role: Role::Assistant,
            content: reply.to_string(),
        });
    }

    /// Size of the history in characters.
    #[must_use]
    pub fn calc_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }

    /// Drop the oldest non-system entry while the history exceeds `max_tokens`.
    ///
    /// Returns the number of entries removed.
    pub fn discard_exceeding(&mut self, max_tokens: usize) -> usize {
        let mut removed = 0;
        while self.calc_tokens() > max_tokens {
            let Some(idx) = self.messages.iter().position(|m| m.role != Role::System) else {
                break;
            };
            // Always keep the newest entry so the current query survives.
            if idx + 1 == self.messages.len() {
                break;
            }
            self.messages.remove(idx);
            removed += 1;
        }
        removed
    }

    #[must_use]
    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_survives_reset() {
        let mut s = Session::new("s1", "alice", Some("be nice".into()));
        s.add_query("hi");
        s.conversation_id = "c-1".into();
        s.reset();
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].role, Role::System);
        assert!(s.conversation_id.is_empty());
    }

    #[test]
    fn blank_reply_ignored() {
        let mut s = Session::new("s1", "alice", None);
        s.add_reply("  \n");
        assert!(s.messages().is_empty());
        s.add_reply("hello");
        assert_eq!(s.messages().len(), 1);
    }

    #[test]
    fn conversation_rotates_after_max_messages() {
        let mut s = Session::new("s1", "alice", None);
        s.conversation_id = "c-1".into();
        for _ in 0..3 {
            s.count_user_message(3);
        }
        assert_eq!(s.conversation_id, "c-1");
        s.count_user_message(3);
        assert!(s.conversation_id.is_empty());
        assert_eq!(s.user_message_count(), 1);
    }

    #[test]
    fn rotation_disabled_with_zero() {
        let mut s = Session::new("s1", "alice", None);
        s.conversation_id = "c-1".into();
        for _ in 0..10 {
            s.count_user_message(0);
        }
        assert_eq!(s.conversation_id, "c-1");
    }

    #[test]
    fn discard_keeps_system_and_newest() {
        let mut s = Session::new("s1", "alice", Some("sys".into()));
        s.add_query("aaaaa");
        s.add_reply("bbbbb");
        s.add_query("ccccc");
        // sys(3) + 15 = 18 chars; budget 10 drops the two oldest turns.
        let removed = s.discard_exceeding(10);
        assert_eq!(removed, 2);
        let contents: Vec<&str> = s.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "ccccc"]);
    }
}
