// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bounded message history owned by the relay actor.

use std::collections::VecDeque;

use crate::protocol::ChatMessage;

/// Default number of retained messages.
pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity ring buffer; the oldest message is evicted first.
#[derive(Debug)]
pub struct MessageHistory {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        MessageHistory {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a message, evicting the oldest entries past capacity.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// All retained messages oldest first, or only those sent or received
    /// by `address` (compared case-insensitively).
    pub fn list(&self, address: Option<&str>) -> Vec<ChatMessage> {
        match address {
            Some(address) => {
                let address = address.to_lowercase();
                self.messages
                    .iter()
                    .filter(|m| m.involves(&address))
                    .cloned()
                    .collect()
            }
            None => self.messages.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, to: &str, n: u64) -> ChatMessage {
        ChatMessage {
            from: from.to_string(),
            to: to.to_string(),
            content: format!("m{n}"),
            timestamp: n,
            signature: String::new(),
        }
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut history = MessageHistory::new(100);
        for n in 0..105 {
            history.push(msg("a", "", n));
            assert!(history.len() <= 100);
        }

        let all = history.list(None);
        assert_eq!(all.len(), 100);
        // The oldest 5 are gone
        assert_eq!(all[0].timestamp, 5);
        assert_eq!(all[99].timestamp, 104);
        assert!(all.iter().all(|m| m.timestamp >= 5));
    }

    #[test]
    fn test_filter_by_address() {
        let mut history = MessageHistory::default();
        history.push(msg("a", "b", 1));
        history.push(msg("b", "c", 2));
        history.push(msg("c", "", 3));
        history.push(msg("d", "a", 4));

        let for_a: Vec<u64> = history.list(Some("A")).iter().map(|m| m.timestamp).collect();
        assert_eq!(for_a, vec![1, 4]);

        let for_c: Vec<u64> = history.list(Some("c")).iter().map(|m| m.timestamp).collect();
        assert_eq!(for_c, vec![2, 3]);

        assert!(history.list(Some("zz")).is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = MessageHistory::new(0);
        history.push(msg("a", "", 1));
        assert!(history.is_empty());
    }
}
