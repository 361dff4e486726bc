use std::collections::HashSet;
use crate::models::chat::Message;

/// Ordered messages of the active conversation.
///
/// Ascending by `created_at`; ids are unique. Messages with equal timestamps keep
/// arrival order.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    conversation_id: Option<String>,
    items: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Empties the store and scopes it to `conversation_id`.
    pub fn reset(&mut self, conversation_id: Option<&str>) {
        self.conversation_id = conversation_id.map(str::to_string);
        self.items.clear();
    }

    pub fn clear(&mut self) {
        self.reset(None);
    }

    /// Replaces the contents with fetched history. Messages already delivered for this
    /// conversation that the history does not contain yet are kept.
    pub fn load(&mut self, history: Vec<Message>) {
        let mut seen = HashSet::new();
        let mut merged: Vec<Message> = history
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();

        let scope = self.conversation_id.clone();
        merged.extend(
            self.items
                .drain(..)
                .filter(|m| scope.as_deref().map_or(true, |id| m.conversation_id == id))
                .filter(|m| seen.insert(m.id.clone()))
        );
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.items = merged;
    }

    /// Returns false when a message with the same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let idx = self.items.partition_point(|m| m.created_at <= message.created_at);
        self.items.insert(idx, message);
        true
    }

    pub fn remove(&mut self, message_id: &str) -> Option<Message> {
        let idx = self.items.iter().position(|m| m.id == message_id)?;
        Some(self.items.remove(idx))
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.items.iter().find(|m| m.id == message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.get(message_id).is_some()
    }

    pub fn last(&self) -> Option<&Message> {
        self.items.last()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ DateTime, Utc };

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    fn msg(id: &str, created: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "s1".into(),
            content: format!("body of {}", id),
            created_at: at(created),
            read_at: None,
            attachment_url: None,
            attachment_name: None,
            attachment_size: None,
        }
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store
            .snapshot()
            .into_iter()
            .map(|m| m.id)
            .collect()
    }

    #[test]
    fn append_deduplicates_by_id() {
        let mut store = MessageStore::new();
        store.reset(Some("c1"));
        assert!(store.append(msg("m1", "2024-01-01T10:00:00Z")));
        assert!(!store.append(msg("m1", "2024-01-01T10:00:00Z")));
        assert!(!store.append(msg("m1", "2024-01-01T11:00:00Z")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_places_late_arrivals_by_timestamp() {
        let mut store = MessageStore::new();
        store.reset(Some("c1"));
        store.append(msg("m1", "2024-01-01T10:00:00Z"));
        store.append(msg("m3", "2024-01-01T10:02:00Z"));
        store.append(msg("m2", "2024-01-01T10:01:00Z"));
        store.append(msg("m4", "2024-01-01T10:02:00Z"));
        assert_eq!(ids(&store), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn load_keeps_deliveries_missing_from_history() {
        let mut store = MessageStore::new();
        store.reset(Some("c1"));
        store.append(msg("m3", "2024-01-01T10:03:00Z"));
        store.append(msg("m2", "2024-01-01T10:02:00Z"));

        store.load(vec![msg("m1", "2024-01-01T10:01:00Z"), msg("m2", "2024-01-01T10:02:00Z")]);
        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn remove_and_reset() {
        let mut store = MessageStore::new();
        store.reset(Some("c1"));
        store.load(vec![msg("m1", "2024-01-01T10:01:00Z"), msg("m2", "2024-01-01T10:02:00Z")]);

        assert_eq!(store.remove("m1").unwrap().id, "m1");
        assert!(store.remove("m1").is_none());
        assert_eq!(store.last().unwrap().id, "m2");

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.conversation_id(), None);
    }
}
