use std::collections::HashMap;
use crate::models::chat::{ Conversation, Message, SummaryPatch };

/// Local conversation list for the current viewer, kept newest-first by `last_message_at`.
///
/// Every mutation re-sorts and recomputes the unread total, so readers never see a
/// stale order or count.
#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    items: Vec<Conversation>,
    unread_total: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, list: Vec<Conversation>) {
        self.items = dedup_by_id(list);
        self.settle();
    }

    /// Merges a polled list, keeping a local summary that is strictly newer than the
    /// remote one. The open conversation stays read.
    pub fn merge_remote(&mut self, list: Vec<Conversation>, active_id: Option<&str>) {
        let mut local: HashMap<String, Conversation> = self.items
            .drain(..)
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut merged = Vec::with_capacity(list.len());
        for mut remote in dedup_by_id(list) {
            if let Some(existing) = local.remove(&remote.id) {
                if existing.last_message_at > remote.last_message_at {
                    remote.last_message = existing.last_message;
                    remote.last_message_at = existing.last_message_at;
                    remote.unread_count = existing.unread_count;
                }
            }
            if active_id == Some(remote.id.as_str()) {
                remote.unread_count = 0;
            }
            merged.push(remote);
        }

        self.items = merged;
        self.settle();
    }

    /// Returns false when no conversation has that id; nothing is created.
    pub fn upsert_summary(&mut self, conversation_id: &str, patch: SummaryPatch) -> bool {
        let Some(conv) = self.items.iter_mut().find(|c| c.id == conversation_id) else {
            return false;
        };
        if let Some(message) = patch.last_message {
            conv.last_message = Some(message);
        }
        if let Some(at) = patch.last_message_at {
            conv.last_message_at = at;
        }
        if let Some(unread) = patch.unread_count {
            conv.unread_count = unread;
        }
        self.settle();
        true
    }

    /// Swaps the preview to `replacement` if `message_id` is the current preview.
    /// `last_message_at` is left alone, so the list order does not change.
    pub fn retract_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        replacement: Option<Message>
    ) -> bool {
        let Some(conv) = self.items.iter_mut().find(|c| c.id == conversation_id) else {
            return false;
        };
        if conv.last_message.as_ref().map(|m| m.id.as_str()) != Some(message_id) {
            return false;
        }
        conv.last_message = replacement;
        true
    }

    pub fn insert_if_absent(&mut self, conversation: Conversation) -> bool {
        if self.contains(&conversation.id) {
            return false;
        }
        self.items.push(conversation);
        self.settle();
        true
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == conversation_id)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.get(conversation_id).is_some()
    }

    pub fn find_by_participants(&self, org_id: &str, seeker_id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.involves(org_id, seeker_id))
    }

    pub fn unread_total(&self) -> u64 {
        self.unread_total
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.items.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn settle(&mut self) {
        // stable: equal timestamps keep their relative order
        self.items.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        self.unread_total = self.items
            .iter()
            .map(|c| c.unread_count as u64)
            .sum();
    }
}

fn dedup_by_id(list: Vec<Conversation>) -> Vec<Conversation> {
    let mut seen = std::collections::HashSet::new();
    list.into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ DateTime, Utc };

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    fn conv(id: &str, last: &str, unread: u32) -> Conversation {
        Conversation {
            id: id.into(),
            org_id: format!("org-{}", id),
            seeker_id: "s1".into(),
            job_id: None,
            last_message: None,
            last_message_at: at(last),
            unread_count: unread,
        }
    }

    fn msg(id: &str, conversation_id: &str, created: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: "s1".into(),
            content: "hi".into(),
            created_at: at(created),
            read_at: None,
            attachment_url: None,
            attachment_name: None,
            attachment_size: None,
        }
    }

    fn ids(store: &ConversationStore) -> Vec<String> {
        store
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    #[test]
    fn replace_sorts_newest_first_and_totals_unread() {
        let mut store = ConversationStore::new();
        store.replace(
            vec![
                conv("a", "2024-01-01T10:00:00Z", 1),
                conv("b", "2024-01-03T10:00:00Z", 2),
                conv("c", "2024-01-02T10:00:00Z", 0)
            ]
        );
        assert_eq!(ids(&store), vec!["b", "c", "a"]);
        assert_eq!(store.unread_total(), 3);
    }

    #[test]
    fn upsert_summary_moves_conversation_to_top() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 3), conv("b", "2024-01-02T10:00:00Z", 1)]);

        let message = msg("m1", "a", "2024-01-05T10:00:00Z");
        assert!(store.upsert_summary("a", SummaryPatch::read_message(&message)));

        assert_eq!(ids(&store), vec!["a", "b"]);
        let a = store.get("a").unwrap();
        assert_eq!(a.unread_count, 0);
        assert_eq!(a.last_message.as_ref().unwrap().id, "m1");
        assert_eq!(a.org_id, "org-a");
        assert_eq!(store.unread_total(), 1);
    }

    #[test]
    fn upsert_summary_ignores_unknown_ids() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 0)]);
        let message = msg("m1", "zzz", "2024-01-05T10:00:00Z");
        assert!(!store.upsert_summary("zzz", SummaryPatch::read_message(&message)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn partial_patch_leaves_other_fields() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 4)]);
        store.upsert_summary("a", SummaryPatch { unread_count: Some(0), ..Default::default() });
        let a = store.get("a").unwrap();
        assert_eq!(a.unread_count, 0);
        assert_eq!(a.last_message_at, at("2024-01-01T10:00:00Z"));
    }

    #[test]
    fn insert_if_absent_does_not_duplicate() {
        let mut store = ConversationStore::new();
        assert!(store.insert_if_absent(conv("a", "2024-01-01T10:00:00Z", 0)));
        assert!(!store.insert_if_absent(conv("a", "2024-02-01T10:00:00Z", 9)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().unread_count, 0);
    }

    #[test]
    fn retract_message_swaps_preview_without_reordering() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 0), conv("b", "2024-01-02T10:00:00Z", 0)]);
        let older = msg("m1", "a", "2024-01-04T10:00:00Z");
        let newest = msg("m2", "a", "2024-01-05T10:00:00Z");
        store.upsert_summary("a", SummaryPatch::read_message(&newest));

        assert!(!store.retract_message("a", "m1", None));
        assert!(store.retract_message("a", "m2", Some(older)));

        let a = store.get("a").unwrap();
        assert_eq!(a.last_message.as_ref().map(|m| m.id.as_str()), Some("m1"));
        assert_eq!(a.last_message_at, at("2024-01-05T10:00:00Z"));
        assert_eq!(ids(&store), vec!["a", "b"]);

        assert!(store.retract_message("a", "m1", None));
        assert!(store.get("a").unwrap().last_message.is_none());
    }

    #[test]
    fn merge_remote_keeps_locally_newer_summary() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 0), conv("b", "2024-01-01T09:00:00Z", 0)]);
        let pushed = msg("m7", "a", "2024-01-04T10:00:00Z");
        store.upsert_summary("a", SummaryPatch::read_message(&pushed));

        // poll reflects server state from before the push
        store.merge_remote(
            vec![conv("a", "2024-01-02T10:00:00Z", 5), conv("b", "2024-01-03T10:00:00Z", 2)],
            None
        );

        let a = store.get("a").unwrap();
        assert_eq!(a.last_message.as_ref().unwrap().id, "m7");
        assert_eq!(a.unread_count, 0);
        let b = store.get("b").unwrap();
        assert_eq!(b.unread_count, 2);
        assert_eq!(ids(&store), vec!["a", "b"]);
    }

    #[test]
    fn merge_remote_drops_vanished_and_keeps_active_read() {
        let mut store = ConversationStore::new();
        store.replace(vec![conv("a", "2024-01-01T10:00:00Z", 0), conv("gone", "2024-01-01T10:00:00Z", 1)]);
        store.merge_remote(vec![conv("a", "2024-01-02T10:00:00Z", 3)], Some("a"));

        assert_eq!(ids(&store), vec!["a"]);
        assert_eq!(store.get("a").unwrap().unread_count, 0);
        assert_eq!(store.unread_total(), 0);
    }

    #[test]
    fn finds_by_participants_ignoring_job() {
        let mut store = ConversationStore::new();
        let mut c = conv("a", "2024-01-01T10:00:00Z", 0);
        c.job_id = Some("job-1".into());
        store.replace(vec![c]);
        assert_eq!(store.find_by_participants("org-a", "s1").unwrap().id, "a");
        assert!(store.find_by_participants("org-a", "s2").is_none());
    }
}
