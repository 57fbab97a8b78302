//! Per-room message reconciliation.
//!
//! The same logical message can arrive up to three times with three
//! different identifier representations: the sender's optimistic local
//! append (provisional id), the durable store's response, and the push echo.
//! Merging must converge to exactly one entry regardless of arrival order,
//! and a provisional entry superseded by its durable twin must never
//! reappear.

use shared::{domain::RoomId, protocol::ChatMessage};

/// Clock-skew allowance when matching a candidate against an existing entry
/// whose id differs but whose sender and content agree.
const NEAR_MATCH_WINDOW_SECS: i64 = 15;

/// The authoritative ordered collection for one room. Exclusively owned by
/// the client; push handlers and the poller only feed candidates in through
/// [`MessageLog::merge`].
pub struct MessageLog {
    room_id: RoomId,
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            entries: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Always ascending in parsed `sent_at`.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge one candidate into the collection. Returns true when the
    /// collection changed. Idempotent, and safe to call back-to-back from
    /// interleaved push and poll handlers.
    pub fn merge(&mut self, candidate: ChatMessage) -> bool {
        if candidate.room_id != self.room_id {
            return false;
        }

        // Already present under the same identifier.
        if !candidate.id.is_empty() && self.entries.iter().any(|m| m.id == candidate.id) {
            return false;
        }

        let matched = self
            .find_signature_match(&candidate)
            .or_else(|| self.find_near_match(&candidate));

        let replace_at = match matched {
            Some(index) => {
                if self.entries[index].id.is_provisional() && !candidate.id.is_provisional() {
                    Some(index)
                } else {
                    // Already represented, and the candidate's identity is
                    // no better than what we hold.
                    return false;
                }
            }
            None => None,
        };

        match replace_at {
            Some(index) => self.entries[index] = candidate,
            None => self.entries.push(candidate),
        }
        self.entries.sort_by_key(ChatMessage::sent_at_utc);
        true
    }

    pub fn merge_all<I: IntoIterator<Item = ChatMessage>>(&mut self, candidates: I) -> bool {
        let mut changed = false;
        for candidate in candidates {
            changed |= self.merge(candidate);
        }
        changed
    }

    fn find_signature_match(&self, candidate: &ChatMessage) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| same_signature(entry, candidate))
    }

    fn find_near_match(&self, candidate: &ChatMessage) -> Option<usize> {
        let sent_at = candidate.sent_at_utc();
        let content = candidate.content.trim();
        self.entries.iter().position(|entry| {
            entry.sender_id == candidate.sender_id
                && entry.content.trim() == content
                && (entry.sent_at_utc() - sent_at).num_seconds().abs() <= NEAR_MATCH_WINDOW_SECS
        })
    }
}

/// Duplicate-detection signature: sender, trimmed content, second-truncated
/// send time. The room is implied by the log.
fn same_signature(a: &ChatMessage, b: &ChatMessage) -> bool {
    a.sender_id == b.sender_id
        && a.content.trim() == b.content.trim()
        && a.sent_at_utc().timestamp() == b.sent_at_utc().timestamp()
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
