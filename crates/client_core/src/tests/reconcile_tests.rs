use shared::domain::{MessageId, RoomId, UserId};
use shared::protocol::ChatMessage;

use super::*;

fn message(id: &str, sender: &str, content: &str, sent_at: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(id),
        room_id: RoomId::new("r1"),
        sender_id: UserId::new(sender),
        content: content.to_string(),
        sent_at: sent_at.to_string(),
        is_read: false,
        is_edited: false,
        message_type: "Text".to_string(),
        attachment_url: None,
        edited_at: None,
        sender_name: None,
        sender_avatar_url: None,
        is_mine: false,
    }
}

fn assert_sorted(log: &MessageLog) {
    let stamps: Vec<_> = log.messages().iter().map(ChatMessage::sent_at_utc).collect();
    for pair in stamps.windows(2) {
        assert!(pair[0] <= pair[1], "collection out of order: {stamps:?}");
    }
}

#[test]
fn exact_id_replay_is_idempotent() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    let m = message("m-1", "u1", "hi", "2024-01-01T00:00:00Z");
    assert!(log.merge(m.clone()));
    assert!(!log.merge(m));
    assert_eq!(log.len(), 1);
}

#[test]
fn durable_candidate_upgrades_provisional_entry_within_window() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("1699999999999", "u1", "hi", "2024-01-01T00:00:00Z"));
    assert!(log.merge(message("abc-123", "u1", "hi", "2024-01-01T00:00:01Z")));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-123");
}

#[test]
fn signature_match_upgrades_within_same_second() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("1699999999999", "u1", "hi", "2024-01-01T00:00:00.100Z"));
    assert!(log.merge(message("abc-123", "u1", "hi", "2024-01-01T00:00:00.900Z")));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-123");
    // The durable entry keeps its own timestamp, not the provisional one.
    assert_eq!(log.messages()[0].sent_at, "2024-01-01T00:00:00.900Z");
}

#[test]
fn provisional_replay_after_upgrade_is_dropped() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    let provisional = message("1699999999999", "u1", "hi", "2024-01-01T00:00:00Z");
    log.merge(provisional.clone());
    log.merge(message("abc-123", "u1", "hi", "2024-01-01T00:00:01Z"));
    // The superseded provisional id must never reappear as its own entry.
    assert!(!log.merge(provisional));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-123");
}

#[test]
fn provisional_candidate_never_downgrades_durable_entry() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("abc-123", "u1", "hi", "2024-01-01T00:00:00Z"));
    assert!(!log.merge(message("1699999999999", "u1", "hi", "2024-01-01T00:00:05Z")));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-123");
}

#[test]
fn identical_content_outside_window_stays_separate() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("abc-1", "u1", "hi", "2024-01-01T00:00:00Z"));
    assert!(log.merge(message("abc-2", "u1", "hi", "2024-01-01T00:00:20Z")));
    assert_eq!(log.len(), 2);
}

#[test]
fn duplicate_signature_with_distinct_durable_ids_is_dropped() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("abc-1", "u1", "hi", "2024-01-01T00:00:00Z"));
    // Same sender, content, and second: a retransmission under a different
    // identifier, not a new message.
    assert!(!log.merge(message("abc-2", "u1", "hi", "2024-01-01T00:00:00Z")));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-1");
}

#[test]
fn different_senders_never_collapse() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("abc-1", "u1", "hi", "2024-01-01T00:00:00Z"));
    assert!(log.merge(message("abc-2", "u2", "hi", "2024-01-01T00:00:00Z")));
    assert_eq!(log.len(), 2);
}

#[test]
fn whitespace_only_content_differences_still_match() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("1699999999999", "u1", "  hi  ", "2024-01-01T00:00:00Z"));
    assert!(log.merge(message("abc-123", "u1", "hi", "2024-01-01T00:00:00Z")));
    assert_eq!(log.len(), 1);
    assert_eq!(log.messages()[0].id.as_str(), "abc-123");
}

#[test]
fn collection_stays_sorted_after_every_merge() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    let out_of_order = [
        message("a", "u1", "third", "2024-01-01T00:00:30Z"),
        message("b", "u1", "first", "2024-01-01T00:00:00Z"),
        message("c", "u2", "fourth", "2024-01-01T00:01:00Z"),
        message("d", "u2", "second", "2024-01-01T00:00:16Z"),
    ];
    for candidate in out_of_order {
        log.merge(candidate);
        assert_sorted(&log);
    }
    let contents: Vec<_> = log.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["first", "second", "third", "fourth"]);
}

#[test]
fn unparsable_timestamp_sorts_to_head() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    log.merge(message("a", "u1", "dated", "2024-01-01T00:00:00Z"));
    assert!(log.merge(message("b", "u2", "undated", "not-a-timestamp")));
    assert_eq!(log.len(), 2);
    assert_eq!(log.messages()[0].id.as_str(), "b");
    assert_sorted(&log);
}

#[test]
fn cross_room_candidate_is_rejected() {
    let mut log = MessageLog::new(RoomId::new("r1"));
    let mut foreign = message("a", "u1", "hi", "2024-01-01T00:00:00Z");
    foreign.room_id = RoomId::new("r2");
    assert!(!log.merge(foreign));
    assert!(log.is_empty());
}

#[test]
fn merge_order_does_not_affect_convergence() {
    // The same three representations of one logical message, fed in every
    // order, must always converge on the durable entry alone.
    let provisional = message("1699999999999", "u1", "hello", "2024-01-01T00:00:00.200Z");
    let durable = message("abc-123", "u1", "hello", "2024-01-01T00:00:00.700Z");
    let echo = message("abc-123", "u1", "hello", "2024-01-01T00:00:00.700Z");

    let orders = [
        [&provisional, &durable, &echo],
        [&durable, &provisional, &echo],
        [&echo, &durable, &provisional],
    ];
    for order in orders {
        let mut log = MessageLog::new(RoomId::new("r1"));
        for candidate in order {
            log.merge((*candidate).clone());
        }
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].id.as_str(), "abc-123");
    }
}
