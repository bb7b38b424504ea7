//! Collapses candidates from all collectors into the rendered feed.
//!
//! After every merge the output holds at most one candidate per
//! [`DedupKey`], never a `follow_request` next to a `follow` from the same
//! actor, nothing whose key is dismissed, and is ordered newest first.

use crate::canonical::DedupKey;
use crate::models::{NotificationCandidate, NotificationType};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct MergeInput {
    pub structured: Vec<NotificationCandidate>,
    pub legacy_likes: Vec<NotificationCandidate>,
    pub legacy_follows: Vec<NotificationCandidate>,
}

pub fn merge_candidates(input: MergeInput, dismissed: &HashSet<String>) -> Vec<NotificationCandidate> {
    let mut working: HashMap<DedupKey, NotificationCandidate> = HashMap::new();

    // Structured rows seed the map so equal-timestamp legacy copies lose.
    for candidate in input
        .structured
        .into_iter()
        .chain(input.legacy_likes)
        .chain(input.legacy_follows)
    {
        keep_newest(&mut working, candidate);
    }

    apply_follow_precedence(&mut working);
    working.retain(|key, _| !dismissed.contains(key.as_str()));

    let mut ordered = working.into_iter().collect::<Vec<_>>();
    ordered.sort_by(|(left_key, left), (right_key, right)| feed_order(left_key, left, right_key, right));
    ordered.into_iter().map(|(_, candidate)| candidate).collect()
}

fn keep_newest(working: &mut HashMap<DedupKey, NotificationCandidate>, candidate: NotificationCandidate) {
    match working.entry(candidate.dedup_key()) {
        Entry::Vacant(slot) => {
            slot.insert(candidate);
        }
        Entry::Occupied(mut slot) => {
            if candidate.created_at > slot.get().created_at {
                slot.insert(candidate);
            }
        }
    }
}

/// Drops every `follow_request` whose actor also has a `follow`. Other
/// notification types from that actor are untouched.
fn apply_follow_precedence(working: &mut HashMap<DedupKey, NotificationCandidate>) {
    let followers = working
        .values()
        .filter(|candidate| candidate.notification_type == NotificationType::Follow)
        .map(|candidate| candidate.actor.id.clone())
        .collect::<HashSet<_>>();

    if followers.is_empty() {
        return;
    }

    working.retain(|_, candidate| {
        candidate.notification_type != NotificationType::FollowRequest || !followers.contains(&candidate.actor.id)
    });
}

fn feed_order(
    left_key: &DedupKey,
    left: &NotificationCandidate,
    right_key: &DedupKey,
    right: &NotificationCandidate,
) -> Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| left.origin().rank().cmp(&right.origin().rank()))
        .then_with(|| left_key.cmp(right_key))
}
