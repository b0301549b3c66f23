//! Per-connection `{thingID, name}` subscription matcher.
//!
//! Both slots accept `+` as a wildcard; an empty string is the same as `+`.
//! A notification for `{T, N}` is looked up in this order:
//!
//! 1. exact `T.N`
//! 2. thing wildcard `+.N`
//! 3. name wildcard `T.+`
//! 4. full wildcard `+.+`
//!
//! The first hit wins, so overlapping subscriptions still count as one
//! subscriber. Keys are stored as a two-level map rather than a joined
//! `"thing.name"` string so that IDs containing `.` cannot collide.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Wildcard matching any thing ID or name.
pub const WILDCARD: &str = "+";

fn normalize(slot: &str) -> &str {
    if slot.is_empty() { WILDCARD } else { slot }
}

/// Subscription set of one connection: pattern → correlation ID.
#[derive(Debug, Default)]
pub struct Subscriptions {
    /// thing pattern → name pattern → correlation ID
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl Subscriptions {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the subscription for `{thing_id, name}`.
    pub fn subscribe(&self, thing_id: &str, name: &str, correlation_id: &str) {
        let mut entries = self.entries.write();
        let _ = entries
            .entry(normalize(thing_id).to_string())
            .or_default()
            .insert(normalize(name).to_string(), correlation_id.to_string());
    }

    /// Remove the subscription for `{thing_id, name}`, if any.
    ///
    /// Only the exact (normalised) pattern is removed; narrower or wider
    /// subscriptions are untouched.
    pub fn unsubscribe(&self, thing_id: &str, name: &str) {
        let mut entries = self.entries.write();
        let thing = normalize(thing_id);
        if let Some(names) = entries.get_mut(thing) {
            let _ = names.remove(normalize(name));
            if names.is_empty() {
                let _ = entries.remove(thing);
            }
        }
    }

    /// Correlation ID of the first subscription matching `{thing_id, name}`.
    pub fn get_subscription(&self, thing_id: &str, name: &str) -> Option<String> {
        let thing = normalize(thing_id);
        let name = normalize(name);
        let entries = self.entries.read();
        let lookup = |t: &str, n: &str| entries.get(t).and_then(|names| names.get(n)).cloned();
        lookup(thing, name)
            .or_else(|| lookup(WILDCARD, name))
            .or_else(|| lookup(thing, WILDCARD))
            .or_else(|| lookup(WILDCARD, WILDCARD))
    }

    /// Whether any subscription matches `{thing_id, name}`.
    pub fn is_subscribed(&self, thing_id: &str, name: &str) -> bool {
        self.get_subscription(thing_id, name).is_some()
    }

    /// Number of patterns held.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    /// Whether no pattern is held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
