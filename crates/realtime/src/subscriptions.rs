//! Subscription registry

use serde::Serialize;
use std::collections::BTreeSet;
use testpilot_common::Topic;

/// Ids the server should keep pushing events for, per topic
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    executions: BTreeSet<String>,
    browser_sessions: BTreeSet<String>,
    recordings: BTreeSet<String>,
    playbacks: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, topic: Topic) -> &BTreeSet<String> {
        match topic {
            Topic::Execution => &self.executions,
            Topic::BrowserSession => &self.browser_sessions,
            Topic::Recording => &self.recordings,
            Topic::Playback => &self.playbacks,
        }
    }

    fn set_mut(&mut self, topic: Topic) -> &mut BTreeSet<String> {
        match topic {
            Topic::Execution => &mut self.executions,
            Topic::BrowserSession => &mut self.browser_sessions,
            Topic::Recording => &mut self.recordings,
            Topic::Playback => &mut self.playbacks,
        }
    }

    /// Returns false when the id was already present
    pub fn insert(&mut self, topic: Topic, id: &str) -> bool {
        self.set_mut(topic).insert(id.to_string())
    }

    pub fn remove(&mut self, topic: Topic, id: &str) -> bool {
        self.set_mut(topic).remove(id)
    }

    pub fn contains(&self, topic: Topic, id: &str) -> bool {
        self.set(topic).contains(id)
    }

    pub fn len(&self) -> usize {
        Topic::ALL.iter().map(|t| self.set(*t).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for topic in Topic::ALL {
            self.set_mut(topic).clear();
        }
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let list = |topic: Topic| -> Vec<String> { self.set(topic).iter().cloned().collect() };
        SubscriptionSnapshot {
            executions: list(Topic::Execution),
            browser_sessions: list(Topic::BrowserSession),
            recordings: list(Topic::Recording),
            playbacks: list(Topic::Playback),
        }
    }
}

/// Point-in-time copy of the active subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    pub executions: Vec<String>,
    pub browser_sessions: Vec<String>,
    pub recordings: Vec<String>,
    pub playbacks: Vec<String>,
}

impl SubscriptionSnapshot {
    pub fn get(&self, topic: Topic) -> &[String] {
        match topic {
            Topic::Execution => &self.executions,
            Topic::BrowserSession => &self.browser_sessions,
            Topic::Recording => &self.recordings,
            Topic::Playback => &self.playbacks,
        }
    }

    pub fn is_empty(&self) -> bool {
        Topic::ALL.iter().all(|t| self.get(*t).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_independent() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.insert(Topic::Execution, "x"));
        assert!(!registry.insert(Topic::Execution, "x"));
        assert!(registry.insert(Topic::Recording, "x"));

        assert!(registry.contains(Topic::Execution, "x"));
        assert!(!registry.contains(Topic::Playback, "x"));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(Topic::Execution, "x"));
        assert!(registry.contains(Topic::Recording, "x"));
    }

    #[test]
    fn test_clear_and_snapshot() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(Topic::BrowserSession, "b");
        registry.insert(Topic::Playback, "p2");
        registry.insert(Topic::Playback, "p1");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.browser_sessions, vec!["b"]);
        assert_eq!(snapshot.get(Topic::Playback), ["p1", "p2"]);
        assert!(!snapshot.is_empty());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
