//! # Topic Tree
//!
//! Index of subscriptions keyed by topic segment. Each node holds the
//! subscriptions terminating at it, literal children, and one wildcard child
//! for empty segments.

use crate::subscriber::{Subscription, SubscriptionId};
use crate::topic::{sub_topic_prefixes, SEGMENT_SEPARATOR};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Node {
    subscriptions: Vec<Arc<Subscription>>,
    children: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.children.is_empty() && self.wildcard.is_none()
    }

    fn child_mut(&mut self, segment: &str) -> &mut Node {
        if segment.is_empty() {
            self.wildcard.get_or_insert_with(Box::default)
        } else {
            self.children.entry(segment.to_string()).or_default()
        }
    }

    fn collect(&self, segments: &[&str], matches: &mut Vec<Arc<Subscription>>) {
        matches.extend(self.subscriptions.iter().cloned());

        let Some((segment, rest)) = segments.split_first() else {
            return;
        };

        for prefix in sub_topic_prefixes(segment) {
            if let Some(child) = self.children.get(prefix) {
                child.collect(rest, matches);
            }
        }
        if let Some(wildcard) = &self.wildcard {
            wildcard.collect(rest, matches);
        }
    }

    /// Returns the removed subscription, pruning nodes left empty.
    fn remove(&mut self, segments: &[&str], id: SubscriptionId) -> Option<Arc<Subscription>> {
        let Some((segment, rest)) = segments.split_first() else {
            let index = self.subscriptions.iter().position(|sub| sub.id == id)?;
            return Some(self.subscriptions.remove(index));
        };

        if segment.is_empty() {
            let wildcard = self.wildcard.as_mut()?;
            let removed = wildcard.remove(rest, id);
            if wildcard.is_empty() {
                self.wildcard = None;
            }
            removed
        } else {
            let child = self.children.get_mut(*segment)?;
            let removed = child.remove(rest, id);
            if child.is_empty() {
                self.children.remove(*segment);
            }
            removed
        }
    }
}

/// Subscriptions indexed by topic.
#[derive(Debug, Default)]
pub struct TopicTree {
    root: Node,
    len: usize,
}

impl TopicTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, subscription: Arc<Subscription>) {
        let mut node = &mut self.root;
        for segment in subscription.topic.split(SEGMENT_SEPARATOR) {
            node = node.child_mut(segment);
        }
        node.subscriptions.push(subscription);
        self.len += 1;
    }

    /// Remove the subscription `id` registered under `topic`.
    pub fn remove(&mut self, topic: &str, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let segments: Vec<&str> = topic.split(SEGMENT_SEPARATOR).collect();
        let removed = self.root.remove(&segments, id)?;
        self.len -= 1;
        Some(removed)
    }

    /// Subscriptions matching a published topic, most specific first.
    ///
    /// Subscriptions of equal weight keep tree traversal order, which for
    /// one node is registration order.
    #[must_use]
    pub fn matching(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let segments: Vec<&str> = topic.split(SEGMENT_SEPARATOR).collect();
        let mut matches = Vec::new();
        self.root.collect(&segments, &mut matches);
        matches.sort_by(|a, b| b.weight.cmp(&a.weight));
        matches
    }
}
