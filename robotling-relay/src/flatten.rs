//! Depth-first flattening of a snapshot into `(path, leaf)` pairs
//!
//! `{"a": {"b": 1, "c": 2}}` yields `[a, b] -> 1` then `[a, c] -> 2`.
//! Nested objects are descended into, every other value (scalar, list-literal
//! string, JSON array) is a leaf. Empty objects yield nothing.

use crate::snapshot::Snapshot;
use std::slice;

/// Ordered, non-empty key path to a leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath<'a> {
    segments: Vec<&'a str>,
}

impl<'a> TopicPath<'a> {
    pub fn segments(&self) -> &[&'a str] {
        &self.segments
    }

    /// Segments joined with `/`
    pub fn joined(&self) -> String {
        self.segments.join("/")
    }
}

/// Lazy iterator over the leaves of a snapshot
pub struct Fields<'a> {
    // one sibling iterator per open object, `prefix` holds the keys that led to each
    stack: Vec<slice::Iter<'a, (String, Snapshot)>>,
    prefix: Vec<&'a str>,
}

/// Flatten a snapshot. A snapshot whose root is not an object has no named leaves.
pub fn flatten(tree: &Snapshot) -> Fields<'_> {
    Fields {
        stack: vec![tree.entries().iter()],
        prefix: Vec::new(),
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = (TopicPath<'a>, &'a Snapshot);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let siblings = self.stack.last_mut()?;
            match siblings.next() {
                None => {
                    self.stack.pop();
                    self.prefix.pop();
                }
                Some((key, Snapshot::Object(children))) => {
                    self.prefix.push(key.as_str());
                    self.stack.push(children.iter());
                }
                Some((key, leaf)) => {
                    let mut segments = Vec::with_capacity(self.prefix.len() + 1);
                    segments.extend_from_slice(&self.prefix);
                    segments.push(key.as_str());
                    return Some((TopicPath { segments }, leaf));
                }
            }
        }
    }
}
