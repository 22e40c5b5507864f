//! Detection of repeated and cyclic agent actions

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Number of recent action signatures kept
pub const HISTORY_CAPACITY: usize = 20;

/// Identical consecutive signatures needed to report a repeat
const REPEAT_THRESHOLD: usize = 3;

/// Longest cycle checked for
const MAX_CYCLE_LEN: usize = 3;

/// Injected as a user message when a loop is detected
pub const LOOP_BREAKER_PROMPT: &str = "You appear to be repeating the same actions without making progress. \
Stop and reconsider: review the tool results you already have, try a different approach, \
or explain what is blocking you and ask the user for guidance.";

/// A detected loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopKind {
    /// The same action several times in a row
    Repeated { signature: String },
    /// A sequence of actions repeating back to back
    Cycle { length: usize },
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::Repeated { signature } => write!(f, "repeated action: {}", signature),
            LoopKind::Cycle { length } => write!(f, "repeating cycle of {} actions", length),
        }
    }
}

/// Fingerprint a tool call: name plus its arguments as sorted `key=value` pairs
pub fn action_signature(name: &str, arguments: &serde_json::Value) -> String {
    let pairs = match arguments.as_object() {
        Some(map) => map
            .iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(","),
        None if arguments.is_null() => String::new(),
        None => arguments.to_string(),
    };
    format!("{}({})", name, pairs)
}

/// Sliding window over the most recent action signatures
#[derive(Debug, Default)]
pub struct LoopDetector {
    history: VecDeque<String>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
        }
    }

    /// Record an action, evicting the oldest once over capacity
    pub fn record(&mut self, signature: impl Into<String>) {
        self.history.push_back(signature.into());
        if self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Check the window for an exact repeat, then for short cycles
    pub fn check(&self) -> Option<LoopKind> {
        let len = self.history.len();

        if len >= REPEAT_THRESHOLD {
            let last = &self.history[len - 1];
            if self
                .history
                .range(len - REPEAT_THRESHOLD..)
                .all(|sig| sig == last)
            {
                return Some(LoopKind::Repeated {
                    signature: last.clone(),
                });
            }
        }

        let max_cycle = MAX_CYCLE_LEN.min(len / 2);
        for cycle_len in 2..=max_cycle {
            let start = len - 2 * cycle_len;
            let first = self.history.range(start..start + cycle_len);
            let second = self.history.range(start + cycle_len..);
            if first.eq(second) {
                return Some(LoopKind::Cycle { length: cycle_len });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_sorts_arguments() {
        let a = action_signature("read", &json!({"path": "a.rs", "limit": 10}));
        let b = action_signature("read", &json!({"limit": 10, "path": "a.rs"}));
        assert_eq!(a, b);
        assert_eq!(a, "read(limit=10,path=a.rs)");
        assert_ne!(a, action_signature("read", &json!({"path": "b.rs", "limit": 10})));
    }

    #[test]
    fn test_exact_repeat() {
        let mut detector = LoopDetector::new();
        let sig = action_signature("bash", &json!({"command": "cargo test"}));
        detector.record(sig.clone());
        detector.record(sig.clone());
        assert_eq!(detector.check(), None);
        detector.record(sig.clone());
        assert_eq!(detector.check(), Some(LoopKind::Repeated { signature: sig }));
    }

    #[test]
    fn test_cycle_of_two() {
        let mut detector = LoopDetector::new();
        for sig in ["A", "B", "A", "B", "A", "B"] {
            detector.record(sig);
        }
        assert_eq!(detector.check(), Some(LoopKind::Cycle { length: 2 }));
    }

    #[test]
    fn test_cycle_of_three() {
        let mut detector = LoopDetector::new();
        for sig in ["A", "B", "C", "A", "B", "C"] {
            detector.record(sig);
        }
        assert_eq!(detector.check(), Some(LoopKind::Cycle { length: 3 }));
    }

    #[test]
    fn test_no_loop_for_progress() {
        let mut detector = LoopDetector::new();
        for sig in ["A", "B", "C", "D", "A", "E"] {
            detector.record(sig);
        }
        assert_eq!(detector.check(), None);
    }

    #[test]
    fn test_short_history_is_not_a_cycle() {
        let mut detector = LoopDetector::new();
        detector.record("A");
        detector.record("B");
        detector.record("A");
        assert_eq!(detector.check(), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut detector = LoopDetector::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            detector.record(format!("sig-{}", i));
        }
        assert_eq!(detector.len(), HISTORY_CAPACITY);
        assert_eq!(detector.history.front().map(String::as_str), Some("sig-5"));
    }
}
