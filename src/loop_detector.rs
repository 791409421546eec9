//! `[AMBIENT, supplement]` loop detection for repetitive tool-calling
//! patterns, wired as an opt-in safety net into the agent loop's
//! tool-execution step (`loop_.rs`).
//!
//! Loosely grounded in the teacher's `llm::loop_detector` (same two failure
//! modes worth catching — a call repeated verbatim, and an oscillating
//! A-B-A-B cycle — and the same three-strikes escalation idea), but the
//! internals are this crate's own: calls are tracked as cheap hash digests
//! rather than cloned `ToolCall` values, an exact-duplicate run is an O(1)
//! streak counter instead of a rescan of the whole window on every call, and
//! escalation is an arbitrary-length `Vec<LoopAction>` ramp instead of three
//! fixed `first`/`second`/`third` fields.

use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallSignature {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Warn,
    Terminate,
}

/// A call's identity for repetition purposes: its name plus a digest of its
/// canonicalized argument JSON. `serde_json::Value`'s object maps sort keys
/// by default, so two calls with the same arguments in different field
/// order still hash identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature(u64);

impl Signature {
    fn of(call: &ToolCallSignature) -> Self {
        let mut hasher = DefaultHasher::new();
        call.name.hash(&mut hasher);
        serde_json::to_string(&call.arguments).unwrap_or_default().hash(&mut hasher);
        Signature(hasher.finish())
    }
}

#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    pub max_exact_duplicates: usize,
    pub exact_window_size: usize,
    pub enable_pattern_detection: bool,
    pub min_pattern_length: usize,
    pub max_pattern_length: usize,
    pub pattern_window_size: usize,
    /// Action taken on the Nth detection in this session, indexed from the
    /// first (`escalation[0]`); a detection count beyond the ramp's length
    /// repeats the last entry. Defaults to `[Warn, Warn, Terminate]`,
    /// matching the teacher's fixed three-strikes policy but expressible at
    /// any length.
    pub escalation: Vec<LoopAction>,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            max_exact_duplicates: 3,
            exact_window_size: 10,
            enable_pattern_detection: true,
            min_pattern_length: 2,
            max_pattern_length: 3,
            pattern_window_size: 20,
            escalation: vec![LoopAction::Warn, LoopAction::Warn, LoopAction::Terminate],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopType {
    ExactDuplicate { name: String, count: usize },
    Pattern { names: Vec<String>, repetitions: usize },
}

#[derive(Debug, Clone)]
pub struct LoopDetection {
    pub detected: bool,
    pub loop_type: LoopType,
    pub confidence: f64,
    pub suggestion: String,
    pub action: LoopAction,
    pub detection_count: usize,
    pub warning_message: Option<String>,
}

struct Entry {
    name: String,
    signature: Signature,
}

pub struct LoopDetector {
    config: LoopDetectorConfig,
    history: VecDeque<Entry>,
    streak: usize,
    detection_count: usize,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::with_config(LoopDetectorConfig::default())
    }

    pub fn with_config(config: LoopDetectorConfig) -> Self {
        let capacity = config.exact_window_size.max(config.pattern_window_size);
        Self { config, history: VecDeque::with_capacity(capacity), streak: 0, detection_count: 0 }
    }

    /// Check for loops before executing a tool call. Returns `Some` if one
    /// is detected; the call is recorded into history either way.
    pub fn check(&mut self, call: &ToolCallSignature) -> Option<LoopDetection> {
        let signature = Signature::of(call);

        let detection = self.check_exact_duplicate(call, signature).or_else(|| {
            if self.config.enable_pattern_detection {
                self.check_pattern(call, signature)
            } else {
                None
            }
        });

        self.record(call, signature);

        let mut detection = detection?;
        self.detection_count += 1;
        self.apply_escalation(&mut detection);
        Some(detection)
    }

    fn apply_escalation(&self, detection: &mut LoopDetection) {
        detection.detection_count = self.detection_count;
        let action = self
            .config
            .escalation
            .get(self.detection_count - 1)
            .or_else(|| self.config.escalation.last())
            .copied()
            .unwrap_or(LoopAction::Warn);
        detection.action = action;
        if action == LoopAction::Warn {
            detection.warning_message = Some(self.warning_for(detection));
        }
    }

    fn warning_for(&self, detection: &LoopDetection) -> String {
        let description = match &detection.loop_type {
            LoopType::ExactDuplicate { name, count } => format!("'{name}' called with identical arguments {count} times in a row"),
            LoopType::Pattern { names, repetitions } => format!("cycling through [{}] ({repetitions}x so far)", names.join(" -> ")),
        };
        format!(
            "loop detector: {description} (detection #{}). try a different approach, ask the user for clarification, \
             or explain what's already been tried — repeating this will terminate the run.",
            self.detection_count
        )
    }

    /// Exact-duplicate detection is an O(1) streak counter rather than a
    /// rescan of `exact_window_size` entries on every call: a call either
    /// continues the current streak or resets it.
    fn check_exact_duplicate(&mut self, call: &ToolCallSignature, signature: Signature) -> Option<LoopDetection> {
        let continues = self.history.back().is_some_and(|last| last.signature == signature);
        self.streak = if continues { self.streak + 1 } else { 1 };

        if self.streak > self.config.max_exact_duplicates {
            Some(LoopDetection {
                detected: true,
                loop_type: LoopType::ExactDuplicate { name: call.name.clone(), count: self.streak },
                confidence: 1.0,
                suggestion: format!("'{}' has been called {} times with identical arguments; this looks like an infinite loop.", call.name, self.streak),
                action: LoopAction::Warn,
                detection_count: 0,
                warning_message: None,
            })
        } else {
            None
        }
    }

    fn check_pattern(&self, call: &ToolCallSignature, signature: Signature) -> Option<LoopDetection> {
        for period in self.config.min_pattern_length..=self.config.max_pattern_length {
            if self.tail_repeats_with_period(signature, period) {
                let names: Vec<String> = self.history.iter().rev().take(period).rev().map(|e| e.name.clone()).collect();
                return Some(LoopDetection {
                    detected: true,
                    loop_type: LoopType::Pattern { names, repetitions: 2 },
                    confidence: 1.0,
                    suggestion: format!("detected a repeating {period}-call pattern ending in '{}'; it has repeated at least twice.", call.name),
                    action: LoopAction::Warn,
                    detection_count: 0,
                    warning_message: None,
                });
            }
        }
        None
    }

    /// Whether appending `next` would extend the window's tail into a
    /// second full repetition of the last `period` calls — i.e. the `period`
    /// calls ending one back from `next` equal the `period` calls before
    /// that, and `next` itself matches where the cycle would restart.
    fn tail_repeats_with_period(&self, next: Signature, period: usize) -> bool {
        let len = self.history.len();
        if len < period * 2 {
            return false;
        }
        let matches_prior_cycle = (0..period).all(|offset| self.history[len - period + offset].signature == self.history[len - 2 * period + offset].signature);
        matches_prior_cycle && self.history[len - period].signature == next
    }

    fn record(&mut self, call: &ToolCallSignature, signature: Signature) {
        let max_size = self.config.exact_window_size.max(self.config.pattern_window_size);
        if self.history.len() >= max_size {
            self.history.pop_front();
        }
        self.history.push_back(Entry { name: call.name.clone(), signature });
    }

    pub fn tracked_count(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.streak = 0;
        self.detection_count = 0;
    }

    pub fn detection_count(&self) -> usize {
        self.detection_count
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_call(name: &str, args: Value) -> ToolCallSignature {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        ToolCallSignature { id: format!("call_{}", COUNTER.fetch_add(1, Ordering::SeqCst)), name: name.to_string(), arguments: args }
    }

    #[test]
    fn exact_duplicate_detected_on_fourth_identical_call() {
        let mut detector = LoopDetector::new();
        let call = make_call("bash", json!({"command": "ls"}));

        assert!(detector.check(&call).is_none());
        assert!(detector.check(&call).is_none());
        assert!(detector.check(&call).is_none());

        let detection = detector.check(&call).unwrap();
        assert!(detection.detected);
        assert_eq!(detection.action, LoopAction::Warn);
        match detection.loop_type {
            LoopType::ExactDuplicate { count, .. } => assert_eq!(count, 4),
            _ => panic!("expected ExactDuplicate"),
        }
    }

    #[test]
    fn argument_key_order_does_not_defeat_duplicate_detection() {
        let mut detector = LoopDetector::new();
        let a = make_call("bash", json!({"command": "ls", "flag": true}));
        let b = make_call("bash", json!({"flag": true, "command": "ls"}));

        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).unwrap().detected);
    }

    #[test]
    fn distinct_calls_never_trigger() {
        let mut detector = LoopDetector::new();
        let a = make_call("bash", json!({"command": "ls"}));
        let b = make_call("bash", json!({"command": "pwd"}));
        let c = make_call("bash", json!({"command": "echo hi"}));

        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());
        assert!(detector.check(&c).is_none());
        assert!(detector.check(&a).is_none());
    }

    #[test]
    fn a_streak_broken_by_a_different_call_resets_the_count() {
        let mut detector = LoopDetector::new();
        let a = make_call("bash", json!({"command": "ls"}));
        let b = make_call("bash", json!({"command": "pwd"}));

        assert!(detector.check(&a).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none(), "a different call must reset the streak, not extend it");
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&a).is_some(), "fourth consecutive 'a' after the reset must trigger");
    }

    #[test]
    fn oscillating_pattern_detected() {
        let mut detector = LoopDetector::new();
        let a = make_call("tool_a", json!({"p": "a"}));
        let b = make_call("tool_b", json!({"p": "b"}));

        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());

        let detection = detector.check(&a).unwrap();
        match detection.loop_type {
            LoopType::Pattern { names, repetitions } => {
                assert_eq!(names, vec!["tool_a".to_string(), "tool_b".to_string()]);
                assert_eq!(repetitions, 2);
            }
            _ => panic!("expected Pattern"),
        }
    }

    #[test]
    fn three_call_pattern_detected() {
        let mut detector = LoopDetector::new();
        let a = make_call("tool_a", json!({"x": 1}));
        let b = make_call("tool_b", json!({"x": 2}));
        let c = make_call("tool_c", json!({"x": 3}));

        for call in [&a, &b, &c, &a, &b, &c] {
            assert!(detector.check(call).is_none());
        }
        let detection = detector.check(&a).unwrap();
        match detection.loop_type {
            LoopType::Pattern { names, .. } => assert_eq!(names.len(), 3),
            _ => panic!("expected Pattern"),
        }
    }

    #[test]
    fn escalation_ramp_repeats_its_last_entry_past_its_length() {
        let mut detector = LoopDetector::new();
        let call = make_call("bash", json!({"command": "ls"}));
        detector.check(&call);
        detector.check(&call);
        detector.check(&call);
        let first = detector.check(&call).unwrap();
        assert_eq!(first.action, LoopAction::Warn);
        let second = detector.check(&call).unwrap();
        assert_eq!(second.action, LoopAction::Warn);
        let third = detector.check(&call).unwrap();
        assert_eq!(third.action, LoopAction::Terminate);
        let fourth = detector.check(&call).unwrap();
        assert_eq!(fourth.action, LoopAction::Terminate, "past the ramp's length, the last action repeats");
    }

    #[test]
    fn a_custom_escalation_ramp_is_honored() {
        let config = LoopDetectorConfig { escalation: vec![LoopAction::Terminate], ..Default::default() };
        let mut detector = LoopDetector::with_config(config);
        let call = make_call("bash", json!({"command": "ls"}));
        detector.check(&call);
        detector.check(&call);
        detector.check(&call);
        let detection = detector.check(&call).unwrap();
        assert_eq!(detection.action, LoopAction::Terminate, "a one-entry ramp terminates on the very first detection");
    }

    #[test]
    fn clear_resets_history_streak_and_detection_count() {
        let mut detector = LoopDetector::new();
        let call = make_call("bash", json!({"command": "ls"}));
        detector.check(&call);
        detector.check(&call);
        assert_eq!(detector.tracked_count(), 2);

        detector.clear();
        assert_eq!(detector.tracked_count(), 0);
        assert_eq!(detector.detection_count(), 0);

        assert!(detector.check(&call).is_none(), "a cleared streak must not immediately trigger");
    }
}
