//! §4.E message queue: steering vs. follow-up delivery, grounded in
//! `original_source/koda/agent/queue.py`'s `MessageQueue`.
//!
//! Steering messages interrupt the current turn; follow-up messages wait for
//! the loop to go idle. Both classes independently support "one-at-a-time"
//! or "all" delivery. Steering always drains before follow-up.

use crate::config::QueueMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Steering,
    FollowUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub content: String,
    pub mode: DeliveryMode,
    pub timestamp: i64,
}

/// Pending user input awaiting delivery into the running agent loop.
#[derive(Debug, Default)]
pub struct MessageQueue {
    steering_mode: QueueModeOrDefault,
    follow_up_mode: QueueModeOrDefault,
    queue: Vec<QueuedMessage>,
}

/// `QueueMode` has no `Default`; this newtype just gives the struct one
/// without forcing every caller through `MessageQueue::new`.
#[derive(Debug, Clone, Copy)]
struct QueueModeOrDefault(QueueMode);

impl Default for QueueModeOrDefault {
    fn default() -> Self {
        QueueModeOrDefault(QueueMode::OneAtATime)
    }
}

impl MessageQueue {
    pub fn new(steering_mode: QueueMode, follow_up_mode: QueueMode) -> Self {
        Self {
            steering_mode: QueueModeOrDefault(steering_mode),
            follow_up_mode: QueueModeOrDefault(follow_up_mode),
            queue: Vec::new(),
        }
    }

    pub fn queue_steering(&mut self, content: impl Into<String>, timestamp: i64) -> &QueuedMessage {
        self.push(content.into(), DeliveryMode::Steering, timestamp)
    }

    pub fn queue_follow_up(&mut self, content: impl Into<String>, timestamp: i64) -> &QueuedMessage {
        self.push(content.into(), DeliveryMode::FollowUp, timestamp)
    }

    fn push(&mut self, content: String, mode: DeliveryMode, timestamp: i64) -> &QueuedMessage {
        self.queue.push(QueuedMessage { content, mode, timestamp });
        self.queue.last().expect("just pushed")
    }

    /// Pop the next message to deliver. Steering drains first; within a
    /// class, "all" mode combines every pending message of that class with
    /// a blank-line separator and clears only that class, leaving the other
    /// class's messages untouched — the original's "all" follow-up mode
    /// bug (`self._queue = []`, wiping steering messages queued in between)
    /// is corrected here.
    pub fn get_next(&mut self, timestamp: i64) -> Option<QueuedMessage> {
        if let Some(msg) = self.take_class(DeliveryMode::Steering, self.steering_mode.0, timestamp) {
            return Some(msg);
        }
        self.take_class(DeliveryMode::FollowUp, self.follow_up_mode.0, timestamp)
    }

    fn take_class(&mut self, mode: DeliveryMode, delivery: QueueMode, timestamp: i64) -> Option<QueuedMessage> {
        if !self.queue.iter().any(|m| m.mode == mode) {
            return None;
        }
        match delivery {
            QueueMode::All => {
                let combined = self
                    .queue
                    .iter()
                    .filter(|m| m.mode == mode)
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                self.queue.retain(|m| m.mode != mode);
                Some(QueuedMessage { content: combined, mode, timestamp })
            }
            QueueMode::OneAtATime => {
                let idx = self.queue.iter().position(|m| m.mode == mode)?;
                Some(self.queue.remove(idx))
            }
        }
    }

    pub fn peek(&self) -> Option<&QueuedMessage> {
        self.queue.first()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_steering_count(&self) -> usize {
        self.queue.iter().filter(|m| m.mode == DeliveryMode::Steering).count()
    }

    /// Drop every queued message and return what was dropped.
    pub fn clear(&mut self) -> Vec<QueuedMessage> {
        std::mem::take(&mut self.queue)
    }
}
