//! Input Validation
//!
//! Student messages are checked before they reach the orchestrator's
//! critical section or the completion API:
//! - empty or whitespace-only messages
//! - oversized messages
//! - control character injection
//! - message floods (per-minute rate limit)
//!
//! Rejected input never touches history or persistence.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Limits applied to student input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLimits {
    /// Maximum size of a single message in bytes (default: 4KB)
    pub max_message_bytes: usize,
    /// Maximum messages per minute (default: 20, 0 = unlimited)
    pub max_messages_per_minute: u32,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: 4 * 1024, // 4KB
            max_messages_per_minute: 20,
        }
    }
}

/// Result of input validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is valid
    Valid,
    /// Input is invalid with reason
    Invalid(String),
    /// Input was rate limited
    RateLimited(String),
}

impl ValidationResult {
    /// Check if the result indicates valid input
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Get the error message if invalid
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(msg) | Self::RateLimited(msg) => Some(msg),
        }
    }
}

/// Length of the sliding rate-limit window
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Validator for student messages
#[derive(Debug)]
pub struct InputValidator {
    limits: ChatLimits,
    /// Accepted message times within the last [`RATE_WINDOW`], oldest first
    accepted: Mutex<VecDeque<Instant>>,
}

impl InputValidator {
    /// Create a new input validator with the given limits
    #[must_use]
    pub fn new(limits: ChatLimits) -> Self {
        Self {
            limits,
            accepted: Mutex::new(VecDeque::new()),
        }
    }

    /// Validate a student message
    ///
    /// Only messages that pass the content checks count towards the rate
    /// limit.
    pub fn validate_message(&self, content: &str) -> ValidationResult {
        if content.trim().is_empty() {
            return ValidationResult::Invalid("Message is empty".to_string());
        }

        if content.len() > self.limits.max_message_bytes {
            return ValidationResult::Invalid(format!(
                "Message too large: {} bytes (max: {})",
                content.len(),
                self.limits.max_message_bytes
            ));
        }

        // Newline, tab and carriage return are fine
        if content
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return ValidationResult::Invalid(
                "Message contains invalid control characters".to_string(),
            );
        }

        self.check_rate_limit(Instant::now())
    }

    /// Check and update the sliding one-minute window
    fn check_rate_limit(&self, now: Instant) -> ValidationResult {
        let max = self.limits.max_messages_per_minute as usize;
        if max == 0 {
            return ValidationResult::Valid;
        }

        let mut accepted = self.accepted.lock();
        while accepted
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= RATE_WINDOW)
        {
            accepted.pop_front();
        }

        if accepted.len() >= max {
            return ValidationResult::RateLimited(format!(
                "Rate limit exceeded: max {} messages/minute",
                self.limits.max_messages_per_minute
            ));
        }

        accepted.push_back(now);
        ValidationResult::Valid
    }

    /// Get the current limits
    #[must_use]
    pub fn limits(&self) -> &ChatLimits {
        &self.limits
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(ChatLimits::default())
    }
}
