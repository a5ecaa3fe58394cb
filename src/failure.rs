//! Capture failure suppression
//!
//! Counts consecutive capture failures. Once the threshold is reached the
//! periodic capture stays suppressed until an explicit resume; there is no
//! timer-based retry.

/// Default number of consecutive failures before suppression
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Result of one capture attempt as seen by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A frame was captured
    Success,
    /// The capture source failed
    Failure,
}

/// Consecutive-failure counter with permanent suppression
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    threshold: u32,
    consecutive_failures: u32,
    suppressed: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl FailurePolicy {
    /// Create a policy that suppresses after `threshold` consecutive failures
    ///
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            suppressed: false,
        }
    }

    /// Record a capture outcome
    ///
    /// Returns `true` if this outcome just caused suppression.
    pub fn record(&mut self, outcome: CaptureOutcome) -> bool {
        match outcome {
            CaptureOutcome::Success => {
                self.consecutive_failures = 0;
                false
            }
            CaptureOutcome::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if !self.suppressed && self.consecutive_failures >= self.threshold {
                    self.suppressed = true;
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        "capture failing repeatedly, automatic narration suppressed"
                    );
                    return true;
                }
                false
            }
        }
    }

    /// Clear the counter and lift suppression (explicit user action only)
    pub fn resume(&mut self) {
        if self.suppressed {
            tracing::info!("capture suppression lifted");
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Whether periodic capture is suppressed
    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Current run of consecutive failures
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Configured threshold
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }
}
