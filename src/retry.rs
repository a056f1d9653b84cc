use serde::Deserialize;

/// Retry budget handed to every retrieve job when its request is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryLimits {
    #[serde(default = "RetryLimits::default_max_retries_within_mount")]
    pub max_retries_within_mount: u32,
    #[serde(default = "RetryLimits::default_max_total_retries")]
    pub max_total_retries: u32,
}

impl RetryLimits {
    pub fn default_max_retries_within_mount() -> u32 {
        3
    }
    pub fn default_max_total_retries() -> u32 {
        6
    }
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_retries_within_mount: Self::default_max_retries_within_mount(),
            max_total_retries: Self::default_max_total_retries(),
        }
    }
}

/// What a job may do after a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry again on the tape that is currently mounted.
    SameMount,
    /// Retry, but only on a later mount.
    NextMount,
    /// The total budget is spent; the job is failed.
    Exhausted,
}

/// Decide the fate of a job from its counters *after* the failure was counted.
pub fn retry_decision(
    retries_within_mount: u32,
    max_retries_within_mount: u32,
    total_retries: u32,
    max_total_retries: u32,
) -> RetryDecision {
    if total_retries >= max_total_retries {
        RetryDecision::Exhausted
    } else if retries_within_mount >= max_retries_within_mount {
        RetryDecision::NextMount
    } else {
        RetryDecision::SameMount
    }
}
