// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the backoff policies used between chunk upload attempts.
//!
//! The default policy, [FixedBackoff], waits the same amount of time before
//! each retry. Applications uploading to a busy service may prefer
//! [ExponentialBackoff], which doubles the delay on each attempt and adds
//! jitter.
//!
//! # Example
//! ```
//! # use resumable_upload::backoff_policy::*;
//! use std::time::Duration;
//! let policy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5))?;
//! # Ok::<(), BackoffError>(())
//! ```

use std::time::{Duration, Instant};

/// Defines the trait implemented by all backoff strategies.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the backoff delay on a failure.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts. This method is always called
    ///   after the first attempt.
    fn on_failure(&self, loop_start: Instant, attempt_count: u32) -> Duration;
}

/// Waits the same delay before each retry.
#[derive(Clone, Debug)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::session::DEFAULT_BACKOFF_DELAY_MILLIS))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn on_failure(&self, _loop_start: Instant, _attempt_count: u32) -> Duration {
        self.delay
    }
}

/// The parameters of an [ExponentialBackoff] are unusable.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum BackoffError {
    #[error(
        "cannot back off between {initial:?} and {maximum:?}, the initial delay must be positive and not larger than the maximum"
    )]
    InvalidRange { initial: Duration, maximum: Duration },
}

/// Doubles the delay after each failed attempt, up to a maximum.
///
/// The actual delay is picked at random between zero and the current
/// ceiling, so many clients retrying at once do not hit the service
/// together.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    maximum: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, maximum: Duration) -> Result<Self, BackoffError> {
        if initial.is_zero() || maximum < initial {
            return Err(BackoffError::InvalidRange { initial, maximum });
        }
        Ok(Self { initial, maximum })
    }

    /// The largest delay after `attempt_count` attempts.
    fn ceiling(&self, attempt_count: u32) -> Duration {
        // Past 2^31 the product saturates anyway.
        let doublings = attempt_count.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1_u32 << doublings)
            .min(self.maximum)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, _loop_start: Instant, attempt_count: u32) -> Duration {
        use rand::Rng;
        rand::rng().random_range(Duration::ZERO..=self.ceiling(attempt_count))
    }
}
