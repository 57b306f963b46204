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

//! Defines the retry policies for chunk uploads.
//!
//! The default policy retries **every** failed attempt, regardless of the
//! error, until the attempt budget is spent. That includes errors that will
//! not go away, such as [FileAlreadyUploaded][crate::Error::FileAlreadyUploaded].
//! Callers only observe [UploadUnableToRecover][crate::Error::UploadUnableToRecover]
//! and are expected to restart from the remote resume index.
//!
//! Applications that prefer to fail fast on such errors can use
//! [RetryableErrors]. The error returned to the caller is the same.
//!
//! # Example
//! ```
//! # use resumable_upload::retry_policy::*;
//! # use resumable_upload::UploadConfig;
//! let config = UploadConfig::default()
//!     .with_retry_policy(RetryableErrors.with_retry_limit(3));
//! ```

use crate::Error;

/// The result of a retry policy decision.
#[derive(Debug)]
pub enum RetryResult {
    /// The error is non-retryable, stop the loop.
    Permanent(Error),

    /// The error is retryable, but the policy is stopping the loop.
    Exhausted(Error),

    /// Continue the loop.
    Continue(Error),
}

impl RetryResult {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// Determines how errors are handled in the retry loop.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `attempt_count` - the number of attempts so far, including the one
    ///   that just failed.
    /// * `error` - the last error when attempting the request.
    fn on_error(&self, attempt_count: u32, error: Error) -> RetryResult;
}

/// Retries every error.
///
/// This policy must be decorated to limit the number of retry attempts.
#[derive(Clone, Debug)]
pub struct AlwaysRetry;

impl RetryPolicy for AlwaysRetry {
    fn on_error(&self, _attempt_count: u32, error: Error) -> RetryResult {
        RetryResult::Continue(error)
    }
}

/// Retries every error, except those where the service state makes the
/// upload impossible to continue.
///
/// Stops on [FileAlreadyUploaded][Error::FileAlreadyUploaded] and
/// [UrlNotFound][Error::UrlNotFound].
#[derive(Clone, Debug)]
pub struct RetryableErrors;

impl RetryPolicy for RetryableErrors {
    fn on_error(&self, _attempt_count: u32, error: Error) -> RetryResult {
        match error {
            Error::FileAlreadyUploaded { .. } | Error::UrlNotFound(_) => {
                RetryResult::Permanent(error)
            }
            e => RetryResult::Continue(e),
        }
    }
}

/// Decorates a retry policy to stop after `maximum_retries` retries.
///
/// The loop makes at most `maximum_retries + 1` attempts.
#[derive(Clone, Debug)]
pub struct LimitedRetryCount<P> {
    inner: P,
    maximum_retries: u32,
}

impl<P> LimitedRetryCount<P> {
    pub fn new(inner: P, maximum_retries: u32) -> Self {
        Self {
            inner,
            maximum_retries,
        }
    }
}

impl LimitedRetryCount<AlwaysRetry> {
    /// The default policy: retry every error up to `maximum_retries` times.
    pub fn custom(maximum_retries: u32) -> Self {
        Self::new(AlwaysRetry, maximum_retries)
    }
}

impl<P> RetryPolicy for LimitedRetryCount<P>
where
    P: RetryPolicy,
{
    fn on_error(&self, attempt_count: u32, error: Error) -> RetryResult {
        match self.inner.on_error(attempt_count, error) {
            RetryResult::Continue(e) if attempt_count > self.maximum_retries => {
                RetryResult::Exhausted(e)
            }
            r => r,
        }
    }
}

/// Extension trait for [RetryPolicy].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the number of retries.
    fn with_retry_limit(self, maximum_retries: u32) -> LimitedRetryCount<Self> {
        LimitedRetryCount::new(self, maximum_retries)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn already_uploaded() -> Error {
        Error::FileAlreadyUploaded {
            id: "id".into(),
            url: "http://h".into(),
        }
    }

    #[test_case(Error::UploadFailed(503))]
    #[test_case(Error::UploadIncomplete)]
    #[test_case(Error::UrlNotFound("http://h".into()))]
    #[test_case(already_uploaded())]
    #[test_case(Error::transport("connection reset"))]
    fn always_retry(error: Error) {
        assert!(AlwaysRetry.on_error(1, error).is_continue());
    }

    #[test_case(Error::UploadFailed(503), true)]
    #[test_case(Error::UploadIncomplete, true)]
    #[test_case(Error::transport("connection reset"), true)]
    #[test_case(Error::UrlNotFound("http://h".into()), false)]
    #[test_case(already_uploaded(), false)]
    fn retryable_errors(error: Error, retry: bool) {
        let got = RetryableErrors.on_error(1, error);
        assert_eq!(got.is_continue(), retry, "{got:?}");
        assert_eq!(got.is_permanent(), !retry, "{got:?}");
    }

    #[test]
    fn limited_count() {
        let policy = AlwaysRetry.with_retry_limit(3);
        for attempt in 1..=3 {
            let got = policy.on_error(attempt, Error::UploadFailed(500));
            assert!(got.is_continue(), "{attempt} {got:?}");
        }
        let got = policy.on_error(4, Error::UploadFailed(500));
        assert!(got.is_exhausted(), "{got:?}");
    }

    #[test]
    fn limited_count_zero() {
        let policy = LimitedRetryCount::custom(0);
        let got = policy.on_error(1, Error::UploadFailed(500));
        assert!(got.is_exhausted(), "{got:?}");
    }

    #[test]
    fn limited_count_keeps_permanent() {
        let policy = RetryableErrors.with_retry_limit(3);
        let got = policy.on_error(1, already_uploaded());
        assert!(got.is_permanent(), "{got:?}");
    }
}
