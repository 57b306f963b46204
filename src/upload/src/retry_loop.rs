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

use crate::backoff_policy::BackoffPolicy;
use crate::retry_policy::{RetryPolicy, RetryResult};
use crate::{Error, Result};
use std::time::Duration;

/// Runs the retry loop for a given function.
///
/// This functions calls `inner` as long as (1) the retry policy allows more
/// attempts, and (2) `inner` has not returned a successful result. In between
/// calls the function waits the amount of time prescribed by the backoff
/// policy, using `sleep` to implement any sleep.
///
/// `inner` receives the attempt number, starting at 1.
///
/// Once the loop stops on an error, the error is replaced by
/// [Error::UploadUnableToRecover]. The original error is only kept as its
/// source.
pub(crate) async fn retry_loop<F, S, T>(
    mut inner: F,
    sleep: S,
    retry_policy: &dyn RetryPolicy,
    backoff_policy: &dyn BackoffPolicy,
) -> Result<T>
where
    F: AsyncFnMut(u32) -> Result<T> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    let loop_start = tokio::time::Instant::now().into_std();
    let mut attempt_count = 0_u32;
    loop {
        attempt_count += 1;
        let error = match inner(attempt_count).await {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        match retry_policy.on_error(attempt_count, error) {
            RetryResult::Continue(e) => {
                let delay = backoff_policy.on_failure(loop_start, attempt_count);
                tracing::warn!("attempt {attempt_count} failed, retrying in {delay:?}: {e}");
                sleep(delay).await;
            }
            RetryResult::Permanent(e) | RetryResult::Exhausted(e) => {
                tracing::warn!("giving up after {attempt_count} attempt(s): {e}");
                return Err(Error::UploadUnableToRecover {
                    attempts: attempt_count,
                    source: Some(e.into()),
                });
            }
        }
    }
}
