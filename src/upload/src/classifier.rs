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

//! Classifies responses from the resumable upload service.
//!
//! The same status code means different things depending on the request. A
//! [308 Resume Incomplete][308] is the expected response for a chunk in the middle
//! of an upload, and it is also the only useful response when querying the
//! upload status. But a `200 OK` in response to a status query means the
//! upload is already finalized and there is nothing left to resume. Therefore
//! each call site provides the list of status codes it considers successful.
//!
//! [308]: https://cloud.google.com/storage/docs/json_api/v1/status-codes#308_Resume_Incomplete

use crate::transport::Response;
use crate::{Error, Result};

/// `308 Resume Incomplete`, the service has not received all the data.
pub const RESUME_INCOMPLETE: u16 = 308;

/// The result of classifying a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The status is in the allowed list.
    Success,
    /// The service has not received all the data (308).
    Incomplete,
    /// The service already has all the data (200, 201).
    AlreadyUploaded,
    /// The upload URL is not known to the service (404).
    NotFound,
    /// The service failed (500, 502, 503, 504).
    ServerError(u16),
    /// Any other status code.
    Unknown(u16),
}

/// Classifies `status` given the status codes the caller considers successful.
///
/// Membership in `allowed` takes precedence over the fixed mapping, so the
/// same status can be a success for one request and an error for another.
///
/// # Example
/// ```
/// # use resumable_upload::classifier::{classify, Outcome};
/// assert_eq!(classify(200, &[200, 201, 308]), Outcome::Success);
/// assert_eq!(classify(200, &[]), Outcome::AlreadyUploaded);
/// ```
pub fn classify(status: u16, allowed: &[u16]) -> Outcome {
    if allowed.contains(&status) {
        return Outcome::Success;
    }
    match status {
        RESUME_INCOMPLETE => Outcome::Incomplete,
        200 | 201 => Outcome::AlreadyUploaded,
        404 => Outcome::NotFound,
        500 | 502 | 503 | 504 => Outcome::ServerError(status),
        s => Outcome::Unknown(s),
    }
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Identifies the upload in the errors produced by [check_response].
#[derive(Clone, Copy, Debug)]
pub(crate) struct UploadRef<'a> {
    pub id: &'a str,
    pub url: &'a str,
}

/// Classifies `response` and converts any non-success outcome into an error.
pub(crate) fn check_response(
    upload: UploadRef<'_>,
    response: Response,
    allowed: &[u16],
) -> Result<Response> {
    match classify(response.status, allowed) {
        Outcome::Success => Ok(response),
        Outcome::Incomplete => Err(Error::UploadIncomplete),
        Outcome::AlreadyUploaded => Err(Error::FileAlreadyUploaded {
            id: upload.id.to_string(),
            url: upload.url.to_string(),
        }),
        Outcome::NotFound => Err(Error::UrlNotFound(upload.url.to_string())),
        Outcome::ServerError(status) => Err(Error::UploadFailed(status)),
        Outcome::Unknown(_) => Err(Error::UnknownResponse(Box::new(response))),
    }
}
