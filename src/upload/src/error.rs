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

//! Errors returned by the resumable upload client.
//!
//! Errors fall into three groups:
//! - Configuration errors ([Error::MissingOptions], [Error::InvalidChunkSize],
//!   [Error::InvalidOption])
//!   are returned when the [UploadSession][crate::UploadSession] is created.
//!   They are never retried.
//! - Protocol errors ([Error::FileAlreadyUploaded], [Error::UrlNotFound],
//!   [Error::UploadFailed], [Error::UploadIncomplete],
//!   [Error::UnknownResponse]) and transport errors ([Error::Transport]) are
//!   produced by each chunk attempt. The retry loop absorbs them.
//! - Once the retry loop gives up, the chunk upload fails with
//!   [Error::UploadUnableToRecover]. The last attempt's error is available
//!   via [source()][std::error::Error::source] for diagnostics only.

use crate::transport::Response;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for all operations in this crate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The service reports the upload as complete.
    ///
    /// The service returns `200 OK` or `201 Created` once all the bytes of the
    /// object are persisted. Any further request on the same upload URL gets
    /// the same response.
    #[error("the upload {id} to {url} is already complete")]
    FileAlreadyUploaded { id: String, url: String },

    /// The upload URL does not exist, or it has expired.
    ///
    /// # Troubleshoot
    ///
    /// Resumable upload sessions expire after some time, typically one week.
    /// Start a new session and a new upload.
    #[error("the upload URL {0} was not found")]
    UrlNotFound(String),

    /// The service failed with a server-side error.
    #[error("the upload failed with HTTP status {0}")]
    UploadFailed(u16),

    /// The chunk could not be uploaded, even after retrying.
    ///
    /// This is the only error returned by
    /// [upload_chunk][crate::UploadSession::upload_chunk] when the service or
    /// the network misbehave. Callers should restart the upload, typically
    /// by querying the resume index.
    #[error("cannot recover the upload after {attempts} attempt(s)")]
    UploadUnableToRecover {
        attempts: u32,
        #[source]
        source: Option<BoxError>,
    },

    /// The service returned a response that does not fit the protocol.
    #[error("unexpected response from the upload service, status={}", .0.status)]
    UnknownResponse(Box<Response>),

    /// A required configuration option is missing.
    #[error("missing required option: {0}")]
    MissingOptions(String),

    /// A configuration option has an invalid value.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// The service reports the upload is incomplete where a complete upload
    /// was expected.
    #[error("the upload is incomplete")]
    UploadIncomplete,

    /// The chunk size is zero, or not a multiple of the minimum chunk size.
    #[error(
        "invalid chunk size {0}, it must be a positive multiple of {min}",
        min = crate::MIN_CHUNK_SIZE
    )]
    InvalidChunkSize(u64),

    /// A chunk read while resuming does not match the checksum recorded when
    /// it was uploaded.
    ///
    /// # Troubleshoot
    ///
    /// The local data changed since the previous attempt. Cancel the session
    /// and start a new upload.
    #[error("chunk {index} changed since it was uploaded: expected={expected}, actual={actual}")]
    ChunkMismatch {
        index: u64,
        expected: String,
        actual: String,
    },

    /// The transport could not complete the request.
    #[error("cannot send the request: {0}")]
    Transport(#[source] BoxError),

    /// The checksum store failed to load or save a checksum.
    #[error("checksum store error: {0}")]
    Storage(#[source] BoxError),

    /// The payload could not be read.
    #[error("cannot read the payload: {0}")]
    Read(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn transport<T: Into<BoxError>>(source: T) -> Self {
        Self::Transport(source.into())
    }

    pub(crate) fn storage<T: Into<BoxError>>(source: T) -> Self {
        Self::Storage(source.into())
    }

    /// Returns the HTTP status code, if the error was produced by a response.
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::UploadFailed(status) => Some(*status),
            Self::UnknownResponse(response) => Some(response.status),
            Self::UrlNotFound(_) => Some(404),
            Self::UploadIncomplete => Some(308),
            _ => None,
        }
    }

    /// The error is a configuration problem and retrying cannot help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingOptions(_) | Self::InvalidChunkSize(_) | Self::InvalidOption(_)
        )
    }

    /// The error reports an exhausted retry loop.
    pub fn is_unable_to_recover(&self) -> bool {
        matches!(self, Self::UploadUnableToRecover { .. })
    }
}

/// A specialized [Result][std::result::Result] for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn unable_to_recover_keeps_source() {
        let err = Error::UploadUnableToRecover {
            attempts: 6,
            source: Some(Error::UploadFailed(503).into()),
        };
        let fmt = err.to_string();
        assert!(fmt.contains("6 attempt(s)"), "{err:?} => {fmt}");
        let source = err
            .source()
            .and_then(|e| e.downcast_ref::<Error>())
            .expect("source should be the last attempt error");
        assert!(matches!(source, Error::UploadFailed(503)), "{source:?}");
        assert!(err.is_unable_to_recover());
        assert_eq!(err.http_status_code(), None);
    }

    #[test]
    fn configuration() {
        assert!(Error::MissingOptions("id".into()).is_configuration());
        assert!(Error::InvalidChunkSize(1024).is_configuration());
        assert!(Error::InvalidOption("content type".into()).is_configuration());
        assert!(!Error::UploadFailed(500).is_configuration());

        let fmt = Error::InvalidChunkSize(1024).to_string();
        assert!(fmt.contains("1024"), "{fmt}");
        assert!(fmt.contains("262144"), "{fmt}");
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::UploadFailed(502).http_status_code(), Some(502));
        assert_eq!(
            Error::UrlNotFound("http://h".into()).http_status_code(),
            Some(404)
        );
        assert_eq!(Error::UploadIncomplete.http_status_code(), Some(308));
        let response = Response::new(418, http::HeaderMap::new(), bytes::Bytes::new());
        let err = Error::UnknownResponse(Box::new(response));
        assert_eq!(err.http_status_code(), Some(418));
        assert!(err.to_string().contains("status=418"), "{err}");
    }

    #[test]
    fn transport_and_storage() {
        let err = Error::transport(std::io::Error::other("connection reset"));
        assert!(err.to_string().contains("connection reset"), "{err}");
        assert!(err.source().is_some());

        let err = Error::storage("disk full");
        assert!(err.to_string().contains("disk full"), "{err}");
    }
}
