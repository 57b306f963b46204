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

//! Chunked, resumable uploads to object storage.
//!
//! This crate implements the client side of the [resumable upload] protocol
//! used by Google Cloud Storage. The payload is sent in chunks, each one a
//! `PUT` request with a `Content-Range` header. The service answers each
//! chunk with `308 Resume Incomplete` until the upload is finalized. After an
//! interruption the application queries the service for the data it has
//! persisted and resumes from there.
//!
//! Most applications will use [UploadSession], configured with an
//! [UploadConfig]:
//!
//! * [upload_reader][UploadSession::upload_reader] uploads all the data from
//!   an [AsyncRead][tokio::io::AsyncRead], resuming a previous attempt if
//!   possible.
//! * [upload_chunk][UploadSession::upload_chunk] and
//!   [get_remote_resume_index][UploadSession::get_remote_resume_index] let
//!   applications produce the chunks themselves.
//!
//! This crate does not create the upload session URL, applications obtain it
//! from the service before creating an [UploadSession].
//!
//! [resumable upload]: https://cloud.google.com/storage/docs/resumable-uploads

pub mod backoff_policy;
pub mod checksum;
pub mod checksum_store;
pub mod classifier;
mod error;
pub mod pause_gate;
mod retry_loop;
pub mod retry_policy;
mod session;
pub mod transport;
mod uploader;

pub use error::{Error, Result};
pub use session::{
    ChunkProgress, DEFAULT_BACKOFF_DELAY_MILLIS, DEFAULT_BACKOFF_RETRY_LIMIT, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONTENT_TYPE, MIN_CHUNK_SIZE, ProgressCallback, UploadConfig, UploadSession,
};
