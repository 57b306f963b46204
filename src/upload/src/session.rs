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

use crate::backoff_policy::{BackoffPolicy, FixedBackoff};
use crate::checksum::Crc32c;
use crate::checksum_store::{ChecksumStore, InMemoryChecksumStore};
use crate::classifier::{RESUME_INCOMPLETE, UploadRef, check_response};
use crate::pause_gate::PauseGate;
use crate::retry_loop::retry_loop;
use crate::retry_policy::{LimitedRetryCount, RetryPolicy};
use crate::transport::{PutRequest, ReqwestTransport, Transport, UploadProgress};
use crate::{Error, Result};
use bytes::Bytes;
use http::HeaderMap;
use http::header::{CONTENT_RANGE, CONTENT_TYPE, HeaderValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The service requires chunk sizes to be multiples of this value.
///
/// Only the last chunk of an upload can be smaller.
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;

pub const DEFAULT_CHUNK_SIZE: u64 = MIN_CHUNK_SIZE;
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";
pub const DEFAULT_BACKOFF_DELAY_MILLIS: u64 = 1000;
pub const DEFAULT_BACKOFF_RETRY_LIMIT: u32 = 5;

/// The status codes accepted in response to a chunk.
const CHUNK_ALLOWED: &[u16] = &[200, 201, RESUME_INCOMPLETE];

/// The status codes accepted in response to a finalize request.
const FINALIZE_ALLOWED: &[u16] = &[200, 201];

/// Reports the progress of a chunk upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkProgress {
    /// The offset of the end of the chunk, that is, the number of bytes in
    /// the upload once this chunk completes.
    pub total_bytes: u64,
    /// The number of bytes sent so far, counted from the start of the upload.
    pub uploaded_bytes: u64,
    pub chunk_index: u64,
    pub chunk_length: u64,
}

/// Receives [ChunkProgress] updates.
pub type ProgressCallback = Arc<dyn Fn(ChunkProgress) + Send + Sync>;

/// The configuration for an [UploadSession].
///
/// # Example
/// ```
/// # use resumable_upload::UploadConfig;
/// # use std::time::Duration;
/// let config = UploadConfig::default()
///     .with_id("my-upload")
///     .with_url("https://storage.googleapis.com/upload/storage/v1/b/my-bucket/o?uploadType=resumable&upload_id=abc")
///     .with_chunk_size(4 * 256 * 1024)
///     .with_backoff_delay(Duration::from_millis(500));
/// ```
#[derive(Clone)]
pub struct UploadConfig {
    id: Option<String>,
    url: Option<String>,
    chunk_size: u64,
    content_type: String,
    backoff_delay: Duration,
    backoff_retry_limit: u32,
    total_size: Option<u64>,
    checksum_store: Arc<dyn ChecksumStore>,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    on_chunk_upload: Option<ProgressCallback>,
    on_progress: Option<ProgressCallback>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            id: None,
            url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            backoff_delay: Duration::from_millis(DEFAULT_BACKOFF_DELAY_MILLIS),
            backoff_retry_limit: DEFAULT_BACKOFF_RETRY_LIMIT,
            total_size: None,
            checksum_store: Arc::new(InMemoryChecksumStore::new()),
            transport: None,
            retry_policy: None,
            backoff_policy: None,
            on_chunk_upload: None,
            on_progress: None,
        }
    }
}

impl UploadConfig {
    /// Sets the upload id, used as the key for the saved checksums.
    pub fn with_id<V: Into<String>>(mut self, v: V) -> Self {
        self.id = Some(v.into());
        self
    }

    /// Sets the resumable upload session URL.
    pub fn with_url<V: Into<String>>(mut self, v: V) -> Self {
        self.url = Some(v.into());
        self
    }

    pub fn with_chunk_size(mut self, v: u64) -> Self {
        self.chunk_size = v;
        self
    }

    pub fn with_content_type<V: Into<String>>(mut self, v: V) -> Self {
        self.content_type = v.into();
        self
    }

    /// Sets the delay between attempts for the default backoff policy.
    pub fn with_backoff_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.backoff_delay = v.into();
        self
    }

    /// Sets the number of retries for the default retry policy.
    ///
    /// Each chunk is attempted at most `v + 1` times.
    pub fn with_backoff_retry_limit(mut self, v: u32) -> Self {
        self.backoff_retry_limit = v;
        self
    }

    /// Sets the size of the upload, if known.
    ///
    /// With a known size the chunk that reaches it finalizes the object.
    /// Otherwise chunks are sent with an unknown total size.
    pub fn with_total_size(mut self, v: u64) -> Self {
        self.total_size = Some(v);
        self
    }

    /// Replaces the default [InMemoryChecksumStore].
    pub fn with_checksum_store<V: ChecksumStore + 'static>(mut self, v: V) -> Self {
        self.checksum_store = Arc::new(v);
        self
    }

    /// Replaces the default [ReqwestTransport].
    pub fn with_transport<V: Transport + 'static>(mut self, v: V) -> Self {
        self.transport = Some(Arc::new(v));
        self
    }

    /// Replaces the retry policy built from the retry limit.
    ///
    /// # Example
    /// ```
    /// # use resumable_upload::UploadConfig;
    /// use resumable_upload::retry_policy::{RetryableErrors, RetryPolicyExt};
    /// let config = UploadConfig::default()
    ///     .with_retry_policy(RetryableErrors.with_retry_limit(10));
    /// ```
    pub fn with_retry_policy<V: RetryPolicy + 'static>(mut self, v: V) -> Self {
        self.retry_policy = Some(Arc::new(v));
        self
    }

    /// Replaces the backoff policy built from the backoff delay.
    pub fn with_backoff_policy<V: BackoffPolicy + 'static>(mut self, v: V) -> Self {
        self.backoff_policy = Some(Arc::new(v));
        self
    }

    /// Called after each chunk is uploaded and its checksum saved.
    pub fn with_on_chunk_upload<F>(mut self, f: F) -> Self
    where
        F: Fn(ChunkProgress) + Send + Sync + 'static,
    {
        self.on_chunk_upload = Some(Arc::new(f));
        self
    }

    /// Called as the bytes of each chunk are sent.
    pub fn with_on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(ChunkProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff_delay
    }

    pub fn backoff_retry_limit(&self) -> u32 {
        self.backoff_retry_limit
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn checksum_store(&self) -> &Arc<dyn ChecksumStore> {
        &self.checksum_store
    }
}

impl std::fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadConfig")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("chunk_size", &self.chunk_size)
            .field("content_type", &self.content_type)
            .field("backoff_delay", &self.backoff_delay)
            .field("backoff_retry_limit", &self.backoff_retry_limit)
            .field("total_size", &self.total_size)
            .field("checksum_store", &self.checksum_store)
            .field("transport", &self.transport)
            .field("retry_policy", &self.retry_policy)
            .field("backoff_policy", &self.backoff_policy)
            .field(
                "on_chunk_upload",
                &self.on_chunk_upload.as_ref().map(|_| "[callback]"),
            )
            .field("on_progress", &self.on_progress.as_ref().map(|_| "[callback]"))
            .finish()
    }
}

/// Uploads a payload in chunks to a resumable upload session.
///
/// The caller produces the chunks, typically by reading a file, and calls
/// [upload_chunk][UploadSession::upload_chunk] for each one, in order. After
/// an interruption, [get_remote_resume_index][UploadSession::get_remote_resume_index]
/// returns the index of the first chunk the service has not persisted. Pass
/// the chunks before that index to [verify_chunk][UploadSession::verify_chunk]
/// so the checksums saved for the following chunks cover the whole upload.
/// [upload_reader][UploadSession::upload_reader] does all of this for any
/// [AsyncRead][tokio::io::AsyncRead].
///
/// All the methods take `&self`. Wrap the session in an [Arc] to pause,
/// unpause, or cancel it from a different task.
///
/// # Example
/// ```no_run
/// # use resumable_upload::{UploadConfig, UploadSession};
/// # async fn sample(data: Vec<bytes::Bytes>) -> resumable_upload::Result<()> {
/// let config = UploadConfig::default()
///     .with_id("my-upload")
///     .with_url("https://storage.googleapis.com/upload/storage/v1/b/my-bucket/o?uploadType=resumable&upload_id=abc");
/// let session = UploadSession::new(config, false)?;
/// let start = session.get_remote_resume_index().await?;
/// for (index, chunk) in data.into_iter().enumerate() {
///     let index = index as u64;
///     if index < start {
///         // Already persisted by the service, only fold it into the checksum.
///         session.verify_chunk(index, &chunk)?;
///     } else {
///         session.upload_chunk(index, chunk).await?;
///     }
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct UploadSession {
    config: UploadConfig,
    id: String,
    url: String,
    content_type: HeaderValue,
    transport: Arc<dyn Transport>,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    checksum: Mutex<Crc32c>,
    pub(crate) gate: PauseGate,
}

impl UploadSession {
    /// Validates `config` and creates a session.
    ///
    /// Fails with [Error::MissingOptions] if the id or the URL are missing,
    /// and with [Error::InvalidChunkSize] if the chunk size is zero or, unless
    /// `allow_small_chunks` is set, not a multiple of [MIN_CHUNK_SIZE].
    ///
    /// Opens the record for the upload id in the checksum store.
    pub fn new(config: UploadConfig, allow_small_chunks: bool) -> Result<Self> {
        let id = match config.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(Error::MissingOptions("the upload id is required".into())),
        };
        let url = match config.url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return Err(Error::MissingOptions("the upload URL is required".into())),
        };
        let chunk_size = config.chunk_size;
        if chunk_size == 0 || (!allow_small_chunks && chunk_size % MIN_CHUNK_SIZE != 0) {
            return Err(Error::InvalidChunkSize(chunk_size));
        }
        let content_type = HeaderValue::from_str(&config.content_type).map_err(|e| {
            Error::InvalidOption(format!("content type {:?}: {e}", config.content_type))
        })?;
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(t) => t.clone(),
            None => Arc::new(ReqwestTransport::new()?),
        };
        let retry_policy: Arc<dyn RetryPolicy> = match &config.retry_policy {
            Some(p) => p.clone(),
            None => Arc::new(LimitedRetryCount::custom(config.backoff_retry_limit)),
        };
        let backoff_policy: Arc<dyn BackoffPolicy> = match &config.backoff_policy {
            Some(p) => p.clone(),
            None => Arc::new(FixedBackoff::new(config.backoff_delay)),
        };
        config.checksum_store.open(&id, chunk_size)?;
        Ok(Self {
            config,
            id,
            url,
            content_type,
            transport,
            retry_policy,
            backoff_policy,
            checksum: Mutex::new(Crc32c::new()),
            gate: PauseGate::new(),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Uploads the chunk at `index`.
    ///
    /// Chunks must be uploaded in order, starting at index 0 or at the
    /// resume index. Retrying the same index after a failure is safe. Waits
    /// while the session is paused.
    ///
    /// The checksum of the chunk is only saved if the session has seen all
    /// the data before it, either uploaded or passed to
    /// [verify_chunk][Self::verify_chunk].
    ///
    /// Every failed attempt is retried according to the retry and backoff
    /// policies. Once they give up this returns
    /// [Error::UploadUnableToRecover]. If the chunk is uploaded but its
    /// checksum cannot be saved, this returns [Error::Storage].
    #[tracing::instrument(
        level = "debug",
        skip(self, chunk),
        fields(id = %self.id, chunk_length = chunk.len())
    )]
    pub async fn upload_chunk(&self, index: u64, chunk: Bytes) -> Result<()> {
        let chunk_length = chunk.len() as u64;
        let start = index * self.config.chunk_size;
        let end = start + chunk_length;

        self.gate.check_and_wait().await;

        let checksum = self
            .checksum
            .lock()
            .expect("checksum lock is poisoned")
            .update(start, &chunk);
        let headers = self.chunk_headers(start, end)?;
        let mut request = PutRequest::new(self.url.as_str(), headers, chunk);
        request.on_upload_progress = self.progress_callback(index, start, chunk_length);
        self.put_with_retry(request, CHUNK_ALLOWED).await?;

        match checksum {
            Some(checksum) => self.config.checksum_store.put(&self.id, index, &checksum)?,
            None => tracing::warn!(
                "chunk {index} does not follow the chunks seen by this session, its checksum is not saved"
            ),
        }
        if let Some(callback) = &self.config.on_chunk_upload {
            callback(ChunkProgress {
                total_bytes: end,
                uploaded_bytes: end,
                chunk_index: index,
                chunk_length,
            });
        }
        Ok(())
    }

    /// Finalizes an upload of unknown size, after all its chunks are
    /// uploaded.
    ///
    /// Sends an empty request with `Content-Range: bytes */{size}`. Not
    /// needed if the size was configured, the chunk that reaches it finalizes
    /// the upload. Waits while the session is paused and retries like
    /// [upload_chunk][Self::upload_chunk].
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id))]
    pub async fn finalize(&self, size: u64) -> Result<()> {
        self.gate.check_and_wait().await;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, self.content_type.clone());
        headers.insert(CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
        let request = PutRequest::new(self.url.as_str(), headers, Bytes::new());
        self.put_with_retry(request, FINALIZE_ALLOWED).await
    }

    /// Queries the service for the index of the next chunk to upload.
    ///
    /// Sends an empty request with `Content-Range: bytes */*`. The service
    /// answers with `308 Resume Incomplete` and, if it has persisted any
    /// data, a `Range: bytes=0-{end}` header. The result is the number of
    /// complete chunks in `0..=end`.
    ///
    /// This is a status query. It is not delayed by [pause][Self::pause] and
    /// is not retried. Any status other than 308 is reported as the
    /// corresponding error, for example, [Error::FileAlreadyUploaded] if the
    /// upload is finalized. A `Range` header that does not start at 0, or
    /// that cannot be parsed, is reported as [Error::UnknownResponse].
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id))]
    pub async fn get_remote_resume_index(&self) -> Result<u64> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes */*"));
        let request = PutRequest::new(self.url.as_str(), headers, Bytes::new());
        let response = self.transport.put(request).await?;
        let response = check_response(self.upload_ref(), response, &[RESUME_INCOMPLETE])?;
        let Some(persisted) = persisted_size(&response.headers) else {
            return Err(Error::UnknownResponse(Box::new(response)));
        };
        let index = persisted / self.config.chunk_size;
        tracing::debug!("the service persisted {persisted} bytes, next chunk is {index}");
        Ok(index)
    }

    /// Pauses the session.
    ///
    /// Chunk uploads started after this call wait for
    /// [unpause][Self::unpause]. Attempts already in flight continue.
    pub fn pause(&self) {
        tracing::info!("pausing upload {}", self.id);
        self.gate.pause();
    }

    /// Unpauses the session and releases all the waiting chunk uploads.
    pub fn unpause(&self) {
        let released = self.gate.unpause();
        tracing::info!("unpausing upload {}, released {released} chunk(s)", self.id);
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Removes the saved checksums for this upload.
    ///
    /// Does not interrupt chunk uploads in flight, they run to completion.
    pub fn cancel(&self) -> Result<()> {
        tracing::info!("cancelling upload {}", self.id);
        self.config.checksum_store.clear(&self.id)
    }

    /// Folds a chunk uploaded in a previous run into the checksum, and
    /// compares the result against the saved checksum for `index`.
    ///
    /// Use this for the chunks before the resume index, in order, so the
    /// checksums of the following chunks are correct. Fails with
    /// [Error::ChunkMismatch] if the data changed since it was uploaded.
    /// Chunks without a saved checksum are accepted.
    pub fn verify_chunk(&self, index: u64, chunk: &Bytes) -> Result<()> {
        let start = index * self.config.chunk_size;
        let actual = self
            .checksum
            .lock()
            .expect("checksum lock is poisoned")
            .update(start, chunk);
        let Some(actual) = actual else {
            tracing::warn!("chunk {index} does not follow the verified chunks, skipping it");
            return Ok(());
        };
        match self.config.checksum_store.get(&self.id, index)? {
            Some(expected) if expected != actual => Err(Error::ChunkMismatch {
                index,
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }

    async fn put_with_retry(&self, request: PutRequest, allowed: &'static [u16]) -> Result<()> {
        // Each attempt owns a copy of the request, so the attempt futures do
        // not borrow from the closure.
        retry_loop(
            move |attempt| self.put_attempt(attempt, request.clone(), allowed),
            async |d| tokio::time::sleep(d).await,
            self.retry_policy.as_ref(),
            self.backoff_policy.as_ref(),
        )
        .await
    }

    async fn put_attempt(
        &self,
        attempt: u32,
        request: PutRequest,
        allowed: &'static [u16],
    ) -> Result<()> {
        tracing::debug!("sending {} bytes, attempt {attempt}", request.body.len());
        let response = self.transport.put(request).await?;
        check_response(self.upload_ref(), response, allowed).map(|_| ())
    }

    fn upload_ref(&self) -> UploadRef<'_> {
        UploadRef {
            id: &self.id,
            url: &self.url,
        }
    }

    fn chunk_headers(&self, start: u64, end: u64) -> Result<HeaderMap> {
        let range = match (start == end, self.config.total_size) {
            // An empty chunk finalizes the upload at its offset.
            (true, total) => format!("bytes */{}", total.unwrap_or(start)),
            (false, Some(total)) => format!("bytes {start}-{}/{total}", end - 1),
            (false, None) => format!("bytes {start}-{}/*", end - 1),
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, self.content_type.clone());
        headers.insert(CONTENT_RANGE, header_value(range)?);
        Ok(headers)
    }

    fn progress_callback(&self, index: u64, start: u64, chunk_length: u64) -> Option<UploadProgress> {
        let on_progress = self.config.on_progress.clone()?;
        Some(Arc::new(move |sent| {
            on_progress(ChunkProgress {
                total_bytes: start + chunk_length,
                uploaded_bytes: start + sent,
                chunk_index: index,
                chunk_length,
            })
        }))
    }
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(Error::transport)
}

/// Returns the number of bytes persisted by the service.
fn persisted_size(headers: &HeaderMap) -> Option<u64> {
    let Some(range) = headers.get("range") else {
        // A missing `Range:` header indicates that no bytes are persisted.
        return Some(0_u64);
    };
    // Uploads are sequential, the persisted range always starts at zero.
    let end = std::str::from_utf8(range.as_bytes().strip_prefix(b"bytes=0-")?).ok()?;
    end.parse::<u64>().ok()?.checked_add(1)
}
