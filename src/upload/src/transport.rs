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

//! The HTTP transport used by upload sessions.
//!
//! The session only needs to issue `PUT` requests and inspect the status,
//! headers, and body of the response. Applications can replace the default
//! [ReqwestTransport] with any implementation of [Transport], for example, to
//! add authentication headers or to route requests through a proxy.

use crate::{Error, Result};
use bytes::Bytes;
use http::HeaderMap;
use std::sync::Arc;

/// Receives the number of bytes sent so far for the current request.
pub type UploadProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// The transport contract for upload sessions.
///
/// Implementations must return a [Response] for any HTTP status code,
/// including 3xx, 4xx, and 5xx. Only failures that prevent receiving a
/// response (connection errors, timeouts) should be reported as errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Sends a `PUT` request.
    async fn put(&self, request: PutRequest) -> Result<Response>;
}

/// A `PUT` request issued by the upload session.
#[derive(Clone)]
pub struct PutRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub on_upload_progress: Option<UploadProgress>,
}

impl PutRequest {
    pub fn new<U: Into<String>>(url: U, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url: url.into(),
            headers,
            body,
            on_upload_progress: None,
        }
    }

    pub fn with_upload_progress(mut self, v: UploadProgress) -> Self {
        self.on_upload_progress = Some(v);
        self
    }

    /// Reports progress, if the caller registered a callback.
    pub fn report_progress(&self, sent: u64) {
        if let Some(callback) = &self.on_upload_progress {
            callback(sent);
        }
    }
}

// The body can be large, just print its length.
impl std::fmt::Debug for PutRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutRequest")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body.len()", &self.body.len())
            .field(
                "on_upload_progress",
                &self.on_upload_progress.as_ref().map(|_| "[callback]"),
            )
            .finish()
    }
}

/// The response to a `PUT` request, for any status code.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with the given status, and no headers or body.
    pub fn with_status(status: u16) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }
}

/// The size of each slice in the streamed request body.
///
/// Progress callbacks fire once per slice.
const PROGRESS_SLICE: usize = 64 * 1024;

/// A [Transport] implemented with [reqwest].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default [reqwest::Client].
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(Error::transport)?;
        Ok(Self { client })
    }

    /// Creates a transport using an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn body(request: &PutRequest) -> reqwest::Body {
        if request.body.is_empty() || request.on_upload_progress.is_none() {
            return reqwest::Body::from(request.body.clone());
        }
        let slices = split(request.body.clone(), PROGRESS_SLICE);
        let progress = request.on_upload_progress.clone();
        let stream = futures::stream::iter(slices.into_iter().scan(0_u64, move |sent, b| {
            *sent += b.len() as u64;
            if let Some(callback) = &progress {
                callback(*sent);
            }
            Some(Ok::<Bytes, std::io::Error>(b))
        }));
        reqwest::Body::wrap_stream(stream)
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn put(&self, request: PutRequest) -> Result<Response> {
        let body = Self::body(&request);
        let response = self
            .client
            .request(reqwest::Method::PUT, &request.url)
            .headers(request.headers.clone())
            .header(http::header::CONTENT_LENGTH, request.body.len())
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::transport)?;
        Ok(Response::new(status, headers, body))
    }
}

fn split(mut data: Bytes, size: usize) -> Vec<Bytes> {
    let mut slices = Vec::with_capacity(data.len().div_ceil(size));
    while data.len() > size {
        let rest = data.split_off(size);
        slices.push(data);
        data = rest;
    }
    slices.push(data);
    slices
}
