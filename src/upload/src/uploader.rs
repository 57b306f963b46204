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

use crate::{Error, Result, UploadSession};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

impl UploadSession {
    /// Uploads all the data in `reader`, resuming a previous upload if
    /// possible.
    ///
    /// If the checksum store has checksums for this upload, the service is
    /// queried for the resume index. The chunks before that index are read
    /// and compared against the saved checksums, any difference fails the
    /// upload with [Error::ChunkMismatch]. The remaining chunks are uploaded
    /// in order. Unless the last chunk reaches the configured size, the
    /// upload is [finalized][UploadSession::finalize] once `reader` is
    /// exhausted.
    ///
    /// On success the saved checksums are removed, and the function returns
    /// the number of bytes read.
    ///
    /// # Example
    /// ```no_run
    /// # use resumable_upload::{UploadConfig, UploadSession};
    /// # async fn sample(url: &str) -> anyhow::Result<()> {
    /// let file = tokio::fs::File::open("data.bin").await?;
    /// let size = file.metadata().await?.len();
    /// let config = UploadConfig::default()
    ///     .with_id("data.bin")
    ///     .with_url(url)
    ///     .with_total_size(size);
    /// let session = UploadSession::new(config, false)?;
    /// session.upload_reader(file).await?;
    /// # Ok(()) }
    /// ```
    #[tracing::instrument(level = "debug", skip(self, reader), fields(id = %self.id()))]
    pub async fn upload_reader<R>(&self, mut reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let resume_index = match self.start_index().await {
            Err(Error::FileAlreadyUploaded { .. }) => {
                tracing::info!("upload {} is already complete", self.id());
                self.config().checksum_store().clear(self.id())?;
                return Ok(0);
            }
            r => r?,
        };
        if resume_index != 0 {
            tracing::info!("resuming upload {} at chunk {resume_index}", self.id());
        }

        let chunk_size = self.config().chunk_size();
        let mut index = 0_u64;
        let mut offset = 0_u64;
        let mut finalized = false;
        loop {
            let chunk = read_chunk(&mut reader, chunk_size).await?;
            let length = chunk.len() as u64;
            if length == 0 {
                break;
            }
            if index < resume_index {
                self.verify_chunk(index, &chunk)?;
            } else {
                self.upload_chunk(index, chunk).await?;
                // The chunk that reaches the configured size finalizes the
                // upload.
                finalized = self.config().total_size() == Some(offset + length);
            }
            offset += length;
            index += 1;
            if length < chunk_size {
                break;
            }
        }

        if !finalized {
            self.finalize(offset).await?;
        }
        tracing::info!("upload {} complete, {offset} bytes", self.id());
        self.config().checksum_store().clear(self.id())?;
        Ok(offset)
    }

    async fn start_index(&self) -> Result<u64> {
        match self.config().checksum_store().load(self.id())? {
            Some(r) if !r.checksums.is_empty() => self.get_remote_resume_index().await,
            _ => Ok(0),
        }
    }
}

/// Reads up to `chunk_size` bytes. Returns fewer bytes only at the end of
/// the data.
async fn read_chunk<R>(reader: &mut R, chunk_size: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(chunk_size as usize);
    (&mut *reader)
        .take(chunk_size)
        .read_to_end(&mut buffer)
        .await
        .map_err(Error::Read)?;
    Ok(Bytes::from(buffer))
}
