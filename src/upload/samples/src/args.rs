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

use anyhow::bail;
use clap::Parser;
use humantime::parse_duration;
use resumable_upload::MIN_CHUNK_SIZE;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for the upload.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = super::DESCRIPTION)]
pub struct Args {
    /// The resumable upload session URL.
    ///
    /// Create the session with the service before running this program. The
    /// same URL is used to resume the upload.
    #[arg(long)]
    pub url: String,

    /// Identifies the upload in the checksum directory.
    ///
    /// Defaults to the file path.
    #[arg(long)]
    pub id: Option<String>,

    /// The size of each chunk, must be a multiple of 256KiB.
    #[arg(long, value_parser = parse_size_arg, default_value = "256KiB")]
    pub chunk_size: u64,

    /// The content type of the object.
    #[arg(long, default_value = "application/octet-stream")]
    pub content_type: String,

    /// The number of retries for each chunk.
    #[arg(long, default_value_t = 5)]
    pub retry_limit: u32,

    /// The delay between attempts.
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub backoff: Duration,

    /// Where the chunk checksums are saved between runs.
    ///
    /// Defaults to a `resumable-upload` directory in the system temporary
    /// directory.
    #[arg(long)]
    pub checksum_dir: Option<PathBuf>,

    /// Discard the saved checksums for this upload and exit.
    #[arg(long, default_value_t = false)]
    pub cancel: bool,

    /// The file to upload.
    pub file: PathBuf,
}

impl Args {
    /// Validates the arguments after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 || self.chunk_size % MIN_CHUNK_SIZE != 0 {
            bail!(
                "invalid chunk-size ({}), must be a positive multiple of {MIN_CHUNK_SIZE}",
                self.chunk_size
            )
        }
        if self.url.is_empty() {
            bail!("the url must be non-empty")
        }
        Ok(())
    }

    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.file.display().to_string())
    }

    pub fn checksum_dir(&self) -> PathBuf {
        self.checksum_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("resumable-upload"))
    }
}

fn parse_size_arg(arg: &str) -> anyhow::Result<u64> {
    Ok(parse_size::parse_size(arg)?)
}
