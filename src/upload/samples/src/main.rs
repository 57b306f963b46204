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

//! Upload a file to a resumable upload session.

mod args;

use anyhow::Result;
use args::Args;
use clap::Parser;
use resumable_upload::checksum_store::FileChecksumStore;
use resumable_upload::{UploadConfig, UploadSession};

const DESCRIPTION: &str = concat!(
    "This program uploads a file to an existing resumable upload session.",
    " The file is sent in chunks, and the checksum of each chunk is saved",
    " in a local directory. If the program is interrupted, running it again",
    " with the same arguments resumes the upload from the last chunk persisted",
    " by the service, after verifying the file has not changed."
);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    let _guard = enable_tracing(&args);
    tracing::info!("Configuration: {args:?}");

    let file = tokio::fs::File::open(&args.file).await?;
    let size = file.metadata().await?.len();
    let config = UploadConfig::default()
        .with_id(args.id())
        .with_url(&args.url)
        .with_chunk_size(args.chunk_size)
        .with_content_type(&args.content_type)
        .with_backoff_retry_limit(args.retry_limit)
        .with_backoff_delay(args.backoff)
        .with_total_size(size)
        .with_checksum_store(FileChecksumStore::new(args.checksum_dir()))
        .with_on_chunk_upload(move |p| {
            tracing::info!(
                "chunk {} uploaded, {}/{size} bytes",
                p.chunk_index,
                p.uploaded_bytes
            )
        });
    let session = UploadSession::new(config, false)?;

    if args.cancel {
        session.cancel()?;
        tracing::info!("discarded the saved state for {}", session.id());
        return Ok(());
    }

    let uploaded = session.upload_reader(file).await?;
    tracing::info!("DONE, read {uploaded} bytes from {}", args.file.display());
    Ok(())
}

fn enable_tracing(_args: &Args) -> tracing::dispatcher::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_default(subscriber)
}
