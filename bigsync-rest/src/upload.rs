//! Chunked, resumable uploads of local files
//!
//! A transfer snapshots the source content when opened. Before every chunk the source
//! is re-validated: if it disappeared the transfer fails, if its stamp moved the
//! content is re-read and bookkeeping starts over. Offsets that were already sent
//! replay their recorded size, so re-sending a chunk never double-counts bytes.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bigsync_model::{ConnectionInfo, LocalFileStore, ResourcePath};

use crate::client::{RestClient, RestRequest};
use crate::errors::{RestError, RestFailure, Result};
use crate::method::Method;

pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;
pub const CONTENT_RANGE: &str = "Content-Range";

/// A byte range `start..start + len` of a `total`-byte file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub len: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn new(start: u64, len: u64, total: u64) -> Self {
        Self { start, len, total }
    }

    /// Inclusive last byte; an empty range reports its start
    pub fn end(&self) -> u64 {
        (self.start + self.len).saturating_sub(1).max(self.start)
    }

    /// Parse `bytes start-end/total`
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes")?.trim();
        let (span, total) = spec.split_once('/')?;
        let (start, end) = span.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        let total: u64 = total.trim().parse().ok()?;
        if end < start {
            return None;
        }
        Some(Self::new(start, end - start + 1, total))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end(), self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Uninitialized,
    Transferring,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
    pub state: TransferState,
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self {
            sent: 0,
            total: 0,
            state: TransferState::Uninitialized,
        }
    }
}

/// Cooperative cancellation, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub range: ByteRange,
    pub data: Bytes,
    pub single_shot: bool,
}

/// Bookkeeping of one upload
#[derive(Debug)]
pub struct TransferInfo {
    source: ResourcePath,
    content: Bytes,
    total: u64,
    remaining: u64,
    sent_chunks: HashMap<u64, u64>,
    stamp: i64,
    state: TransferState,
    error: Option<RestError>,
}

impl TransferInfo {
    pub fn new(source: ResourcePath) -> Self {
        Self {
            source,
            content: Bytes::new(),
            total: 0,
            remaining: 0,
            sent_chunks: HashMap::new(),
            stamp: 0,
            state: TransferState::Uninitialized,
            error: None,
        }
    }

    /// Snapshot the source and reset all bookkeeping
    pub fn open(&mut self, store: &dyn LocalFileStore) -> Result<()> {
        if !store.exists(&self.source) {
            return Err(RestError::Io(format!("{} does not exist", self.source)));
        }
        self.content = Bytes::from(store.read_all(&self.source)?);
        self.stamp = store.modification_stamp(&self.source)?;
        self.total = self.content.len() as u64;
        self.remaining = self.total;
        self.sent_chunks.clear();
        self.state = TransferState::Transferring;
        debug!("Opened {} for upload ({} bytes)", self.source, self.total);
        Ok(())
    }

    /// Make sure the snapshot still matches the source; reopen when it changed
    pub fn revalidate(&mut self, store: &dyn LocalFileStore) -> Result<()> {
        if self.state == TransferState::Uninitialized {
            return self.open(store);
        }
        if !store.exists(&self.source) {
            return Err(RestError::Io(format!("{} was removed during upload", self.source)));
        }
        let stamp = store.modification_stamp(&self.source)?;
        if stamp != self.stamp {
            info!("{} changed during upload, restarting", self.source);
            self.open(store)?;
        }
        Ok(())
    }

    /// Range the next chunk should cover, `None` when the whole file fits one request
    pub fn next_range(&self, max_chunk: u64) -> Option<ByteRange> {
        if self.total <= max_chunk {
            return None;
        }
        let start = self.total - self.remaining;
        Some(ByteRange::new(start, self.remaining.min(max_chunk), self.total))
    }

    /// Cut the chunk for `requested`. An offset that was already sent replays its
    /// recorded size and leaves `remaining` untouched.
    pub fn take_chunk(&mut self, requested: Option<ByteRange>, max_chunk: u64) -> Result<Chunk> {
        let (range, single_shot) = match requested {
            None => (ByteRange::new(0, self.total.min(max_chunk), self.total), true),
            Some(range) => {
                if range.len > max_chunk {
                    return Err(RestError::Protocol {
                        status: 416,
                        message: format!(
                            "requested chunk of {} bytes exceeds the maximum of {}",
                            range.len, max_chunk
                        ),
                    });
                }
                match self.sent_chunks.get(&range.start) {
                    Some(&recorded) => (ByteRange::new(range.start, recorded, self.total), false),
                    None => {
                        self.sent_chunks.insert(range.start, range.len);
                        self.remaining = self.remaining.saturating_sub(range.len);
                        (ByteRange::new(range.start, range.len, self.total), false)
                    }
                }
            }
        };

        let end = range.start + range.len;
        if end > self.total {
            return Err(RestError::Protocol {
                status: 416,
                message: format!("range {} is outside of {} bytes", range, self.total),
            });
        }
        Ok(Chunk {
            range,
            data: self.content.slice(range.start as usize..end as usize),
            single_shot,
        })
    }

    /// Record a delivered chunk
    pub fn acknowledge(&mut self, chunk: &Chunk) {
        if chunk.single_shot || self.remaining == 0 {
            self.state = TransferState::Complete;
            self.content = Bytes::new();
        }
    }

    pub fn fail(&mut self, error: RestError) {
        self.state = TransferState::Failed;
        self.error = Some(error);
        self.content = Bytes::new();
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn error(&self) -> Option<&RestError> {
        self.error.as_ref()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn progress(&self) -> UploadProgress {
        let sent = match self.state {
            TransferState::Complete => self.total,
            _ => self.total - self.remaining,
        };
        UploadProgress {
            sent,
            total: self.total,
            state: self.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub bytes: u64,
    pub chunks: usize,
}

#[derive(Clone)]
pub struct ChunkedUploader {
    client: RestClient,
    store: Arc<dyn LocalFileStore>,
    max_chunk: u64,
}

impl ChunkedUploader {
    pub fn new(client: RestClient, store: Arc<dyn LocalFileStore>, max_chunk: u64) -> Self {
        Self {
            client,
            store,
            max_chunk: max_chunk.max(1),
        }
    }

    pub fn max_chunk(&self) -> u64 {
        self.max_chunk
    }

    /// Upload `source` to `uri` chunk by chunk. Progress (including the terminal state)
    /// is published on `progress` when given.
    pub async fn upload(
        &self,
        connection: &ConnectionInfo,
        method: Method,
        uri: &str,
        source: &ResourcePath,
        progress: Option<&watch::Sender<UploadProgress>>,
        cancel: &CancelFlag,
    ) -> std::result::Result<UploadSummary, RestFailure> {
        let mut info = TransferInfo::new(source.clone());
        let mut chunks = 0;

        loop {
            match self.next(&mut info, connection, method, uri, cancel).await {
                Ok(()) => {
                    chunks += 1;
                    publish(progress, &info);
                    if info.state() == TransferState::Complete {
                        info!("Uploaded {} ({} bytes, {} chunks)", source, info.total(), chunks);
                        return Ok(UploadSummary {
                            bytes: info.total(),
                            chunks,
                        });
                    }
                }
                Err(failure) => {
                    match failure.error {
                        RestError::Cancelled => info!("Upload of {} cancelled", source),
                        ref error => warn!("Upload of {} failed: {}", source, error),
                    }
                    info.fail(failure.error.clone());
                    publish(progress, &info);
                    return Err(failure);
                }
            }
        }
    }

    async fn next(
        &self,
        info: &mut TransferInfo,
        connection: &ConnectionInfo,
        method: Method,
        uri: &str,
        cancel: &CancelFlag,
    ) -> std::result::Result<(), RestFailure> {
        let local = |error: RestError| RestFailure::new(error, method, uri);
        if cancel.is_cancelled() {
            return Err(local(RestError::Cancelled));
        }
        info.revalidate(self.store.as_ref()).map_err(local)?;
        let requested = info.next_range(self.max_chunk);
        let chunk = info.take_chunk(requested, self.max_chunk).map_err(local)?;

        debug!("Sending {} of {}", chunk.range, info.source);
        let request = RestRequest::octets(method, uri, chunk.data.clone())
            .header(CONTENT_RANGE, chunk.range.to_string());
        self.client.send(connection, request).await?;
        info.acknowledge(&chunk);
        Ok(())
    }
}

fn publish(progress: Option<&watch::Sender<UploadProgress>>, info: &TransferInfo) {
    if let Some(sender) = progress {
        sender.send_replace(info.progress());
    }
}
