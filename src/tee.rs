//! Fan-out writer for serving and persisting a body at the same time
//!
//! Every chunk goes to the client body channel and, while it stays healthy,
//! to the cache file. A failing file is dropped and remembered; the client
//! keeps receiving bytes. A client that went away ends the copy.

use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use hyper::body::Frame;
use std::io;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Sending half of a streamed client response body
pub type ClientSender = mpsc::Sender<io::Result<Frame<Bytes>>>;

/// Receiving half of a streamed client response body
pub type ClientReceiver = mpsc::Receiver<io::Result<Frame<Bytes>>>;

/// Number of chunks buffered between the copy task and the client connection
pub const CLIENT_CHANNEL_CAPACITY: usize = 16;

/// Create a client body channel
pub fn client_channel() -> (ClientSender, ClientReceiver) {
    mpsc::channel(CLIENT_CHANNEL_CAPACITY)
}

/// The client stopped reading the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientGone;

/// Result of a completed tee copy
#[derive(Debug)]
pub struct TeeSummary {
    /// Bytes delivered to the client
    pub bytes: u64,
    /// Whether every byte also reached the file and the file was flushed
    pub stored: Result<(), io::Error>,
}

/// Duplicates body chunks into the client channel and an optional file
pub struct TeeWriter<'a> {
    client: &'a mut ClientSender,
    file: Option<File>,
    store_error: Option<io::Error>,
    bytes: u64,
}

impl<'a> TeeWriter<'a> {
    /// Create a tee; `file` is `None` when the cache file could not be created
    pub fn new(client: &'a mut ClientSender, file: Option<File>) -> Self {
        let store_error = if file.is_none() {
            Some(io::Error::new(io::ErrorKind::Other, "no cache file"))
        } else {
            None
        };
        TeeWriter {
            client,
            file,
            store_error,
            bytes: 0,
        }
    }

    /// Write one chunk to both sinks
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), ClientGone> {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(&chunk).await {
                warn!("Cache file write failed, continuing without caching: {}", e);
                self.store_error = Some(e);
                self.file = None;
            }
        }

        let len = chunk.len() as u64;
        self.client
            .send(Ok(Frame::data(chunk)))
            .await
            .map_err(|_| ClientGone)?;
        self.bytes += len;
        Ok(())
    }

    /// Abort the client response with an error
    ///
    /// The connection is reset instead of ending cleanly, so the client can
    /// tell a truncated body from a complete one.
    pub async fn abort(&mut self, err: io::Error) {
        self.file = None;
        let _ = self.client.send(Err(err)).await;
    }

    /// Flush the file and report what was delivered and stored
    pub async fn finish(mut self) -> TeeSummary {
        let stored = match (self.file.take(), self.store_error.take()) {
            (Some(mut file), None) => match file.flush().await {
                Ok(()) => file.sync_all().await,
                Err(e) => Err(e),
            },
            (_, Some(e)) => Err(e),
            (None, None) => Err(io::Error::new(io::ErrorKind::Other, "no cache file")),
        };

        TeeSummary {
            bytes: self.bytes,
            stored,
        }
    }
}
