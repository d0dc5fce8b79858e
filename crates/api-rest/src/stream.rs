//! Streaming archive bodies.
//!
//! The ZIP writer is synchronous, so it runs on the blocking pool and hands chunks to the
//! response body over a bounded channel. A full channel blocks the writer until the client
//! catches up. A dropped body (client gone) closes the channel, the next write fails with
//! `BrokenPipe`, and the archiver stops.

use axum::body::{Body, Bytes};
use futures_util::stream;
use redkit_core::redkit_files::{archive, ArchivePlan, FilesError, COPY_BUFFER_SIZE};
use std::io::{self, BufWriter, ErrorKind, Write};
use tokio::sync::mpsc;

/// Chunks buffered between the archiver and the response body.
const CHANNEL_CAPACITY: usize = 8;

/// Sync [`Write`] adapter feeding a response body channel.
pub(crate) struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelWriter {
    pub(crate) fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }

    /// Ends the body with an error so the connection is aborted instead of closed cleanly.
    fn fail(&self, error: &FilesError) {
        let _ = self
            .tx
            .blocking_send(Err(io::Error::new(ErrorKind::Other, error.to_string())));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "response body dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Starts writing `plan` as a ZIP and returns the body it streams into.
///
/// Must be called from within a tokio runtime.
pub(crate) fn zip_body(plan: ArchivePlan) -> Body {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let mut sink = BufWriter::with_capacity(COPY_BUFFER_SIZE, ChannelWriter::new(tx));
        match archive::write(&plan, &mut sink) {
            Ok(summary) => tracing::info!(
                "exported {} ({} entries, {} bytes)",
                plan.root().display(),
                summary.entries,
                summary.bytes
            ),
            Err(e) => {
                tracing::error!("export of {} failed: {}", plan.root().display(), e);
                // Buffered bytes belong to the aborted archive and are discarded.
                let (writer, _) = sink.into_parts();
                writer.fail(&e);
            }
        }
    });

    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}
