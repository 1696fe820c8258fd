//! Copy progress reporting

use crate::events::{BackupObserver, CopyProgress, EntryPath};
use ferrobackup_types::{ContentStream, Entry};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Reader that reports copy progress for every chunk read from the source
pub struct ProgressReader {
    inner: ContentStream,
    observer: Arc<dyn BackupObserver>,
    path: EntryPath,
    source: Entry,
    target: Entry,
    length: i64,
    position: u64,
}

impl ProgressReader {
    /// Wrap a source stream
    pub fn new(
        inner: ContentStream,
        observer: Arc<dyn BackupObserver>,
        path: EntryPath,
        source: Entry,
        target: Entry,
        length: i64,
    ) -> Self {
        Self {
            inner,
            observer,
            path,
            source,
            target,
            length,
            position: 0,
        }
    }

    /// Bytes read so far
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl AsyncRead for ProgressReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match this.inner.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                if read > 0 {
                    this.position += read as u64;
                    this.observer.on_copying(&CopyProgress {
                        path: this.path.clone(),
                        source: this.source.clone(),
                        target: this.target.clone(),
                        position: this.position,
                        length: this.length,
                    });
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
