//! Streaming encryption and decryption adapters
//!
//! Both adapters pull from the wrapped reader chunk by chunk; content is
//! never buffered beyond one read chunk plus one cipher block.

use crate::cipher::{Decryptor, Encryptor};
use crate::envelope::BLOCK_SIZE;
use ferrobackup_types::{ContentStream, Error};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

const READ_CHUNK: usize = 64 * 1024;

/// Ciphertext ready to be handed out
#[derive(Default)]
struct Output {
    data: Vec<u8>,
    position: usize,
}

impl Output {
    fn is_drained(&self) -> bool {
        self.position >= self.data.len()
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let count = buf.remaining().min(self.data.len() - self.position);
        buf.put_slice(&self.data[self.position..self.position + count]);
        self.position += count;
    }

    fn replace(&mut self, data: Vec<u8>) {
        self.data = data;
        self.position = 0;
    }
}

/// Read up to one chunk from `inner`, `None` at end of stream
fn poll_chunk<R: AsyncRead + Unpin>(
    inner: &mut R,
    scratch: &mut [u8],
    cx: &mut Context<'_>,
) -> Poll<io::Result<Option<usize>>> {
    let mut read_buf = ReadBuf::new(scratch);
    ready!(Pin::new(inner).poll_read(cx, &mut read_buf))?;
    let read = read_buf.filled().len();
    Poll::Ready(Ok((read > 0).then_some(read)))
}

/// Encrypts the plaintext read from the wrapped reader
pub struct EncryptReader<R> {
    inner: R,
    encryptor: Option<Encryptor>,
    scratch: Vec<u8>,
    pending: Vec<u8>,
    output: Output,
    finished: bool,
}

impl<R: AsyncRead + Unpin> EncryptReader<R> {
    /// Wrap a plaintext reader
    pub fn new(inner: R, encryptor: Encryptor) -> Self {
        Self {
            inner,
            encryptor: Some(encryptor),
            scratch: vec![0; READ_CHUNK],
            pending: Vec::with_capacity(READ_CHUNK + BLOCK_SIZE),
            output: Output::default(),
            finished: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for EncryptReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.output.is_drained() {
                this.output.drain_into(buf);
                return Poll::Ready(Ok(()));
            }
            if this.finished || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            match ready!(poll_chunk(&mut this.inner, &mut this.scratch, cx))? {
                Some(read) => {
                    this.pending.extend_from_slice(&this.scratch[..read]);
                    let whole = this.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
                    let rest = this.pending.split_off(whole);
                    let mut blocks = std::mem::replace(&mut this.pending, rest);
                    if let Some(encryptor) = this.encryptor.as_mut() {
                        encryptor.encrypt_blocks(&mut blocks);
                    }
                    this.output.replace(blocks);
                }
                None => {
                    this.finished = true;
                    let last = std::mem::take(&mut this.pending);
                    if let Some(encryptor) = this.encryptor.take() {
                        this.output.replace(encryptor.finish(&last));
                    }
                }
            }
        }
    }
}

/// Decrypts the ciphertext read from the wrapped reader
///
/// The last block is held back until the end of the stream so its padding
/// can be checked and removed.
pub struct DecryptReader<R> {
    inner: R,
    decryptor: Option<Decryptor>,
    scratch: Vec<u8>,
    pending: Vec<u8>,
    output: Output,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DecryptReader<R> {
    /// Wrap a ciphertext reader positioned after the envelope
    pub fn new(inner: R, decryptor: Decryptor) -> Self {
        Self {
            inner,
            decryptor: Some(decryptor),
            scratch: vec![0; READ_CHUNK],
            pending: Vec::with_capacity(READ_CHUNK + BLOCK_SIZE),
            output: Output::default(),
            finished: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DecryptReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.output.is_drained() {
                this.output.drain_into(buf);
                return Poll::Ready(Ok(()));
            }
            if this.finished || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            match ready!(poll_chunk(&mut this.inner, &mut this.scratch, cx))? {
                Some(read) => {
                    this.pending.extend_from_slice(&this.scratch[..read]);
                    let mut whole = this.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
                    if whole == this.pending.len() {
                        whole = whole.saturating_sub(BLOCK_SIZE);
                    }
                    let rest = this.pending.split_off(whole);
                    let mut blocks = std::mem::replace(&mut this.pending, rest);
                    if let Some(decryptor) = this.decryptor.as_mut() {
                        decryptor.decrypt_blocks(&mut blocks);
                    }
                    this.output.replace(blocks);
                }
                None => {
                    this.finished = true;
                    let last = std::mem::take(&mut this.pending);
                    if last.len() != BLOCK_SIZE {
                        return Poll::Ready(Err(
                            Error::crypto("ciphertext is not a whole number of blocks").into()
                        ));
                    }
                    if let Some(decryptor) = this.decryptor.take() {
                        this.output.replace(decryptor.finish(&last).map_err(io::Error::from)?);
                    }
                }
            }
        }
    }
}

/// Reads several streams one after the other
///
/// Each source is dropped as soon as it is exhausted.
pub struct ConcatReader {
    sources: VecDeque<ContentStream>,
}

impl ConcatReader {
    /// Concatenate `sources` in order
    pub fn new(sources: impl IntoIterator<Item = ContentStream>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }
}

impl AsyncRead for ConcatReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        while let Some(current) = this.sources.front_mut() {
            let before = buf.filled().len();
            ready!(current.as_mut().poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
            this.sources.pop_front();
        }
        Poll::Ready(Ok(()))
    }
}
