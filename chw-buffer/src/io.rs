//! # Socket Pumps
//!
//! Purpose: Move bytes between a `StagingBuffer` and tokio's `AsyncRead` /
//! `AsyncWrite` halves of a transport.
//!
//! ## Notes
//! - Inbound bytes are committed as soon as the socket hands them over; there
//!   is nothing speculative about received data.
//! - Outbound draining confirms exactly what the writer accepted, so a short
//!   write leaves the remainder readable for the next attempt.
//! - Neither pump is cancellation safe: dropping `write_to` mid-write may
//!   leave accepted bytes unconfirmed.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::staging::StagingBuffer;

impl StagingBuffer {
    /// Performs one read from `reader` into the buffer and commits it.
    ///
    /// Returns the number of bytes received; `0` means end of stream.
    pub async fn fill_from<R>(&mut self, reader: &mut R, size_hint: usize) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let region = self.get_writable_region(size_hint);
        let received = reader.read(region).await?;
        self.confirm_write(received)?;
        self.flush();
        Ok(received)
    }

    /// Writes every committed byte to `writer`, then flushes the writer.
    ///
    /// Returns the number of bytes written.
    pub async fn write_to<W>(&mut self, writer: &mut W) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0;
        loop {
            let chunk = self.read();
            if chunk.is_empty() {
                break;
            }
            let written = writer.write(chunk).await?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "transport accepted no bytes",
                ));
            }
            self.confirm_read(written)?;
            total += written;
        }
        writer.flush().await?;
        Ok(total)
    }
}
