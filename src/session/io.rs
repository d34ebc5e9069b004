//! Sequenced packet transport over a plain or TLS stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::protocol::packet::split_payload;
use crate::protocol::{Packet, PacketCodec};

use super::SessionError;

/// Byte stream a session can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Replays bytes read ahead of a TLS upgrade before reading the socket
struct Rewind<S> {
    prefix: Option<Bytes>,
    inner: S,
}

impl<S> Rewind<S> {
    fn new(inner: S, prefix: Bytes) -> Self {
        let prefix = (!prefix.is_empty()).then_some(prefix);
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if let Some(mut prefix) = self.prefix.take() {
            let n = prefix.len().min(buf.remaining());
            buf.put_slice(&prefix.split_to(n));
            if !prefix.is_empty() {
                self.prefix = Some(prefix);
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Logical packets in, logical packets out.
///
/// One counter covers both directions: every frame read must carry the
/// expected sequence id and every frame written takes the next one. The
/// counter is reset to zero before each command.
pub struct PacketStream {
    framed: Framed<Box<dyn AsyncStream>, PacketCodec>,
    sequence: u8,
}

impl PacketStream {
    pub fn new<S: AsyncStream + 'static>(stream: S) -> Self {
        let stream: Box<dyn AsyncStream> = Box::new(stream);
        Self {
            framed: Framed::new(stream, PacketCodec),
            sequence: 0,
        }
    }

    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Next logical payload, reassembled from continuation frames.
    /// `None` when the peer closed between packets.
    pub async fn read(&mut self) -> Result<Option<Bytes>, SessionError> {
        let mut assembled: Option<BytesMut> = None;

        loop {
            let packet = match self.framed.next().await {
                Some(packet) => packet?,
                None if assembled.is_some() => return Err(SessionError::ClientDisconnected),
                None => return Ok(None),
            };

            if packet.sequence_id != self.sequence {
                return Err(SessionError::Protocol(format!(
                    "packets out of order: expected sequence {}, got {}",
                    self.sequence, packet.sequence_id
                )));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let continued = packet.is_continued();
            match assembled.as_mut() {
                Some(buf) => buf.extend_from_slice(&packet.payload),
                None if !continued => return Ok(Some(packet.payload)),
                None => assembled = Some(BytesMut::from(&packet.payload[..])),
            }
            if !continued {
                return Ok(assembled.map(BytesMut::freeze));
            }
        }
    }

    /// Queue one logical payload without flushing
    async fn feed(&mut self, payload: Bytes) -> Result<(), SessionError> {
        for chunk in split_payload(payload) {
            let packet = Packet::new(self.sequence, chunk);
            self.sequence = self.sequence.wrapping_add(1);
            self.framed.feed(packet).await?;
        }
        Ok(())
    }

    pub async fn write(&mut self, payload: Bytes) -> Result<(), SessionError> {
        self.feed(payload).await?;
        self.framed.flush().await?;
        Ok(())
    }

    /// Write several payloads as one response, flushed once
    pub async fn write_group(&mut self, payloads: Vec<Bytes>) -> Result<(), SessionError> {
        for payload in payloads {
            self.feed(payload).await?;
        }
        self.framed.flush().await?;
        Ok(())
    }

    /// Switch to TLS in place. Bytes already buffered are replayed into the
    /// TLS handshake and the sequence counter carries over.
    pub async fn upgrade_tls(self, acceptor: &TlsAcceptor) -> Result<Self, SessionError> {
        let sequence = self.sequence;
        let parts = self.framed.into_parts();
        let stream = Rewind::new(parts.io, parts.read_buf.freeze());

        let tls = acceptor
            .accept(stream)
            .await
            .map_err(|e| SessionError::Tls(e.to_string()))?;
        debug!("TLS handshake completed");

        let mut upgraded = Self::new(tls);
        upgraded.sequence = sequence;
        Ok(upgraded)
    }
}
