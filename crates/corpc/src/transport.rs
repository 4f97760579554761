//! Framed transport adapter
//!
//! Connection-oriented PDUs are self-delimiting via the `frag_length` header
//! field, so the adapter reads the 16-byte header first and then exactly the
//! remainder of the fragment. The underlying channel is assumed reliable and
//! ordered; everything else about it is the caller's business.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Result, RpcError};
use crate::pdu::PduHeader;

/// Maximum accepted fragment size (64 KB default)
pub const DEFAULT_MAX_PDU_SIZE: usize = 65536;

/// Reads and writes whole PDU fragments over a byte stream.
pub struct RpcTransport<T> {
    inner: T,
    max_pdu_size: usize,
}

impl<T> RpcTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
        }
    }

    pub fn with_max_pdu_size(mut self, max_size: usize) -> Self {
        self.max_pdu_size = max_size;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> RpcTransport<T> {
    /// Read one complete fragment.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let mut header = [0u8; PduHeader::SIZE];
        if let Err(err) = self.inner.read_exact(&mut header).await {
            return Err(if err.kind() == std::io::ErrorKind::UnexpectedEof {
                RpcError::ConnectionClosed
            } else {
                RpcError::Io(err)
            });
        }

        let parsed = PduHeader::parse(&header)?;
        let frag_length = parsed.frag_length as usize;
        if frag_length < PduHeader::SIZE {
            return Err(RpcError::MalformedPdu(format!(
                "fragment length {frag_length} smaller than header"
            )));
        }
        if frag_length > self.max_pdu_size {
            return Err(RpcError::PduTooLarge {
                size: frag_length,
                max: self.max_pdu_size,
            });
        }

        let mut frame = BytesMut::with_capacity(frag_length);
        frame.extend_from_slice(&header);
        frame.resize(frag_length, 0);
        if let Err(err) = self.inner.read_exact(&mut frame[PduHeader::SIZE..]).await {
            return Err(if err.kind() == std::io::ErrorKind::UnexpectedEof {
                RpcError::MalformedPdu(format!(
                    "connection closed inside a {frag_length}-byte fragment"
                ))
            } else {
                RpcError::Io(err)
            });
        }

        trace!(frag_length, packet_type = ?parsed.packet_type, "read frame");
        Ok(frame.freeze())
    }
}

impl<T: AsyncWrite + Unpin> RpcTransport<T> {
    /// Write one already-framed fragment.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        trace!(len = data.len(), "wrote frame");
        Ok(())
    }
}
