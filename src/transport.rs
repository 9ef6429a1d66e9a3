//! Transport capability and the TCP implementation used by the default factory

use crate::config::TransportConfig;
use crate::errors::TransportError;

use async_trait::async_trait;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::TcpStream;
use tracing::trace;

/// An opaque connection to the RPC endpoint.
///
/// The pool never reads or writes payloads; it only opens, closes and asks
/// whether the transport is still usable.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the connection. Opening an open transport is a no-op.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Tear the connection down. Closing a closed transport is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Cheap, non-blocking check of whether the transport can still be used
    fn is_open(&self) -> bool;
}

/// Buffered TCP transport with length-prefixed framing.
///
/// Frames are a 4-byte big-endian length followed by the payload. Any I/O
/// failure or timeout drops the socket, so [`is_open`](Transport::is_open)
/// reports `false` and the pool discards the connection on return.
pub struct TcpTransport {
    config: Arc<TransportConfig>,
    stream: Option<BufStream<TcpStream>>,
}

impl TcpTransport {
    /// Create an unopened transport
    pub fn new(config: Arc<TransportConfig>) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Raw stream access for RPC codecs with their own framing
    pub fn stream_mut(&mut self) -> Option<&mut BufStream<TcpStream>> {
        self.stream.as_mut()
    }

    /// Write one frame, applying the socket timeout
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let max = self.config.max_frame_size;
        if payload.len() > max {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max,
            });
        }
        let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
            size: payload.len(),
            max,
        })?;

        let timeout = self.config.socket_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let result = match tokio::time::timeout(timeout, async {
            stream.write_u32(len).await?;
            stream.write_all(payload).await?;
            stream.flush().await
        })
        .await
        {
            Ok(written) => written.map_err(TransportError::from),
            Err(_) => Err(TransportError::SocketTimeout(timeout)),
        };

        if result.is_err() {
            self.stream = None;
        }
        result
    }

    /// Read one frame, applying the socket timeout and frame size limit
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let max = self.config.max_frame_size;
        let timeout = self.config.socket_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let result = match tokio::time::timeout(timeout, async {
            let size = stream.read_u32().await? as usize;
            if size > max {
                return Err(TransportError::FrameTooLarge { size, max });
            }
            let mut payload = vec![0u8; size];
            stream.read_exact(&mut payload).await?;
            Ok::<_, TransportError>(payload)
        })
        .await
        {
            Ok(read) => read,
            Err(_) => Err(TransportError::SocketTimeout(timeout)),
        };

        // a partial or oversized frame leaves the stream out of sync
        if result.is_err() {
            self.stream = None;
        }
        result
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let timeout = self.config.connect_timeout;
        let socket = tokio::time::timeout(timeout, TcpStream::connect(self.config.address.as_str()))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: self.config.address.clone(),
                timeout,
            })??;
        socket.set_nodelay(self.config.nodelay)?;

        let size = self.config.buffer_size;
        self.stream = Some(BufStream::with_capacity(size, size, socket));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.take() {
            Some(mut stream) => {
                stream.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Peeks the socket without blocking: EOF or a socket error means the
    /// peer is gone even though no I/O has failed yet.
    fn is_open(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        let mut probe = [0u8; 1];
        let mut buf = ReadBuf::new(&mut probe);
        let mut cx = Context::from_waker(Waker::noop());
        match stream.get_ref().poll_peek(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(e)) => {
                trace!(address = %self.config.address, "socket check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_frame_echo() {
        let address = echo_server().await;
        let mut transport = TcpTransport::new(Arc::new(TransportConfig::new(address)));

        assert!(!transport.is_open());
        transport.open().await.unwrap();
        assert!(transport.is_open());

        transport.write_frame(b"ping").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap(), b"ping");

        transport.close().await.unwrap();
        assert!(!transport.is_open());
        // closing twice is fine
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut transport = TcpTransport::new(Arc::new(TransportConfig::new(address)));
        assert!(transport.open().await.is_err());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let address = echo_server().await;
        let config = TransportConfig::new(address).with_max_frame_size(4);
        let mut transport = TcpTransport::new(Arc::new(config));
        transport.open().await.unwrap();

        let result = transport.write_frame(b"too long").await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { size: 8, max: 4 })));
        // rejected before touching the socket
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_peer_hangup_reports_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let mut transport = TcpTransport::new(Arc::new(TransportConfig::new(address)));
        transport.open().await.unwrap();

        let (socket, _) = listener.accept().await.unwrap();
        assert!(transport.is_open());

        drop(socket);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_write_on_unopened_transport() {
        let mut transport = TcpTransport::new(Arc::new(TransportConfig::new("127.0.0.1:1")));
        assert!(matches!(
            transport.write_frame(b"x").await,
            Err(TransportError::NotOpen)
        ));
    }
}
