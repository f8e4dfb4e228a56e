//! Framed request/response exchange over a [`Transport`].

use std::time::Duration;

use appsec_proto::{Codec, Header, Request, Response, HEADER_SIZE};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::transport::Transport;

/// Initial capacity of the encode buffer.
const ENCODE_CAPACITY: usize = 4096;

/// Reads requests from and writes responses to one peer.
pub struct Broker<T> {
    transport: T,
    codec: Codec,
    body: Vec<u8>,
}

impl<T: Transport> Broker<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, Codec::with_capacity(ENCODE_CAPACITY))
    }

    /// Uses a codec with custom limits.
    #[must_use]
    pub fn with_codec(transport: T, codec: Codec) -> Self {
        Self {
            transport,
            codec,
            body: Vec::new(),
        }
    }

    /// Receives one request.
    ///
    /// `timeout` bounds the whole frame: the body read gets whatever the
    /// header read left of it.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Request, BrokerError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut header_buf = [0u8; HEADER_SIZE];
        let n = self.transport.recv(&mut header_buf, deadline).await?;
        if n == 0 && !deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BrokerError::Disconnected);
        }
        if n < HEADER_SIZE {
            return Err(BrokerError::Length {
                expected: HEADER_SIZE,
                received: n,
            });
        }

        let header = Header::decode(&header_buf)?;
        let size = header.body_size as usize;
        let max = self.codec.limits().max_body_size;
        if size > max {
            warn!(size, max, "Message body too large, discarding");
            let discarded = self.transport.discard(size, deadline).await?;
            if discarded < size {
                return Err(BrokerError::Length {
                    expected: size,
                    received: discarded,
                });
            }
            return Err(BrokerError::BodyTooLarge { size, max });
        }

        self.body.resize(size, 0);
        let n = self.transport.recv(&mut self.body, deadline).await?;
        if n < size {
            return Err(BrokerError::Length {
                expected: size,
                received: n,
            });
        }

        let request = self.codec.decode(&self.body)?;
        debug!(method = request.method(), size, "Request received");
        Ok(request)
    }

    /// Sends a batch of responses as one frame.
    ///
    /// Returns false, without writing, for an empty batch, and false when
    /// either the header or the body write comes up short.
    pub async fn send(&mut self, responses: &[Response]) -> bool {
        if responses.is_empty() {
            return false;
        }

        let frame = match self.codec.encode(responses) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode response");
                return false;
            }
        };
        let (header, body) = frame.split_at(HEADER_SIZE);

        for segment in [header, body] {
            match self.transport.send(segment).await {
                Ok(n) if n == segment.len() => {}
                Ok(n) => {
                    warn!(written = n, expected = segment.len(), "Short write");
                    return false;
                }
                Err(e) => {
                    debug!(error = %e, "Failed to write response");
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use appsec_proto::{ConfigSync, RequestInit, Value};
    use async_trait::async_trait;

    use super::*;

    /// Scripted transport recording every operation.
    #[derive(Default)]
    struct MockTransport {
        input: VecDeque<u8>,
        written: Vec<Vec<u8>>,
        discarded: Vec<usize>,
        short_write_at: Option<usize>,
    }

    impl MockTransport {
        fn with_input(bytes: &[u8]) -> Self {
            Self {
                input: bytes.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn recv(&mut self, buf: &mut [u8], _: Option<Instant>) -> io::Result<usize> {
            let n = buf.len().min(self.input.len());
            for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let index = self.written.len();
            self.written.push(buf.to_vec());
            if self.short_write_at == Some(index) {
                return Ok(buf.len() / 2);
            }
            Ok(buf.len())
        }

        async fn discard(&mut self, len: usize, _: Option<Instant>) -> io::Result<usize> {
            self.discarded.push(len);
            let n = len.min(self.input.len());
            self.input.drain(..n);
            Ok(n)
        }
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut bytes = Header::new(body.len() as u32).encode().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    fn request_frame(request: &Request) -> Vec<u8> {
        Codec::new().encode_request(request).unwrap().to_vec()
    }

    #[tokio::test]
    async fn receives_a_request() {
        let request = Request::RequestInit(RequestInit {
            data: [("server.request.query", Value::from("a"))].into_iter().collect(),
        });
        let mut broker = Broker::new(MockTransport::with_input(&request_frame(&request)));
        assert_eq!(broker.recv(None).await.unwrap(), request);
    }

    #[tokio::test]
    async fn empty_stream_is_a_disconnect() {
        let mut broker = Broker::new(MockTransport::default());
        assert!(matches!(
            broker.recv(None).await,
            Err(BrokerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn short_header_is_a_length_error() {
        let mut broker = Broker::new(MockTransport::with_input(b"dds\0"));
        assert!(matches!(
            broker.recv(None).await,
            Err(BrokerError::Length {
                expected: 8,
                received: 4
            })
        ));
    }

    #[tokio::test]
    async fn bad_magic_is_fatal() {
        let mut bytes = frame(&[0x90]);
        bytes[0] = b'x';
        let mut broker = Broker::new(MockTransport::with_input(&bytes));
        let err = broker.recv(None).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidHeader(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn oversized_body_is_discarded_and_stream_stays_framed() {
        let mut bytes = Header::new(70_000).encode().to_vec();
        bytes.extend(std::iter::repeat(0xc0).take(70_000));
        let follow_up = Request::ConfigSync(ConfigSync::default());
        bytes.extend(request_frame(&follow_up));

        let mut broker = Broker::new(MockTransport::with_input(&bytes));
        let err = broker.recv(None).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::BodyTooLarge {
                size: 70_000,
                max: 65_536
            }
        ));
        assert!(err.is_recoverable());
        assert_eq!(broker.transport.discarded, vec![70_000]);

        assert_eq!(broker.recv(None).await.unwrap(), follow_up);
    }

    #[tokio::test]
    async fn short_discard_is_fatal() {
        let mut bytes = Header::new(70_000).encode().to_vec();
        bytes.extend(std::iter::repeat(0).take(100));
        let mut broker = Broker::new(MockTransport::with_input(&bytes));
        let err = broker.recv(None).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Length {
                expected: 70_000,
                received: 100
            }
        ));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn short_body_is_a_length_error() {
        let mut bytes = Header::new(10).encode().to_vec();
        bytes.extend_from_slice(&[0x92, 0xa1]);
        let mut broker = Broker::new(MockTransport::with_input(&bytes));
        assert!(matches!(
            broker.recv(None).await,
            Err(BrokerError::Length {
                expected: 10,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn undecodable_body_is_recoverable() {
        // A top-level map instead of [method, payload].
        let mut bytes = frame(&[0x80]);
        bytes.extend(request_frame(&Request::ConfigSync(ConfigSync::default())));
        let mut broker = Broker::new(MockTransport::with_input(&bytes));

        let err = broker.recv(None).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(broker.recv(None).await.is_ok());
    }

    #[tokio::test]
    async fn send_writes_header_then_body() {
        let mut broker = Broker::new(MockTransport::default());
        assert!(broker.send(&[Response::ConfigFeatures { enabled: true }]).await);

        let written = &broker.transport.written;
        assert_eq!(written.len(), 2);
        assert_eq!(&written[0][..4], b"dds\0");
        let body_size = u32::from_le_bytes([written[0][4], written[0][5], written[0][6], written[0][7]]);
        assert_eq!(body_size as usize, written[1].len());

        let responses = Codec::new().decode_responses(&written[1]).unwrap();
        assert_eq!(responses, vec![Response::ConfigFeatures { enabled: true }]);
    }

    #[tokio::test]
    async fn empty_send_writes_nothing() {
        let mut broker = Broker::new(MockTransport::default());
        assert!(!broker.send(&[]).await);
        assert!(broker.transport.written.is_empty());
    }

    #[tokio::test]
    async fn short_write_fails_the_send() {
        let mut transport = MockTransport::default();
        transport.short_write_at = Some(1);
        let mut broker = Broker::new(transport);
        assert!(!broker.send(&[Response::Error]).await);
    }
}
