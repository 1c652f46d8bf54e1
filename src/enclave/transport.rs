// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Length-framed transport to the enclave.
//!
//! Each frame is a little-endian `u32` length followed by that many payload
//! bytes. One connection carries exactly one request frame and one response
//! frame, so frames from different requests never interleave.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_vsock::VsockStream;

use super::address::EndpointAddress;
use super::protocol::{EnclaveRequest, EnclaveResponse};
use super::EnclaveError;

/// Largest frame accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Opens byte streams to enclave endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self, address: EndpointAddress) -> Result<Self::Stream, EnclaveError>;
}

/// Connects over `AF_VSOCK`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VsockConnector;

#[async_trait]
impl Connector for VsockConnector {
    type Stream = VsockStream;

    async fn connect(&self, address: EndpointAddress) -> Result<Self::Stream, EnclaveError> {
        VsockStream::connect(address.into())
            .await
            .map_err(|e| EnclaveError::transport(&format!("connect to {address}"), e))
    }
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), EnclaveError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        EnclaveError::TransportError(format!("frame of {} bytes is too large", payload.len()))
    })?;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| EnclaveError::transport("write length prefix", e))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| EnclaveError::transport("write payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| EnclaveError::transport("flush", e))
}

/// Read one frame, rejecting lengths above `max_len` before allocating.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, EnclaveError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    read_full(reader, &mut prefix, "length prefix").await?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(EnclaveError::TransportError(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload, "payload").await?;
    Ok(payload)
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), EnclaveError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| EnclaveError::transport(&format!("read {what}"), e))?;
        if n == 0 {
            return Err(EnclaveError::TransportError(format!(
                "connection closed after {filled} of {} {what} bytes",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(())
}

/// Request/response over one framed connection per call.
#[derive(Debug, Clone)]
pub struct FramedTransport<C = VsockConnector> {
    connector: C,
    max_frame_len: usize,
}

impl Default for FramedTransport<VsockConnector> {
    fn default() -> Self {
        Self::new(VsockConnector)
    }
}

impl<C: Connector> FramedTransport<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Send `payload` to `address` and return the response frame.
    pub async fn send(
        &self,
        address: EndpointAddress,
        payload: &[u8],
    ) -> Result<Vec<u8>, EnclaveError> {
        let mut stream = self.connector.connect(address).await?;
        write_frame(&mut stream, payload).await?;
        read_frame(&mut stream, self.max_frame_len).await
    }

    /// Send an envelope and decode the reply, checking the request id.
    pub async fn request(
        &self,
        address: EndpointAddress,
        request: &EnclaveRequest,
    ) -> Result<EnclaveResponse, EnclaveError> {
        let reply = self.send(address, &request.encode()?).await?;
        let response = EnclaveResponse::decode(&reply)?;
        if response.request_id != request.request_id {
            return Err(EnclaveError::ProtocolError(format!(
                "response id {} does not match request {}",
                response.request_id, request.request_id
            )));
        }
        Ok(response)
    }
}

/// In-memory enclave endpoint for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::io::DuplexStream;

    use super::*;

    /// What the fake enclave does with a received frame.
    pub(crate) enum Reply {
        Frame(Vec<u8>),
        /// Bytes written as-is, without framing.
        Raw(Vec<u8>),
        /// Keep the connection open and never answer.
        Hang,
    }

    type Handler = dyn Fn(Vec<u8>) -> Reply + Send + Sync;

    /// Connector whose peer is a task running `handler` over a duplex pipe.
    #[derive(Clone)]
    pub(crate) struct DuplexConnector {
        handler: Arc<Handler>,
        buffer_size: usize,
        pub(crate) connects: Arc<AtomicUsize>,
        pub(crate) addresses: Arc<Mutex<Vec<EndpointAddress>>>,
    }

    impl DuplexConnector {
        pub(crate) fn new(handler: impl Fn(Vec<u8>) -> Reply + Send + Sync + 'static) -> Self {
            Self {
                handler: Arc::new(handler),
                buffer_size: 64 * 1024,
                connects: Arc::new(AtomicUsize::new(0)),
                addresses: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Enclave that answers every request through `respond`.
        pub(crate) fn responding(
            respond: impl Fn(EnclaveRequest) -> EnclaveResponse + Send + Sync + 'static,
        ) -> Self {
            Self::new(move |frame| {
                let request = EnclaveRequest::decode(&frame).unwrap();
                Reply::Frame(respond(request).encode().unwrap())
            })
        }

        pub(crate) fn with_buffer_size(mut self, buffer_size: usize) -> Self {
            self.buffer_size = buffer_size;
            self
        }

        pub(crate) fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self, address: EndpointAddress) -> Result<Self::Stream, EnclaveError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.addresses.lock().unwrap().push(address);

            let (client, mut server) = tokio::io::duplex(self.buffer_size);
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let Ok(frame) = read_frame(&mut server, DEFAULT_MAX_FRAME_LEN).await else {
                    return;
                };
                match handler(frame) {
                    Reply::Frame(bytes) => {
                        let _ = write_frame(&mut server, &bytes).await;
                    }
                    Reply::Raw(bytes) => {
                        let _ = server.write_all(&bytes).await;
                    }
                    Reply::Hang => {
                        std::future::pending::<()>().await;
                    }
                }
            });
            Ok(client)
        }
    }

    /// Connector that always fails.
    pub(crate) struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        type Stream = DuplexStream;

        async fn connect(&self, address: EndpointAddress) -> Result<Self::Stream, EnclaveError> {
            Err(EnclaveError::TransportError(format!("connection refused by {address}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{DuplexConnector, RefusingConnector, Reply};
    use super::*;

    const ADDRESS: EndpointAddress = EndpointAddress {
        context_id: 3,
        port: 5005,
    };

    #[tokio::test]
    async fn frame_has_little_endian_length_prefix() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc").await.unwrap();
        assert_eq!(wire, [3, 0, 0, 0, b'a', b'b', b'c']);

        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader, 16).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn empty_frame() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"").await.unwrap();
        let mut reader = wire.as_slice();
        assert!(read_frame(&mut reader, 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_read_reports_progress() {
        let mut wire = 10u32.to_le_bytes().to_vec();
        wire.extend_from_slice(b"1234");
        let mut reader = wire.as_slice();
        let err = read_frame(&mut reader, 16).await.unwrap_err();
        assert!(err.to_string().contains("after 4 of 10 payload bytes"), "{err}");

        let mut truncated_prefix: &[u8] = &[1, 0];
        let err = read_frame(&mut truncated_prefix, 16).await.unwrap_err();
        assert!(err.to_string().contains("length prefix"), "{err}");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let wire = u32::MAX.to_le_bytes();
        let mut reader = wire.as_slice();
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"), "{err}");
    }

    #[tokio::test]
    async fn send_round_trips_through_peer() {
        let transport = FramedTransport::new(DuplexConnector::new(|frame| {
            Reply::Frame(frame.iter().rev().copied().collect())
        }));

        let reply = transport.send(ADDRESS, b"ping").await.unwrap();
        assert_eq!(reply, b"gnip");
        assert_eq!(*transport.connector().addresses.lock().unwrap(), vec![ADDRESS]);
    }

    #[tokio::test]
    async fn large_payload_survives_partial_reads() {
        // A 7-byte pipe forces both sides through many partial reads and writes.
        let connector = DuplexConnector::new(Reply::Frame).with_buffer_size(7);
        let transport = FramedTransport::new(connector);
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

        let reply = transport.send(ADDRESS, &payload).await.unwrap();
        assert_eq!(reply, payload);
    }

    #[tokio::test]
    async fn truncated_response_is_transport_error() {
        let transport = FramedTransport::new(DuplexConnector::new(|_| {
            let mut raw = 100u32.to_le_bytes().to_vec();
            raw.extend_from_slice(&[0u8; 10]);
            Reply::Raw(raw)
        }));
        let err = transport.send(ADDRESS, b"ping").await.unwrap_err();
        assert_eq!(err.error_code(), "transport_error");
        assert!(err.to_string().contains("after 10 of 100"), "{err}");
    }

    #[tokio::test]
    async fn connect_failure_is_transport_error() {
        let transport = FramedTransport::new(RefusingConnector);
        let err = transport.send(ADDRESS, b"ping").await.unwrap_err();
        assert_eq!(err.error_code(), "transport_error");
    }

    #[tokio::test]
    async fn request_checks_response_id() {
        let transport = FramedTransport::new(DuplexConnector::responding(|request| {
            EnclaveResponse::ok(request.request_id, request.payload)
        }));
        let request = EnclaveRequest::new("wallet", "sign", b"tx".to_vec());
        let response = transport.request(ADDRESS, &request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.payload.as_deref(), Some(&b"tx"[..]));

        let transport = FramedTransport::new(DuplexConnector::responding(|_| {
            EnclaveResponse::ok("someone-else", vec![])
        }));
        let err = transport.request(ADDRESS, &request).await.unwrap_err();
        assert_eq!(err.error_code(), "protocol_error");
    }

    #[tokio::test]
    async fn response_frame_limit_applies() {
        let transport = FramedTransport::new(DuplexConnector::new(|_| Reply::Frame(vec![0; 64])))
            .with_max_frame_len(32);
        let err = transport.send(ADDRESS, b"ping").await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"), "{err}");
    }
}
