//! Transport links to the TV.
//!
//! A [`Link`] is a pair of text-frame channels backed by a pump task that owns
//! the socket, the same shape as an MQTT event loop feeding an mpsc receiver.
//! Dropping the link aborts the pump, which closes the socket.

use async_trait::async_trait;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector as TlsConnector;
use tracing::debug;

use super::connection::Endpoint;
use super::connection::TransportKind;
use super::error::ClientError;

pub type FrameSender = mpsc::UnboundedSender<String>;
pub type FrameReceiver = mpsc::UnboundedReceiver<Result<String, ClientError>>;

/// An open connection to one endpoint.
pub struct Link {
    endpoint: Endpoint,
    outgoing: Option<FrameSender>,
    incoming: Option<FrameReceiver>,
    pump: Option<JoinHandle<()>>,
}

/// The pieces of a link handed over to a live session.
pub struct LinkParts {
    pub endpoint: Endpoint,
    pub outgoing: FrameSender,
    pub incoming: FrameReceiver,
    pub pump: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        endpoint: Endpoint,
        outgoing: FrameSender,
        incoming: FrameReceiver,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            endpoint,
            outgoing: Some(outgoing),
            incoming: Some(incoming),
            pump,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Queue a text frame for sending.
    pub fn send(&self, frame: String) -> Result<(), ClientError> {
        self.outgoing
            .as_ref()
            .ok_or(ClientError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| ClientError::transport(&self.endpoint, "link closed"))
    }

    /// Next inbound frame; `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        match self.incoming.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn into_parts(mut self) -> Option<LinkParts> {
        Some(LinkParts {
            endpoint: self.endpoint.clone(),
            outgoing: self.outgoing.take()?,
            incoming: self.incoming.take()?,
            pump: self.pump.take(),
        })
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Opens links. Mocked in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link, ClientError>;
}

/// Real WebSocket connector.
///
/// TVs present a self-signed certificate on the secure port, so certificate
/// and hostname checks are disabled for `wss`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }

    fn tls_for(endpoint: &Endpoint) -> Result<TlsConnector, ClientError> {
        match endpoint.kind {
            TransportKind::Plain => Ok(TlsConnector::Plain),
            TransportKind::Secure => native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map(TlsConnector::NativeTls)
                .map_err(|e| ClientError::transport(endpoint, e)),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link, ClientError> {
        let url = endpoint.url();
        let tls = Self::tls_for(endpoint)?;

        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, Some(tls))
                .await
                .map_err(|e| ClientError::transport(endpoint, e))?;
        debug!(endpoint = %endpoint, "websocket open");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let pump_endpoint = endpoint.clone();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = in_tx.send(Err(ClientError::transport(&pump_endpoint, e)));
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    message = source.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Ok(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(endpoint = %pump_endpoint, ?frame, "websocket closed by TV");
                            break;
                        }
                        // Ping/pong are answered by tungstenite; binary frames are not used.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = in_tx.send(Err(ClientError::transport(&pump_endpoint, e)));
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(endpoint = %pump_endpoint, "websocket pump exiting");
        });

        Ok(Link::new(endpoint.clone(), out_tx, in_rx, Some(pump)))
    }
}
