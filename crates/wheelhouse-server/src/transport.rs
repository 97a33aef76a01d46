//! WebSocket transport.
//!
//! Plain TCP listener served by axum; each connection is upgraded to a
//! WebSocket at `/ws`. Inbound frames are read by the connection task in
//! `lib.rs`. Outbound messages go through a per-connection unbounded channel
//! drained by [`pump_outbound`], so executing driver actions never waits on a
//! slow client.

use std::net::SocketAddr;

use axum::{
    Router,
    extract::ws::{CloseFrame, Message, WebSocket, close_code},
};
use futures::{SinkExt, stream::SplitSink};
use tokio::{net::TcpListener, sync::mpsc::UnboundedReceiver};

use crate::error::ServerError;

/// Message queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded JSON envelope
    Text(String),
    /// Close the socket with this reason; nothing is written after it
    Close(String),
}

/// Listening socket for the WebSocket endpoint.
pub struct WsTransport {
    listener: TcpListener,
}

impl WsTransport {
    /// Bind the listening socket.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve `router` until the listener fails.
    pub async fn serve(self, router: Router) -> Result<(), ServerError> {
        axum::serve(self.listener, router).await?;
        Ok(())
    }
}

/// Drain one connection's outbound queue into its socket.
///
/// Ends when the queue is closed, after a [`Outbound::Close`], or on the
/// first write error.
pub(crate) async fn pump_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!("outbound write failed: {}", e);
                    break;
                }
            },
            Outbound::Close(reason) => {
                let frame = CloseFrame { code: close_code::POLICY, reason: reason.into() };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!("close frame write failed: {}", e);
                }
                break;
            },
        }
    }
}
