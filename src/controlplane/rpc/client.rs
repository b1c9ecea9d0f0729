//! RPC Clients
//!
//! [`RpcDockClient`] is the controller's transport towards dock agents;
//! [`ControllerClient`] is what an API server or a dock agent uses to call
//! the controller. Both open one TCP stream per call.

use super::codec::{decode, encode, frame_codec, SchemaId};
use crate::domain::ports::DockClient;
use crate::domain::protocol::{ControllerCall, ControllerRequest, DockRequest, RpcResponse};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

/// One request/response exchange over a fresh connection
async fn round_trip<Req, Resp>(
    endpoint: &str,
    schema: SchemaId,
    correlation_id: u64,
    body: &Req,
) -> std::result::Result<Resp, String>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let expected = schema
        .response()
        .ok_or_else(|| format!("{} is not a request schema", schema))?;
    let frame = encode(schema, correlation_id, body).map_err(|e| e.to_string())?;

    let stream = TcpStream::connect(endpoint)
        .await
        .map_err(|e| format!("connect: {}", e))?;
    let mut framed = Framed::new(stream, frame_codec());
    framed
        .send(frame)
        .await
        .map_err(|e| format!("send: {}", e))?;

    let reply = framed
        .next()
        .await
        .ok_or_else(|| "connection closed before response".to_string())?
        .map_err(|e| format!("receive: {}", e))?;
    let (id, response): (u64, Resp) = decode(&reply, expected).map_err(|e| e.to_string())?;
    if id != correlation_id {
        return Err(format!(
            "response for request {} while waiting for {}",
            id, correlation_id
        ));
    }
    Ok(response)
}

// =============================================================================
// Dock Client
// =============================================================================

/// Framed TCP transport towards dock agents
pub struct RpcDockClient {
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcDockClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl DockClient for RpcDockClient {
    #[instrument(skip(self, request), fields(op = request.operation()))]
    async fn send(&self, endpoint: &str, request: DockRequest) -> Result<RpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let exchange = round_trip::<_, RpcResponse>(endpoint, SchemaId::DockRequestV1, id, &request);

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => {
                debug!("{} -> {:?}", request, response.status);
                Ok(response)
            }
            Ok(Err(reason)) => Err(Error::DockUnavailable {
                dock: endpoint.to_string(),
                reason,
            }),
            Err(_) => Err(Error::DockUnavailable {
                dock: endpoint.to_string(),
                reason: format!("no response within {:?}", self.timeout),
            }),
        }
    }
}

// =============================================================================
// Controller Client
// =============================================================================

/// Client of the controller's northbound surface
pub struct ControllerClient {
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl ControllerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue `request`; `deadline` is forwarded so the controller can cancel
    /// work that outlives the caller
    pub async fn call(
        &self,
        request: ControllerRequest,
        deadline: Option<Duration>,
    ) -> Result<RpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let call = ControllerCall {
            deadline_ms: deadline.map(|d| d.as_millis() as u64),
            request,
        };
        let exchange = round_trip::<_, RpcResponse>(
            &self.endpoint,
            SchemaId::ControllerRequestV1,
            id,
            &call,
        );
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(Error::DockUnavailable {
                dock: self.endpoint.clone(),
                reason,
            }),
            Err(_) => Err(Error::DockUnavailable {
                dock: self.endpoint.clone(),
                reason: format!("no response within {:?}", self.timeout),
            }),
        }
    }

    /// Issue `request` and decode the success payload
    pub async fn call_decoded<T: DeserializeOwned>(
        &self,
        request: ControllerRequest,
        deadline: Option<Duration>,
    ) -> Result<T> {
        self.call(request, deadline).await?.decode(&self.endpoint)
    }
}
