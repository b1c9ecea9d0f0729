//! RPC Servers
//!
//! [`DockServer`] runs inside a dock agent and maps each [`DockRequest`] to a
//! [`DockService`] call. [`ControllerServer`] is the controller's listener
//! for northbound calls and for dock agents registering themselves.

use super::codec::{decode, encode, frame_codec, SchemaId};
use crate::controlplane::orchestrator::Orchestrator;
use crate::domain::ports::DockService;
use crate::domain::protocol::{ControllerCall, ControllerRequest, DockRequest, RpcResponse};
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

fn respond<T: Serialize>(result: Result<T>) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::success(&value),
        Err(e) => RpcResponse::failure(&e),
    }
}

/// Forward a dock's JSON payload unchanged
fn pass_through(result: Result<String>) -> RpcResponse {
    match result {
        Ok(message) => RpcResponse::raw(message),
        Err(e) => RpcResponse::failure(&e),
    }
}

/// Accept connections until `shutdown` fires, handing each to `handle`
async fn accept_loop<F, Fut>(
    listener: TcpListener,
    shutdown: CancellationToken,
    name: &'static str,
    handle: F,
) -> Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("{} listener stopped", name);
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        debug!(%remote, "{} connection accepted", name);
        let conn = handle(stream, remote);
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(%remote, error = %e, "{} connection error", name);
            }
        });
    }
}

/// Read frames of schema `schema` until the peer closes, answering each
async fn serve_frames<Req, F, Fut>(stream: TcpStream, schema: SchemaId, mut answer: F) -> Result<()>
where
    Req: DeserializeOwned,
    F: FnMut(Req) -> Fut,
    Fut: Future<Output = RpcResponse>,
{
    let reply_schema = schema
        .response()
        .ok_or_else(|| Error::Internal(format!("{} is not a request schema", schema)))?;
    let mut framed = Framed::new(stream, frame_codec());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let (correlation_id, response) = match decode::<Req>(&frame, schema) {
            Ok((id, request)) => (id, answer(request).await),
            Err(e) => {
                warn!(error = %e, "Malformed {} frame", schema);
                (0, RpcResponse::failure(&e))
            }
        };
        framed
            .send(encode(reply_schema, correlation_id, &response)?)
            .await?;
    }
    Ok(())
}

// =============================================================================
// Dock Server
// =============================================================================

/// Framed TCP server exposing a [`DockService`]
pub struct DockServer<T: ?Sized> {
    listener: TcpListener,
    handler: Arc<T>,
}

impl<T> DockServer<T>
where
    T: DockService + ?Sized + 'static,
{
    pub async fn bind(addr: SocketAddr, handler: Arc<T>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Dock server listening");
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let handler = self.handler;
        accept_loop(self.listener, shutdown, "dock", move |stream, _| {
            let handler = Arc::clone(&handler);
            async move {
                serve_frames(stream, SchemaId::DockRequestV1, |request: DockRequest| {
                    let handler = Arc::clone(&handler);
                    async move { dispatch_dock_request(handler.as_ref(), request).await }
                })
                .await
            }
        })
        .await
    }
}

/// Map a [`DockRequest`] to the matching [`DockService`] call
#[instrument(skip_all, fields(op = request.operation(), dock = request.dock_id()))]
pub async fn dispatch_dock_request<T>(handler: &T, request: DockRequest) -> RpcResponse
where
    T: DockService + ?Sized,
{
    match request {
        // --- Volumes ---------------------------------------------------------
        DockRequest::CreateVolume(req) => respond(handler.create_volume(req).await),
        DockRequest::GetVolume(req) => respond(handler.get_volume(req).await),
        DockRequest::ListVolumes(req) => respond(handler.list_volumes(req).await),
        DockRequest::DeleteVolume(req) => respond(handler.delete_volume(req).await),

        // --- Volume attachments ----------------------------------------------
        DockRequest::CreateVolumeAttachment(req) => {
            respond(handler.create_volume_attachment(req).await)
        }
        DockRequest::GetVolumeAttachment(req) => respond(handler.get_volume_attachment(req).await),
        DockRequest::ListVolumeAttachments(req) => {
            respond(handler.list_volume_attachments(req).await)
        }
        DockRequest::UpdateVolumeAttachment(req) => {
            respond(handler.update_volume_attachment(req).await)
        }
        DockRequest::DeleteVolumeAttachment(req) => {
            respond(handler.delete_volume_attachment(req).await)
        }

        // --- Snapshots -------------------------------------------------------
        DockRequest::CreateVolumeSnapshot(req) => respond(handler.create_volume_snapshot(req).await),
        DockRequest::GetVolumeSnapshot(req) => respond(handler.get_volume_snapshot(req).await),
        DockRequest::ListVolumeSnapshots(req) => respond(handler.list_volume_snapshots(req).await),
        DockRequest::DeleteVolumeSnapshot(req) => respond(handler.delete_volume_snapshot(req).await),

        // --- Shares ----------------------------------------------------------
        DockRequest::CreateShare(req) => respond(handler.create_share(req).await),
        DockRequest::GetShare(req) => respond(handler.get_share(req).await),
        DockRequest::ListShares(req) => respond(handler.list_shares(req).await),
        DockRequest::DeleteShare(req) => respond(handler.delete_share(req).await),
        DockRequest::AttachShare(req) => respond(handler.attach_share(req).await),
        DockRequest::DetachShare(req) => respond(handler.detach_share(req).await),
        DockRequest::MountShare(req) => respond(handler.mount_share(req).await),
        DockRequest::UnmountShare(req) => respond(handler.unmount_share(req).await),
    }
}

// =============================================================================
// Controller Server
// =============================================================================

/// Northbound listener of the controller
pub struct ControllerServer {
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
}

impl ControllerServer {
    /// Bind `addr`; at most `max_concurrent` calls run at once
    pub async fn bind(
        addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        max_concurrent: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Controller listening");
        Ok(Self {
            listener,
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires
    ///
    /// Each call runs under a child of `shutdown`. A call carrying a
    /// deadline gets a timer that cancels its token when the deadline
    /// passes, including workflows the call left running.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let orchestrator = self.orchestrator;
        let permits = self.permits;
        let root = shutdown.clone();

        accept_loop(self.listener, shutdown, "controller", move |stream, _| {
            let orchestrator = Arc::clone(&orchestrator);
            let permits = Arc::clone(&permits);
            let root = root.clone();
            async move {
                serve_frames(stream, SchemaId::ControllerRequestV1, |call: ControllerCall| {
                    let orchestrator = Arc::clone(&orchestrator);
                    let permits = Arc::clone(&permits);
                    let token = root.child_token();
                    async move {
                        let _permit = match permits.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                return RpcResponse::failure(&Error::cancelled("server shutdown"))
                            }
                        };
                        if let Some(ms) = call.deadline_ms {
                            arm_deadline(token.clone(), Duration::from_millis(ms));
                        }
                        dispatch_controller_request(&orchestrator, call.request, &token).await
                    }
                })
                .await
            }
        })
        .await
    }
}

fn arm_deadline(token: CancellationToken, deadline: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                debug!("Call deadline of {:?} elapsed", deadline);
                token.cancel();
            }
        }
    });
}

/// Map a [`ControllerRequest`] to the orchestrator or a registry
#[instrument(skip_all, fields(op = request.operation()))]
pub async fn dispatch_controller_request(
    orchestrator: &Orchestrator,
    request: ControllerRequest,
    cancel: &CancellationToken,
) -> RpcResponse {
    let operation = request.operation();
    let o = orchestrator;

    let response = match request {
        // --- Volumes ---------------------------------------------------------
        ControllerRequest::CreateVolume(p) => respond(o.create_volume(p, cancel).await),
        ControllerRequest::GetVolume { volume_id } => {
            pass_through(o.get_volume(&volume_id, cancel).await)
        }
        ControllerRequest::ListVolumes { dock_id } => {
            pass_through(o.list_volumes(&dock_id, cancel).await)
        }
        ControllerRequest::DeleteVolume { volume_id } => {
            respond(o.delete_volume(&volume_id, cancel).await)
        }
        ControllerRequest::CreateVolumeAttachment(p) => {
            respond(o.create_volume_attachment(p, cancel).await)
        }
        ControllerRequest::GetVolumeAttachment { attachment_id } => {
            pass_through(o.get_volume_attachment(&attachment_id, cancel).await)
        }
        ControllerRequest::ListVolumeAttachments { volume_id } => {
            pass_through(o.list_volume_attachments(&volume_id, cancel).await)
        }
        ControllerRequest::UpdateVolumeAttachment(p) => {
            respond(o.update_volume_attachment(p, cancel).await)
        }
        ControllerRequest::DeleteVolumeAttachment { attachment_id } => {
            respond(o.delete_volume_attachment(&attachment_id, cancel).await)
        }
        ControllerRequest::CreateVolumeSnapshot(p) => {
            respond(o.create_volume_snapshot(p, cancel).await)
        }
        ControllerRequest::GetVolumeSnapshot { snapshot_id } => {
            pass_through(o.get_volume_snapshot(&snapshot_id, cancel).await)
        }
        ControllerRequest::ListVolumeSnapshots { volume_id } => {
            pass_through(o.list_volume_snapshots(&volume_id, cancel).await)
        }
        ControllerRequest::DeleteVolumeSnapshot { snapshot_id } => {
            respond(o.delete_volume_snapshot(&snapshot_id, cancel).await)
        }

        // --- Shares ----------------------------------------------------------
        ControllerRequest::CreateShare(p) => respond(o.create_share(p, cancel).await),
        ControllerRequest::GetShare { share_id } => {
            pass_through(o.get_share(&share_id, cancel).await)
        }
        ControllerRequest::ListShares { dock_id } => {
            pass_through(o.list_shares(&dock_id, cancel).await)
        }
        ControllerRequest::DeleteShare { share_id } => respond(o.delete_share(&share_id, cancel).await),
        ControllerRequest::AttachShare(p) => respond(o.attach_share(p, cancel).await),
        ControllerRequest::DetachShare { attachment_id } => {
            respond(o.detach_share(&attachment_id, cancel).await)
        }
        ControllerRequest::MountShare(p) => respond(o.mount_share(p, cancel).await),
        ControllerRequest::UnmountShare { attachment_id } => {
            respond(o.unmount_share(&attachment_id, cancel).await)
        }

        // --- Docks -----------------------------------------------------------
        ControllerRequest::RegisterDock(p) => respond(
            o.docks()
                .register_in_zone(&p.endpoint, p.backends, p.availability_zone)
                .await,
        ),
        ControllerRequest::DeregisterDock { endpoint } => respond(o.deregister_dock(&endpoint).await),
        ControllerRequest::DockHeartbeat { dock_id } => respond(o.docks().heartbeat(&dock_id).await),
        ControllerRequest::ReportPools { dock_id, pools } => {
            respond(o.docks().report_pools(&dock_id, pools).await)
        }
        ControllerRequest::ListDocks => RpcResponse::success(&o.docks().list()),

        // --- Profiles --------------------------------------------------------
        ControllerRequest::CreateProfile(spec) => respond(o.profiles().create(spec).await),
        ControllerRequest::GetProfile { profile_id } => respond(o.profiles().get(&profile_id).await),
        ControllerRequest::ListProfiles => respond(o.profiles().list().await),
        ControllerRequest::UpdateProfile { profile_id, patch } => {
            respond(o.profiles().update(&profile_id, patch).await)
        }
        ControllerRequest::DeleteProfile { profile_id } => {
            respond(o.profiles().delete(&profile_id).await)
        }
        ControllerRequest::AddProfileTag {
            profile_id,
            key,
            value,
        } => respond(o.profiles().add_tag(&profile_id, &key, &value).await),
        ControllerRequest::RemoveProfileTag { profile_id, key } => {
            respond(o.profiles().remove_tag(&profile_id, &key).await)
        }
    };

    o.metrics().record_request(operation, response.is_success());
    if let Some(err) = &response.error {
        debug!("{} failed: {} ({})", operation, err.message, err.kind);
    }
    response
}
