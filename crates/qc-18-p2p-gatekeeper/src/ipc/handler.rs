//! IPC adapter implementing [`Coordinator`] over a request/response channel.

use crate::domain::config::PolicyConfig;
use crate::domain::error::CoordinatorError;
use crate::domain::handlers::HandlerCatalog;
use crate::domain::pending::{self, PendingRequestStore};
use crate::ipc::requests::{CoordinatorRequest, IpcRequest};
use crate::ipc::responses::{
    decode, AuthorizedResponse, BlockedResponse, ConfigResponse, IpcResponse,
    PeerOrForgerResponse, RateLimitStatusResponse, ReadyResponse,
};
use crate::ports::{Coordinator, LogLevel};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Outgoing half of the coordinator channel
#[async_trait]
pub trait IpcSender: Send + Sync {
    async fn send(&self, request: IpcRequest) -> Result<(), IpcError>;
}

/// Incoming half of the coordinator channel
#[async_trait]
pub trait IpcReceiver: Send + Sync {
    /// Next response (waits until one is available)
    async fn receive(&self) -> Result<IpcResponse, IpcError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

impl From<IpcError> for CoordinatorError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::ChannelClosed => CoordinatorError::ChannelClosed,
            other => CoordinatorError::SendFailed(other.to_string()),
        }
    }
}

/// Coordinator reached through IPC messages
pub struct IpcCoordinator {
    pending: Arc<PendingRequestStore>,
    sender: Arc<dyn IpcSender>,
}

impl IpcCoordinator {
    pub fn new(pending: Arc<PendingRequestStore>, sender: Arc<dyn IpcSender>) -> Self {
        Self { pending, sender }
    }

    /// Send a request and wait for its response
    pub async fn request(
        &self,
        payload: CoordinatorRequest,
    ) -> Result<serde_json::Value, CoordinatorError> {
        let method = payload.method();
        let timeout = self.pending.default_timeout();
        let (correlation_id, rx) = self.pending.register(method, Some(timeout));

        if let Err(e) = self
            .sender
            .send(IpcRequest::with_correlation_id(correlation_id, payload))
            .await
        {
            self.pending.cancel(&correlation_id);
            return Err(e.into());
        }

        debug!(correlation_id = %correlation_id, method = method, "Sent coordinator request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoordinatorError::ChannelClosed),
            Err(_) => {
                self.pending.cancel(&correlation_id);
                Err(CoordinatorError::Timeout(method))
            }
        }
    }

    /// Send a request without waiting for an answer
    pub async fn notify(&self, payload: CoordinatorRequest) -> Result<(), CoordinatorError> {
        self.sender
            .send(IpcRequest::notification(payload))
            .await
            .map_err(Into::into)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    /// Spawn the sweep that drops requests whose coordinator never answered
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(pending::cleanup_task(Arc::clone(&self.pending), interval))
    }
}

#[async_trait]
impl Coordinator for IpcCoordinator {
    async fn get_config(&self) -> Result<PolicyConfig, CoordinatorError> {
        let value = self.request(CoordinatorRequest::GetConfig).await?;
        let config: ConfigResponse = decode("getConfig", value)?;
        Ok(PolicyConfig::from_raw(
            &config.blacklist,
            config.max_same_subnet_peers,
        ))
    }

    async fn get_handlers(&self) -> Result<HandlerCatalog, CoordinatorError> {
        let value = self.request(CoordinatorRequest::GetHandlers).await?;
        decode("getHandlers", value)
    }

    async fn is_blocked_by_rate_limit(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        let value = self
            .request(CoordinatorRequest::IsBlockedByRateLimit { ip })
            .await?;
        decode::<BlockedResponse>("isBlockedByRateLimit", value).map(|r| r.blocked)
    }

    async fn get_rate_limit_status(
        &self,
        ip: IpAddr,
        endpoint: &str,
    ) -> Result<bool, CoordinatorError> {
        let value = self
            .request(CoordinatorRequest::GetRateLimitStatus {
                ip,
                endpoint: endpoint.to_string(),
            })
            .await?;
        decode::<RateLimitStatusResponse>("getRateLimitStatus", value)
            .map(|r| r.exceeded_limit_on_endpoint)
    }

    async fn is_app_ready(&self) -> Result<bool, CoordinatorError> {
        let value = self.request(CoordinatorRequest::IsAppReady).await?;
        decode::<ReadyResponse>("isAppReady", value).map(|r| r.ready)
    }

    async fn is_forger_authorized(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        let value = self
            .request(CoordinatorRequest::IsForgerAuthorized { ip })
            .await?;
        decode::<AuthorizedResponse>("isForgerAuthorized", value).map(|r| r.authorized)
    }

    async fn is_peer_or_forger(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        let value = self.request(CoordinatorRequest::IsPeerOrForger { ip }).await?;
        decode::<PeerOrForgerResponse>("isPeerOrForger", value).map(|r| r.is_peer_or_forger)
    }

    async fn accept_new_peer(
        &self,
        ip: IpAddr,
        headers: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.notify(CoordinatorRequest::AcceptNewPeer { ip, headers })
            .await
    }

    async fn log(&self, level: LogLevel, message: String) -> Result<(), CoordinatorError> {
        self.notify(CoordinatorRequest::Log { level, message }).await
    }

    async fn dispatch(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CoordinatorError> {
        self.request(CoordinatorRequest::Dispatch {
            event: operation.to_string(),
            payload,
        })
        .await
    }
}

/// Drains coordinator responses into the pending store
pub struct ResponseListener {
    pending: Arc<PendingRequestStore>,
    receiver: Arc<dyn IpcReceiver>,
}

impl ResponseListener {
    pub fn new(pending: Arc<PendingRequestStore>, receiver: Arc<dyn IpcReceiver>) -> Self {
        Self { pending, receiver }
    }

    pub async fn run(self) {
        loop {
            match self.receiver.receive().await {
                Ok(response) => {
                    let correlation_id = response.correlation_id;
                    if !self.pending.complete(correlation_id, response.into_result()) {
                        debug!(correlation_id = %correlation_id, "Dropped late coordinator response");
                    }
                }
                Err(IpcError::ChannelClosed) => {
                    warn!("Coordinator channel closed, stopping listener");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error receiving coordinator response");
                }
            }
        }
    }
}

/// In-process channel pair
pub mod channel {
    use super::*;

    pub struct ChannelSender(pub mpsc::Sender<IpcRequest>);
    pub struct ChannelReceiver(pub tokio::sync::Mutex<mpsc::Receiver<IpcResponse>>);

    impl ChannelReceiver {
        pub fn new(rx: mpsc::Receiver<IpcResponse>) -> Self {
            Self(tokio::sync::Mutex::new(rx))
        }
    }

    #[async_trait]
    impl IpcSender for ChannelSender {
        async fn send(&self, request: IpcRequest) -> Result<(), IpcError> {
            self.0
                .send(request)
                .await
                .map_err(|_| IpcError::ChannelClosed)
        }
    }

    #[async_trait]
    impl IpcReceiver for ChannelReceiver {
        async fn receive(&self) -> Result<IpcResponse, IpcError> {
            self.0.lock().await.recv().await.ok_or(IpcError::ChannelClosed)
        }
    }

    /// Build a coordinator adapter plus its listener over fresh channels.
    ///
    /// Returns the adapter, the listener (to be spawned), the request stream
    /// the coordinator side reads and the response sink it writes.
    pub fn connect(
        pending: Arc<PendingRequestStore>,
        buffer: usize,
    ) -> (
        IpcCoordinator,
        ResponseListener,
        mpsc::Receiver<IpcRequest>,
        mpsc::Sender<IpcResponse>,
    ) {
        let (req_tx, req_rx) = mpsc::channel(buffer);
        let (resp_tx, resp_rx) = mpsc::channel(buffer);
        let coordinator = IpcCoordinator::new(pending.clone(), Arc::new(ChannelSender(req_tx)));
        let listener = ResponseListener::new(pending, Arc::new(ChannelReceiver::new(resp_rx)));
        (coordinator, listener, req_rx, resp_tx)
    }
}
