//! Bootstrap link between agent and controller.
//!
//! Tries each candidate controller host in order: register, learn the
//! agent's own address as the controller sees it, bind the control endpoint
//! there on an auto-selected port, then announce the endpoint. The link then
//! serves control requests until the controller asks for shutdown or a
//! local signal stops it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

use crate::control::discovery::DiscoveryClient;
use crate::control::endpoint::ControlService;
use crate::error::{AgentError, AgentResult};
use crate::mqtt::registry::SessionRegistry;
use crate::proto::mqtt_client_control_server::MqttClientControlServer;

/// Handle for requesting a cooperative stop of the serving loop; carries
/// the human-readable shutdown reason.
pub type StopHandle = mpsc::Sender<String>;

/// An established link: registered with one controller, control endpoint
/// bound and announced.
pub struct ControllerLink {
    discovery: DiscoveryClient,
    endpoint_addr: SocketAddr,
    serve_task: JoinHandle<Result<(), tonic::transport::Error>>,
    server_stop: Option<oneshot::Sender<()>>,
    shutdown_rx: mpsc::Receiver<String>,
    stop_tx: StopHandle,
}

impl ControllerLink {
    /// Try each controller host in order; the error of the last attempt
    /// surfaces when the whole list is exhausted.
    pub async fn connect(
        agent_id: &str,
        hosts: &[String],
        port: u16,
        registry: Arc<SessionRegistry>,
    ) -> AgentResult<Self> {
        let mut last_err = None;
        for host in hosts {
            match Self::try_host(agent_id, host, port, registry.clone()).await {
                Ok(link) => {
                    info!(host = %host, port, agent_id, "control link established");
                    return Ok(link);
                }
                Err(err) => {
                    warn!(host = %host, port, error = %err, "controller host attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| AgentError::Rpc("no controller hosts supplied".to_string())))
    }

    async fn try_host(
        agent_id: &str,
        host: &str,
        port: u16,
        registry: Arc<SessionRegistry>,
    ) -> AgentResult<Self> {
        debug!(host, port, agent_id, "attempting controller host");
        let discovery = DiscoveryClient::connect(agent_id, format!("http://{host}:{port}")).await?;

        // The controller reports the agent's apparent IP; the control
        // endpoint binds there with an auto-selected port.
        let local_ip = discovery.register_agent().await?;
        debug!(local_ip = %local_ip, "registered with controller");

        let listener = TcpListener::bind((local_ip.as_str(), 0)).await.map_err(|err| {
            AgentError::Rpc(format!("couldn't bind control endpoint on {local_ip}: {err}"))
        })?;
        let endpoint_addr = listener.local_addr().map_err(AgentError::rpc)?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let service = ControlService::new(registry, discovery.clone(), shutdown_tx.clone());

        let (server_stop, stop_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(
            Server::builder()
                .add_service(MqttClientControlServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = stop_rx.await;
                }),
        );

        if let Err(err) = discovery
            .discovery_agent(&local_ip, endpoint_addr.port())
            .await
        {
            let _ = server_stop.send(());
            return Err(err);
        }

        info!(address = %endpoint_addr, "control endpoint listening");
        Ok(Self {
            discovery,
            endpoint_addr,
            serve_task,
            server_stop: Some(server_stop),
            shutdown_rx,
            stop_tx: shutdown_tx,
        })
    }

    /// Address the control endpoint is serving on.
    pub fn endpoint_addr(&self) -> SocketAddr {
        self.endpoint_addr
    }

    /// Clone a handle that stops the serving loop with a reason. Used by
    /// the signal task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_tx.clone()
    }

    /// Serve control requests until `ShutdownAgent` or a local stop; returns
    /// the human-readable shutdown reason.
    pub async fn handle_requests(&mut self) -> AgentResult<String> {
        debug!("handling control requests");
        let reason = self
            .shutdown_rx
            .recv()
            .await
            .unwrap_or_else(|| "control endpoint stopped".to_string());
        Ok(reason)
    }

    /// Unregister from the controller and tear the endpoint down.
    pub async fn shutdown(mut self, reason: &str) -> AgentResult<()> {
        info!(reason, "shutting down control link");

        if let Err(err) = self.discovery.unregister_agent(reason).await {
            // Observation only; a vanished controller must not fail the exit.
            error!(error = %err, "UnregisterAgent failed");
        }

        if let Some(stop) = self.server_stop.take() {
            let _ = stop.send(());
        }
        match self.serve_task.await {
            Ok(Ok(())) => debug!("control endpoint stopped"),
            Ok(Err(err)) => error!(error = %err, "control endpoint failed"),
            Err(err) => error!(error = %err, "control endpoint task join failed"),
        }
        Ok(())
    }
}
