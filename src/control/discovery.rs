//! Outbound RPC client towards the controller.
//!
//! Carries the bootstrap calls (register, discovery, unregister) and the
//! observation side-channel (received messages, disconnect events). Event
//! pushes log failures and never propagate them: a controller that misses
//! an event must not take the MQTT session down with it.

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error};

use crate::error::{AgentError, AgentResult};
use crate::proto;
use crate::proto::mqtt_agent_discovery_client::MqttAgentDiscoveryClient;

/// Cloneable handle to the controller's discovery service.
#[derive(Clone)]
pub struct DiscoveryClient {
    agent_id: String,
    client: MqttAgentDiscoveryClient<Channel>,
}

impl DiscoveryClient {
    /// Connect to the controller at `uri` (e.g. `http://127.0.0.1:47619`).
    pub async fn connect(agent_id: &str, uri: String) -> AgentResult<Self> {
        debug!(agent_id, uri = %uri, "connecting to controller");
        let channel = Endpoint::from_shared(uri)
            .map_err(AgentError::rpc)?
            .connect_timeout(std::time::Duration::from_secs(10))
            .connect()
            .await?;
        Ok(Self {
            agent_id: agent_id.to_string(),
            client: MqttAgentDiscoveryClient::new(channel),
        })
    }

    /// Build over a lazy channel: no I/O happens until the first call.
    pub fn lazy(agent_id: &str, uri: &str) -> AgentResult<Self> {
        let channel = Endpoint::from_shared(uri.to_string())
            .map_err(AgentError::rpc)?
            .connect_lazy();
        Ok(Self {
            agent_id: agent_id.to_string(),
            client: MqttAgentDiscoveryClient::new(channel),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register this agent; the controller answers with the agent's IP as
    /// seen from its side, which is where the control endpoint must bind.
    pub async fn register_agent(&self) -> AgentResult<String> {
        debug!(agent_id = %self.agent_id, "sending RegisterAgent");
        let reply = self
            .client
            .clone()
            .register_agent(proto::RegisterRequest {
                agent_id: self.agent_id.clone(),
            })
            .await?
            .into_inner();
        if reply.address.is_empty() {
            return Err(AgentError::Rpc(
                "controller returned an empty agent address".to_string(),
            ));
        }
        Ok(reply.address)
    }

    /// Tell the controller where this agent's control endpoint listens.
    pub async fn discovery_agent(&self, address: &str, port: u16) -> AgentResult<()> {
        debug!(agent_id = %self.agent_id, address, port, "sending DiscoveryAgent");
        self.client
            .clone()
            .discovery_agent(proto::DiscoveryRequest {
                agent_id: self.agent_id.clone(),
                address: address.to_string(),
                port: i32::from(port),
            })
            .await?;
        Ok(())
    }

    /// Withdraw this agent from the controller.
    pub async fn unregister_agent(&self, reason: &str) -> AgentResult<()> {
        debug!(agent_id = %self.agent_id, reason, "sending UnregisterAgent");
        self.client
            .clone()
            .unregister_agent(proto::UnregisterRequest {
                agent_id: self.agent_id.clone(),
                reason: reason.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Push one received broker message. Failures are logged only.
    pub async fn on_receive_message(&self, connection_id: i32, msg: proto::Mqtt5Message) {
        debug!(
            agent_id = %self.agent_id,
            connection_id,
            topic = %msg.topic,
            "sending OnReceiveMessage"
        );
        let request = proto::OnReceiveMessageRequest {
            agent_id: self.agent_id.clone(),
            connection_id: Some(proto::MqttConnectionId { connection_id }),
            msg: Some(msg),
        };
        if let Err(status) = self.client.clone().on_receive_message(request).await {
            error!(
                code = %status.code(),
                message = status.message(),
                "OnReceiveMessage push failed"
            );
        }
    }

    /// Push one disconnect event. Failures are logged only.
    pub async fn on_mqtt_disconnect(
        &self,
        connection_id: i32,
        disconnect: proto::Mqtt5Disconnect,
        error: Option<String>,
    ) {
        debug!(
            agent_id = %self.agent_id,
            connection_id,
            reason_code = disconnect.reason_code,
            "sending OnMqttDisconnect"
        );
        let request = proto::OnMqttDisconnectRequest {
            agent_id: self.agent_id.clone(),
            connection_id: Some(proto::MqttConnectionId { connection_id }),
            disconnect: Some(disconnect),
            error,
        };
        if let Err(status) = self.client.clone().on_mqtt_disconnect(request).await {
            error!(
                code = %status.code(),
                message = status.message(),
                "OnMqttDisconnect push failed"
            );
        }
    }
}
