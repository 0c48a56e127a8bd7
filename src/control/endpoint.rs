//! Inbound control service.
//!
//! Implements the `MqttClientControl` RPC surface the controller drives.
//! Every handler validates its request first and answers with a structured
//! status: `INVALID_ARGUMENT` for bad fields, `NOT_FOUND` for unknown
//! connection ids, `INTERNAL` for MQTT-side failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

use crate::control::discovery::DiscoveryClient;
use crate::error::AgentError;
use crate::mqtt::registry::SessionRegistry;
use crate::mqtt::session::{Session, SessionConfig, SubscribeOptions, TlsMaterial};
use crate::proto;
use crate::proto::mqtt_client_control_server::MqttClientControl;

const PORT_MIN: i32 = 1;
const PORT_MAX: i32 = 65_535;

const KEEPALIVE_OFF: i32 = 0;
const KEEPALIVE_MIN: i32 = 5;
const KEEPALIVE_MAX: i32 = 65_535;

const TIMEOUT_MIN: i32 = 1;

const REASON_MIN: i32 = 0;
const REASON_MAX: i32 = 255;

const SUBSCRIPTION_ID_MIN: i32 = 1;
const SUBSCRIPTION_ID_MAX: i32 = 268_435_455;

const QOS_MIN: i32 = 0;
const QOS_MAX: i32 = 2;

const RETAIN_HANDLING_MIN: i32 = 0;
const RETAIN_HANDLING_MAX: i32 = 2;

/// Wire values of `MqttProtoVersion`.
const PROTO_VERSION_V311: i32 = 3;
const PROTO_VERSION_V50: i32 = 5;

/// Timeout for closing a session the controller never claimed (refused
/// CONNACK) or abandoned at shutdown.
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The inbound control service. One instance serves every controller
/// request for the lifetime of the agent.
pub struct ControlService {
    registry: Arc<SessionRegistry>,
    discovery: DiscoveryClient,
    shutdown_tx: mpsc::Sender<String>,
}

impl ControlService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        discovery: DiscoveryClient,
        shutdown_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            registry,
            discovery,
            shutdown_tx,
        }
    }

    fn invalid(message: &str) -> Status {
        debug!(message, "request validation failed");
        Status::invalid_argument(message)
    }

    fn check_timeout(timeout: i32) -> Result<Duration, Status> {
        if timeout < TIMEOUT_MIN {
            return Err(Self::invalid("invalid timeout, must be at least 1"));
        }
        Ok(Duration::from_secs(timeout as u64))
    }

    fn check_tls(tls: &proto::TlsSettings) -> Result<TlsMaterial, Status> {
        let ca = tls.ca_list.join("\n");
        if ca.is_empty() {
            return Err(Self::invalid("CA list is empty"));
        }
        if tls.cert.is_empty() {
            return Err(Self::invalid("cert is empty"));
        }
        if tls.key.is_empty() {
            return Err(Self::invalid("key is empty"));
        }
        Ok(TlsMaterial {
            ca,
            cert: tls.cert.clone(),
            key: tls.key.clone(),
        })
    }

    fn lookup(&self, connection_id: i32) -> Result<Arc<Session>, Status> {
        self.registry
            .get(connection_id)
            .ok_or_else(|| Status::from(AgentError::NotFound))
    }
}

#[tonic::async_trait]
impl MqttClientControl for ControlService {
    async fn shutdown_agent(
        &self,
        request: Request<proto::ShutdownRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let reason = request.into_inner().reason;
        info!(reason = %reason, "ShutdownAgent");

        // Ack first; teardown is observed through UnregisterAgent.
        let _ = self
            .shutdown_tx
            .send(format!("shutdown requested by controller: '{reason}'"))
            .await;
        Ok(Response::new(proto::Empty {}))
    }

    async fn create_mqtt_connection(
        &self,
        request: Request<proto::MqttConnectRequest>,
    ) -> Result<Response<proto::MqttConnectReply>, Status> {
        let request = request.into_inner();
        info!(
            client_id = %request.client_id,
            host = %request.host,
            port = request.port,
            "CreateMqttConnection"
        );

        if request.client_id.is_empty() {
            return Err(Self::invalid("clientId can't be empty"));
        }
        if request.host.is_empty() {
            return Err(Self::invalid("host can't be empty"));
        }
        if request.port < PORT_MIN || request.port > PORT_MAX {
            return Err(Self::invalid("invalid port, must be in range [1, 65535]"));
        }

        let mqtt50 = match request.protocol_version {
            PROTO_VERSION_V50 => true,
            PROTO_VERSION_V311 => false,
            _ => {
                return Err(Self::invalid(
                    "invalid protocolVersion, only MQTT_PROTOCOL_V311 and MQTT_PROTOCOL_V50 are supported",
                ))
            }
        };

        if request.keepalive != KEEPALIVE_OFF
            && (request.keepalive < KEEPALIVE_MIN || request.keepalive > KEEPALIVE_MAX)
        {
            return Err(Self::invalid(
                "invalid keepalive, must be 0 or in range [5, 65535]",
            ));
        }

        let timeout = Self::check_timeout(request.timeout)?;

        let tls = match &request.tls {
            Some(tls) => Some(Self::check_tls(tls)?),
            None => None,
        };

        let config = SessionConfig {
            client_id: request.client_id,
            host: request.host,
            port: request.port as u16,
            keepalive: request.keepalive as u16,
            clean_session: request.clean_session,
            mqtt50,
            tls,
            request_response_information: request.request_response_information,
            connect_user_properties: request.properties,
        };

        let session = Arc::new(Session::new(config, self.discovery.clone()));
        let conn_ack = session.start(timeout).await.map_err(Status::from)?;

        if conn_ack.reason_code != 0 {
            // Broker refused the CONNECT; there is no session to register.
            error!(reason_code = conn_ack.reason_code, "CONNECT refused by broker");
            let detail = format!("CONNECT refused with reason code {}", conn_ack.reason_code);
            let _ = session
                .disconnect(DEFAULT_DISCONNECT_TIMEOUT, 0, &[])
                .await;
            return Ok(Response::new(proto::MqttConnectReply {
                connected: false,
                connection_id: None,
                conn_ack: Some(conn_ack),
                error: Some(detail),
            }));
        }

        let connection_id = self.registry.register(session);
        info!(connection_id, "MQTT connection established");
        Ok(Response::new(proto::MqttConnectReply {
            connected: true,
            connection_id: Some(proto::MqttConnectionId { connection_id }),
            conn_ack: Some(conn_ack),
            error: None,
        }))
    }

    async fn close_mqtt_connection(
        &self,
        request: Request<proto::MqttCloseRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();

        let timeout = Self::check_timeout(request.timeout)?;
        if request.reason < REASON_MIN || request.reason > REASON_MAX {
            return Err(Self::invalid("invalid disconnect reason"));
        }

        let connection_id = request
            .connection_id
            .map(|id| id.connection_id)
            .unwrap_or_default();
        info!(connection_id, reason = request.reason, "CloseMqttConnection");

        let session = self
            .registry
            .unregister(connection_id)
            .ok_or_else(|| Status::from(AgentError::NotFound))?;

        session
            .disconnect(timeout, request.reason as u8, &request.properties)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn subscribe_mqtt(
        &self,
        request: Request<proto::MqttSubscribeRequest>,
    ) -> Result<Response<proto::MqttSubscribeReply>, Status> {
        let request = request.into_inner();

        let timeout = Self::check_timeout(request.timeout)?;

        let subscription_id = match request.subscription_id {
            Some(id) => {
                if !(SUBSCRIPTION_ID_MIN..=SUBSCRIPTION_ID_MAX).contains(&id) {
                    return Err(Self::invalid(
                        "invalid subscription id, must be >= 1 and <= 268435455",
                    ));
                }
                Some(id as u32)
            }
            None => None,
        };

        if request.subscriptions.is_empty() {
            return Err(Self::invalid("subscriptions list is empty"));
        }

        // The broker library takes one options tuple for a multi-filter
        // subscribe, so every filter must share the same options.
        let mut filters = Vec::with_capacity(request.subscriptions.len());
        let first = &request.subscriptions[0];
        let options = SubscribeOptions {
            qos: first.qos as u8,
            no_local: first.no_local,
            retain_as_published: first.retain_as_published,
            retain_handling: first.retain_handling as u8,
        };
        for subscription in &request.subscriptions {
            if subscription.filter.is_empty() {
                return Err(Self::invalid("empty filter"));
            }
            if subscription.qos < QOS_MIN || subscription.qos > QOS_MAX {
                return Err(Self::invalid("invalid QoS, must be in range [0, 2]"));
            }
            if subscription.retain_handling < RETAIN_HANDLING_MIN
                || subscription.retain_handling > RETAIN_HANDLING_MAX
            {
                return Err(Self::invalid(
                    "invalid retainHandling, must be in range [0, 2]",
                ));
            }
            if subscription.qos as u8 != options.qos {
                return Err(Self::invalid("QoS values mismatched"));
            }
            if subscription.retain_handling as u8 != options.retain_handling {
                return Err(Self::invalid("retain handling values mismatched"));
            }
            if subscription.no_local != options.no_local {
                return Err(Self::invalid("no local values mismatched"));
            }
            if subscription.retain_as_published != options.retain_as_published {
                return Err(Self::invalid("retain as published values mismatched"));
            }
            filters.push(subscription.filter.clone());
        }

        let connection_id = request
            .connection_id
            .map(|id| id.connection_id)
            .unwrap_or_default();
        info!(connection_id, ?filters, "SubscribeMqtt");

        let session = self.lookup(connection_id)?;
        if subscription_id.is_some() && !session.is_mqtt50() {
            return Err(Self::invalid("subscription id requires MQTT v5.0"));
        }

        let reply = session
            .subscribe(
                timeout,
                subscription_id,
                &filters,
                options,
                &request.properties,
            )
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn unsubscribe_mqtt(
        &self,
        request: Request<proto::MqttUnsubscribeRequest>,
    ) -> Result<Response<proto::MqttSubscribeReply>, Status> {
        let request = request.into_inner();

        let timeout = Self::check_timeout(request.timeout)?;

        if request.filters.is_empty() {
            return Err(Self::invalid("filters list is empty"));
        }
        if request.filters.iter().any(|filter| filter.is_empty()) {
            return Err(Self::invalid("empty filter"));
        }

        let connection_id = match request.connection_id {
            Some(id) => id.connection_id,
            None => return Err(Self::invalid("missing connectionId")),
        };
        info!(connection_id, filters = ?request.filters, "UnsubscribeMqtt");

        let session = self.lookup(connection_id)?;
        let reply = session
            .unsubscribe(timeout, &request.filters, &request.properties)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn publish_mqtt(
        &self,
        request: Request<proto::MqttPublishRequest>,
    ) -> Result<Response<proto::MqttPublishReply>, Status> {
        let request = request.into_inner();

        let timeout = Self::check_timeout(request.timeout)?;

        let msg = match &request.msg {
            Some(msg) => msg,
            None => return Err(Self::invalid("missing message")),
        };
        if msg.topic.is_empty() {
            return Err(Self::invalid("topic can't be empty"));
        }
        if msg.qos < QOS_MIN || msg.qos > QOS_MAX {
            return Err(Self::invalid("invalid QoS, must be in range [0, 2]"));
        }

        let connection_id = match request.connection_id {
            Some(id) => id.connection_id,
            None => return Err(Self::invalid("missing connectionId")),
        };
        info!(
            connection_id,
            topic = %msg.topic,
            qos = msg.qos,
            retain = msg.retain,
            "PublishMqtt"
        );

        let session = self.lookup(connection_id)?;
        let reply = session
            .publish(timeout, msg)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }
}
