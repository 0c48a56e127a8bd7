//! Bootstrap and control-plane integration tests over loopback gRPC.
//!
//! A stub discovery service stands in for the controller: the real
//! `ControllerLink` registers against it, binds its control endpoint on the
//! reported address, and the tests then drive that endpoint with a real
//! gRPC client. No MQTT broker is required; broker-dependent paths answer
//! with the status codes the controller would see.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mqtt_control_agent::control::ControllerLink;
use mqtt_control_agent::mqtt::SessionRegistry;
use mqtt_control_agent::proto;
use mqtt_control_agent::proto::mqtt_agent_discovery_server::{
    MqttAgentDiscovery, MqttAgentDiscoveryServer,
};
use mqtt_control_agent::proto::mqtt_client_control_client::MqttClientControlClient;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

#[derive(Debug)]
enum ControllerEvent {
    Register { agent_id: String },
    Discovery { address: String, port: i32 },
    Unregister { reason: String },
    Message { connection_id: i32, topic: String },
    Disconnect { connection_id: i32 },
}

struct StubController {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

#[tonic::async_trait]
impl MqttAgentDiscovery for StubController {
    async fn register_agent(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::RegisterReply>, Status> {
        let _ = self.events.send(ControllerEvent::Register {
            agent_id: request.into_inner().agent_id,
        });
        Ok(Response::new(proto::RegisterReply {
            address: "127.0.0.1".to_string(),
        }))
    }

    async fn discovery_agent(
        &self,
        request: Request<proto::DiscoveryRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        let _ = self.events.send(ControllerEvent::Discovery {
            address: request.address,
            port: request.port,
        });
        Ok(Response::new(proto::Empty {}))
    }

    async fn unregister_agent(
        &self,
        request: Request<proto::UnregisterRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let _ = self.events.send(ControllerEvent::Unregister {
            reason: request.into_inner().reason,
        });
        Ok(Response::new(proto::Empty {}))
    }

    async fn on_receive_message(
        &self,
        request: Request<proto::OnReceiveMessageRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        let _ = self.events.send(ControllerEvent::Message {
            connection_id: request.connection_id.map(|c| c.connection_id).unwrap_or(0),
            topic: request.msg.map(|m| m.topic).unwrap_or_default(),
        });
        Ok(Response::new(proto::Empty {}))
    }

    async fn on_mqtt_disconnect(
        &self,
        request: Request<proto::OnMqttDisconnectRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        let _ = self.events.send(ControllerEvent::Disconnect {
            connection_id: request.connection_id.map(|c| c.connection_id).unwrap_or(0),
        });
        Ok(Response::new(proto::Empty {}))
    }
}

/// Start the stub controller on an ephemeral loopback port.
async fn start_stub_controller() -> (SocketAddr, mpsc::UnboundedReceiver<ControllerEvent>) {
    let (events, events_rx) = mpsc::unbounded_channel();
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(
        Server::builder()
            .add_service(MqttAgentDiscoveryServer::new(StubController { events }))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    (addr, events_rx)
}

async fn control_client(addr: SocketAddr) -> MqttClientControlClient<tonic::transport::Channel> {
    MqttClientControlClient::connect(format!("http://{addr}"))
        .await
        .expect("connect to agent control endpoint")
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("controller event within deadline")
        .expect("event stream open")
}

#[tokio::test]
async fn bootstrap_registers_and_announces_the_endpoint() {
    let (controller_addr, mut events) = start_stub_controller().await;
    let registry = Arc::new(SessionRegistry::new());

    let link = ControllerLink::connect(
        "agent-bootstrap",
        &["127.0.0.1".to_string()],
        controller_addr.port(),
        registry,
    )
    .await
    .expect("bootstrap against stub controller");

    match next_event(&mut events).await {
        ControllerEvent::Register { agent_id } => assert_eq!(agent_id, "agent-bootstrap"),
        other => panic!("expected Register first, got {other:?}"),
    }
    match next_event(&mut events).await {
        ControllerEvent::Discovery { address, port } => {
            assert_eq!(address, "127.0.0.1");
            assert_eq!(port, i32::from(link.endpoint_addr().port()));
        }
        other => panic!("expected Discovery second, got {other:?}"),
    }

    link.shutdown("test over").await.expect("link shutdown");
    match next_event(&mut events).await {
        ControllerEvent::Unregister { reason } => assert_eq!(reason, "test over"),
        other => panic!("expected Unregister, got {other:?}"),
    }
}

#[tokio::test]
async fn bootstrap_falls_back_to_the_next_host() {
    let (controller_addr, mut events) = start_stub_controller().await;
    let registry = Arc::new(SessionRegistry::new());

    // Nothing listens on 127.0.0.2; the loop must move on and succeed on
    // the second candidate.
    let link = ControllerLink::connect(
        "agent-fallback",
        &["127.0.0.2".to_string(), "127.0.0.1".to_string()],
        controller_addr.port(),
        registry,
    )
    .await
    .expect("fallback to the second host");

    match next_event(&mut events).await {
        ControllerEvent::Register { agent_id } => assert_eq!(agent_id, "agent-fallback"),
        other => panic!("expected Register, got {other:?}"),
    }

    link.shutdown("fallback test over").await.expect("shutdown");
}

#[tokio::test]
async fn bootstrap_fails_when_all_hosts_are_exhausted() {
    let registry = Arc::new(SessionRegistry::new());

    let result = ControllerLink::connect(
        "agent-no-controller",
        &["127.0.0.2".to_string()],
        1,
        registry,
    )
    .await;

    assert!(result.is_err(), "no controller host must fail the bootstrap");
}

#[tokio::test]
async fn shutdown_agent_unblocks_serving_with_the_reason() {
    let (controller_addr, mut events) = start_stub_controller().await;
    let registry = Arc::new(SessionRegistry::new());

    let mut link = ControllerLink::connect(
        "agent-shutdown",
        &["127.0.0.1".to_string()],
        controller_addr.port(),
        registry,
    )
    .await
    .expect("bootstrap");

    let mut client = control_client(link.endpoint_addr()).await;
    client
        .shutdown_agent(proto::ShutdownRequest {
            reason: "done".to_string(),
        })
        .await
        .expect("ShutdownAgent replies OK");

    let reason = tokio::time::timeout(Duration::from_secs(5), link.handle_requests())
        .await
        .expect("serving loop unblocks")
        .expect("reason");
    assert!(reason.contains("done"), "reason carries the controller text");

    link.shutdown(&reason).await.expect("link shutdown");
    loop {
        match next_event(&mut events).await {
            ControllerEvent::Unregister { reason } => {
                assert!(reason.contains("done"));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn unknown_connection_ids_answer_not_found_over_the_wire() {
    let (controller_addr, _events) = start_stub_controller().await;
    let registry = Arc::new(SessionRegistry::new());

    let link = ControllerLink::connect(
        "agent-not-found",
        &["127.0.0.1".to_string()],
        controller_addr.port(),
        registry,
    )
    .await
    .expect("bootstrap");

    let mut client = control_client(link.endpoint_addr()).await;

    let publish = client
        .publish_mqtt(proto::MqttPublishRequest {
            connection_id: Some(proto::MqttConnectionId { connection_id: 99 }),
            timeout: 5,
            msg: Some(proto::Mqtt5Message {
                topic: "t".to_string(),
                qos: 1,
                ..Default::default()
            }),
        })
        .await;
    match publish {
        Err(status) => assert_eq!(status.code(), Code::NotFound),
        Ok(_) => panic!("expected NOT_FOUND"),
    }

    let close = client
        .close_mqtt_connection(proto::MqttCloseRequest {
            connection_id: Some(proto::MqttConnectionId { connection_id: 99 }),
            timeout: 5,
            reason: 0,
            properties: Vec::new(),
        })
        .await;
    match close {
        Err(status) => assert_eq!(status.code(), Code::NotFound),
        Ok(_) => panic!("expected NOT_FOUND"),
    }

    link.shutdown("not-found test over").await.expect("shutdown");
}

#[tokio::test]
async fn connect_to_a_silent_broker_times_out_with_the_harness_message() {
    let (controller_addr, _events) = start_stub_controller().await;
    let registry = Arc::new(SessionRegistry::new());

    let link = ControllerLink::connect(
        "agent-timeout",
        &["127.0.0.1".to_string()],
        controller_addr.port(),
        registry,
    )
    .await
    .expect("bootstrap");

    // A TCP listener that never speaks MQTT: the CONNECT goes out and no
    // CONNACK ever comes back.
    let silent = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let silent_port = silent.local_addr().unwrap().port();

    let mut client = control_client(link.endpoint_addr()).await;
    let started = Instant::now();
    let result = client
        .create_mqtt_connection(proto::MqttConnectRequest {
            client_id: "timeout-case".to_string(),
            host: "127.0.0.1".to_string(),
            port: i32::from(silent_port),
            keepalive: 60,
            clean_session: true,
            tls: None,
            protocol_version: 5,
            timeout: 1,
            properties: Vec::new(),
            request_response_information: None,
        })
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(status) => {
            assert_eq!(status.code(), Code::Internal);
            assert_eq!(status.message(), "Operation timedout");
        }
        Ok(reply) => panic!("expected timeout, got {:?}", reply.into_inner()),
    }
    assert!(
        elapsed >= Duration::from_secs(1),
        "must wait out the caller's timeout"
    );
    assert!(
        elapsed < Duration::from_millis(2500),
        "timeout must fire promptly, took {elapsed:?}"
    );

    link.shutdown("timeout test over").await.expect("shutdown");
}
