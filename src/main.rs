//! MQTT control agent - main entry point.
//!
//! Bootstraps the link to the test-orchestration controller, serves control
//! requests until shutdown, then closes leftover MQTT sessions and
//! unregisters.
//!
//! Exit codes: 0 on normal shutdown, 1 on usage errors, 2 on runtime
//! (RPC/MQTT) failures, 3 on anything unexpected.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mqtt_control_agent::control::ControllerLink;
use mqtt_control_agent::error::AgentResult;
use mqtt_control_agent::mqtt::SessionRegistry;
use mqtt_control_agent::observability::init_default_logging;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

const DEFAULT_CONTROLLER_PORT: u16 = 47619;

/// Timeout for closing sessions the controller left open at shutdown.
const SHUTDOWN_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT test-harness agent controlled over gRPC
#[derive(Parser)]
#[command(name = "mqtt-control-agent")]
#[command(about = "MQTT test-harness agent controlled by a test-orchestration controller")]
#[command(version)]
struct Cli {
    /// Agent id to register with the controller
    agent_id: String,

    /// Controller gRPC port
    #[arg(default_value_t = DEFAULT_CONTROLLER_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Candidate controller hosts, tried in order
    #[arg(default_value = "127.0.0.1")]
    hosts: Vec<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    init_default_logging();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)));
    let code = match outcome {
        Ok(Ok(())) => {
            info!("execution done");
            0
        }
        Ok(Err(err)) => {
            error!(error = %err, "agent failed");
            2
        }
        Err(_) => {
            error!("agent aborted unexpectedly");
            3
        }
    };
    process::exit(code);
}

#[tokio::main]
async fn run(cli: Cli) -> AgentResult<()> {
    info!(
        agent_id = %cli.agent_id,
        port = cli.port,
        hosts = ?cli.hosts,
        "starting MQTT control agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = Arc::new(SessionRegistry::new());
    let mut link =
        ControllerLink::connect(&cli.agent_id, &cli.hosts, cli.port, registry.clone()).await?;

    spawn_signal_task(link.stop_handle());

    let reason = link.handle_requests().await?;
    info!(reason = %reason, "control serving finished");

    // Close whatever the controller left open; this also removes every
    // TLS temp file before the process exits.
    for session in registry.drain() {
        if let Err(err) = session
            .disconnect(SHUTDOWN_DISCONNECT_TIMEOUT, 0, &[])
            .await
        {
            warn!(
                connection_id = session.connection_id(),
                error = %err,
                "session close during shutdown failed"
            );
        }
    }

    link.shutdown(&reason).await?;
    Ok(())
}

/// Map SIGINT/SIGTERM/SIGQUIT onto a cooperative stop of the serving loop.
fn spawn_signal_task(stop: mqtt_control_agent::control::link::StopHandle) {
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(err) => {
                error!(error = %err, "couldn't install SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                error!(error = %err, "couldn't install SIGTERM handler");
                return;
            }
        };
        let mut sigquit = match signal(SignalKind::quit()) {
            Ok(signal) => signal,
            Err(err) => {
                error!(error = %err, "couldn't install SIGQUIT handler");
                return;
            }
        };

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = sigquit.recv() => "SIGQUIT",
        };
        info!(signal = name, "received signal, shutting down gracefully");
        let _ = stop.send(format!("terminated by signal {name}")).await;
    });
}
