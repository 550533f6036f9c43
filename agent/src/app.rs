use std::{future::Future, pin::Pin};

use tokio::{
    net::TcpStream,
    time::{Sleep, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    commands::CommandHandler,
    config::AgentConfig,
    connection::{ConnectionManager, ConnectionState, Directive, TransportEvent},
    error::BoxError,
    sensors::SensorBus,
    session::{SessionEnd, serve},
};

/// Keeps a connection to the controller open until `shutdown` resolves,
/// reconnecting after every close or error.
pub async fn run_until(
    config: AgentConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), BoxError> {
    let handler = CommandHandler::new(
        config.system_id.clone(),
        SensorBus::new(&config.w1_devices_path),
    );
    let mut manager = ConnectionManager::new();
    let mut socket: Option<TcpStream> = None;
    let mut reconnect: Option<Pin<Box<Sleep>>> = None;
    tokio::pin!(shutdown);

    info!("agent {} starting", handler.system_id());
    let mut directives = manager.connect();
    loop {
        for directive in directives.drain(..) {
            match directive {
                Directive::Dial => info!(
                    "connecting to {}:{} ...",
                    config.adapter_host, config.adapter_port
                ),
                Directive::ArmReconnectTimer => {
                    info!(
                        "reconnect in {} seconds",
                        config.reconnect_delay.as_secs_f32()
                    );
                    reconnect = Some(Box::pin(sleep(config.reconnect_delay)));
                }
                Directive::CancelReconnectTimer => reconnect = None,
                // `serve` owns the stream from `Connected` on and shuts it down itself.
                Directive::CloseSocket => debug!("controller socket released"),
            }
        }

        let event = match manager.state() {
            ConnectionState::Terminated => break,
            ConnectionState::Connecting => {
                let addr = (config.adapter_host.as_str(), config.adapter_port);
                tokio::select! {
                    connect_result = TcpStream::connect(addr) => match connect_result {
                        Ok(stream) => {
                            info!(
                                "connected with controller {}:{}",
                                config.adapter_host, config.adapter_port
                            );
                            socket = Some(stream);
                            TransportEvent::Established
                        }
                        Err(err) => {
                            warn!("connect failed: {}", err);
                            TransportEvent::Error
                        }
                    },
                    _ = &mut shutdown => TransportEvent::ShutdownRequested,
                }
            }
            ConnectionState::Connected => match socket.take() {
                Some(stream) => {
                    match serve(stream, &config.adapter_key, &handler, shutdown.as_mut()).await {
                        SessionEnd::Closed => {
                            info!("socket closed");
                            TransportEvent::Closed
                        }
                        SessionEnd::Failed(err) => {
                            warn!("socket error: {}", err);
                            TransportEvent::Error
                        }
                        SessionEnd::Shutdown => TransportEvent::ShutdownRequested,
                    }
                }
                None => TransportEvent::Closed,
            },
            ConnectionState::Closing => TransportEvent::Closed,
            ConnectionState::Idle => match reconnect.as_mut() {
                Some(timer) => tokio::select! {
                    _ = timer.as_mut() => TransportEvent::ReconnectTimerFired,
                    _ = &mut shutdown => TransportEvent::ShutdownRequested,
                },
                None => {
                    shutdown.as_mut().await;
                    TransportEvent::ShutdownRequested
                }
            },
        };

        if event == TransportEvent::ReconnectTimerFired {
            reconnect = None;
        }
        if event == TransportEvent::ShutdownRequested {
            info!("shutdown requested");
        }
        directives = manager.handle(event);
    }

    info!("agent stopped");
    Ok(())
}
