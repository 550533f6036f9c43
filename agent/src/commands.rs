use std::sync::Arc;

use lib::protocol::{Message, PROTOCOL_VERSION};
use tracing::{info, warn};

use crate::sensors::{BusError, SensorBus};

/// Result of handling one controller command.
#[derive(Debug)]
pub enum Outcome {
    Reply(Message),
    NoReply,
    Failed(BusError),
}

struct HandlerInner {
    system_id: String,
    bus: SensorBus,
}

/// Executes controller commands against the local sensor bus.
///
/// Cheap to clone so each command can run on its own task.
#[derive(Clone)]
pub struct CommandHandler {
    inner: Arc<HandlerInner>,
}

impl CommandHandler {
    pub fn new(system_id: impl Into<String>, bus: SensorBus) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                system_id: system_id.into(),
                bus,
            }),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.inner.system_id
    }

    pub async fn dispatch(&self, message: Message) -> Outcome {
        match message {
            Message::ClientInfo {
                protocol_version, ..
            } => {
                if protocol_version != Some(PROTOCOL_VERSION) {
                    warn!(
                        "protocol version {:?} from the controller does not match agent protocol version {}; please update the agent",
                        protocol_version, PROTOCOL_VERSION
                    );
                }
                info!("sending client info to the controller");
                Outcome::Reply(Message::client_info(self.inner.system_id.clone()))
            }
            Message::Read { address, ts, .. } => {
                let Some(address) = address.filter(|address| !address.is_empty()) else {
                    warn!("got read command without address from the controller");
                    return Outcome::NoReply;
                };
                let raw = self.inner.bus.read_sensor(&address).await;
                Outcome::Reply(Message::read_reply(address, ts, raw))
            }
            Message::Search { ts, system_id, .. } => match self.inner.bus.enumerate().await {
                Ok(addresses) => {
                    info!("found {} sensors", addresses.len());
                    Outcome::Reply(Message::search_reply(ts, system_id, addresses))
                }
                Err(err) => Outcome::Failed(err),
            },
            Message::Unknown => {
                warn!("unknown command from the controller");
                Outcome::NoReply
            }
        }
    }
}
