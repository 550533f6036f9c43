use std::{collections::BTreeMap, error::Error, fmt, io, time::Duration};

use lib::protocol::{
    AdapterKey, FrameBuffer, Message, PROTOCOL_VERSION, ProtocolError, read_frame, write_frame,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{
    io::AsyncRead,
    net::TcpListener,
    time::timeout,
};
use tracing::{info, warn};

#[derive(Debug)]
pub enum ProbeError {
    Io(io::Error),
    Protocol(ProtocolError),
    Timeout(&'static str),
    Disconnected(&'static str),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Io(err) => write!(f, "I/O error: {}", err),
            ProbeError::Protocol(err) => write!(f, "protocol error: {}", err),
            ProbeError::Timeout(step) => write!(f, "timed out waiting for {}", step),
            ProbeError::Disconnected(step) => {
                write!(f, "agent disconnected while waiting for {}", step)
            }
        }
    }
}

impl Error for ProbeError {}

impl From<io::Error> for ProbeError {
    fn from(value: io::Error) -> Self {
        ProbeError::Io(value)
    }
}

impl From<ProtocolError> for ProbeError {
    fn from(value: ProtocolError) -> Self {
        ProbeError::Protocol(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub address: String,
    pub raw: String,
}

/// What one agent reported about itself and its sensors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub peer: String,
    pub system_id: Option<String>,
    pub protocol_version: Option<u32>,
    pub addresses: Vec<String>,
    pub readings: Vec<Reading>,
}

/// Plays controller for a single agent: accepts its connection, exchanges
/// client info, searches for sensors and reads each one.
///
/// `wait` bounds every individual step, not the whole probe.
pub async fn probe(
    listener: &TcpListener,
    key: &AdapterKey,
    wait: Duration,
) -> Result<ProbeReport, ProbeError> {
    let (stream, peer) = timeout(wait, listener.accept())
        .await
        .map_err(|_| ProbeError::Timeout("an agent to connect"))??;
    info!("agent connected from {}", peer);

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = FrameBuffer::new();

    let hello = Message::ClientInfo {
        protocol_version: Some(PROTOCOL_VERSION),
        system_id: None,
    };
    write_frame(&mut writer, &hello, key).await?;
    let (protocol_version, system_id) = loop {
        match next_message(&mut reader, &mut buffer, key, wait, "client info").await? {
            Message::ClientInfo {
                protocol_version,
                system_id,
            } => break (protocol_version, system_id),
            other => warn!("ignoring {} while waiting for client info", other.cmd()),
        }
    };
    if protocol_version != Some(PROTOCOL_VERSION) {
        warn!(
            "agent speaks protocol version {:?}, expected {}",
            protocol_version, PROTOCOL_VERSION
        );
    }

    let search_ts = json!("search");
    write_frame(
        &mut writer,
        &Message::search_request(search_ts.clone(), system_id.clone()),
        key,
    )
    .await?;
    let addresses = loop {
        match next_message(&mut reader, &mut buffer, key, wait, "search results").await? {
            Message::Search { ts, addresses, .. } if ts == search_ts => {
                break addresses.unwrap_or_default();
            }
            other => warn!("ignoring {} while waiting for search results", other.cmd()),
        }
    };
    info!("agent reports {} sensors", addresses.len());

    let mut requested = BTreeMap::new();
    for (seq, address) in (0u64..).zip(&addresses) {
        write_frame(
            &mut writer,
            &Message::read_request(address.clone(), json!(seq)),
            key,
        )
        .await?;
        requested.insert(seq, address.clone());
    }

    let mut answered = BTreeMap::new();
    while answered.len() < requested.len() {
        match next_message(&mut reader, &mut buffer, key, wait, "sensor readings").await? {
            Message::Read {
                ts: Value::Number(seq),
                raw,
                ..
            } => match seq.as_u64().filter(|seq| requested.contains_key(seq)) {
                Some(seq) => {
                    answered.insert(seq, raw.unwrap_or_default());
                }
                None => warn!("ignoring read reply for unknown ts {}", seq),
            },
            other => warn!("ignoring {} while waiting for readings", other.cmd()),
        }
    }

    let readings = requested
        .into_iter()
        .map(|(seq, address)| Reading {
            address,
            raw: answered.remove(&seq).unwrap_or_default(),
        })
        .collect();

    Ok(ProbeReport {
        peer: peer.to_string(),
        system_id,
        protocol_version,
        addresses,
        readings,
    })
}

async fn next_message<R>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
    key: &AdapterKey,
    wait: Duration,
    step: &'static str,
) -> Result<Message, ProbeError>
where
    R: AsyncRead + Unpin,
{
    timeout(wait, read_frame(reader, buffer, key))
        .await
        .map_err(|_| ProbeError::Timeout(step))??
        .ok_or(ProbeError::Disconnected(step))
}
