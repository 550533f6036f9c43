use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;

/// Command envelope exchanged with the controller, tagged by `cmd` on the wire.
///
/// The same type is used in both directions: requests leave the reply-only
/// fields (`raw`, `addresses`) empty and replies fill them in. `ts` is an
/// opaque correlation token that the agent echoes back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    ClientInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol_version: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Read {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        ts: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Search {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        ts: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        addresses: Option<Vec<String>>,
    },
    /// Any `cmd` this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn client_info(system_id: impl Into<String>) -> Self {
        Self::ClientInfo {
            protocol_version: Some(PROTOCOL_VERSION),
            system_id: Some(system_id.into()),
        }
    }

    pub fn read_request(address: impl Into<String>, ts: Value) -> Self {
        Self::Read {
            address: Some(address.into()),
            ts,
            raw: None,
        }
    }

    pub fn read_reply(address: impl Into<String>, ts: Value, raw: impl Into<String>) -> Self {
        Self::Read {
            address: Some(address.into()),
            ts,
            raw: Some(raw.into()),
        }
    }

    pub fn search_request(ts: Value, system_id: Option<String>) -> Self {
        Self::Search {
            ts,
            system_id,
            addresses: None,
        }
    }

    pub fn search_reply(ts: Value, system_id: Option<String>, addresses: Vec<String>) -> Self {
        Self::Search {
            ts,
            system_id,
            addresses: Some(addresses),
        }
    }

    /// Builds a message from any decoded JSON value.
    ///
    /// Fields of the wrong type are treated as absent, and a value without a
    /// string `cmd` becomes [`Message::Unknown`], so a well-formed but odd
    /// frame never fails to decode.
    pub fn from_value(value: Value) -> Self {
        if let Ok(message) = Message::deserialize(&value) {
            return message;
        }
        let Value::Object(mut fields) = value else {
            return Message::Unknown;
        };

        match fields.get("cmd").and_then(Value::as_str) {
            Some("clientInfo") => Message::ClientInfo {
                protocol_version: fields
                    .get("protocolVersion")
                    .and_then(Value::as_u64)
                    .and_then(|version| u32::try_from(version).ok()),
                system_id: take_string(&mut fields, "systemId"),
            },
            Some("read") => Message::Read {
                address: take_string(&mut fields, "address"),
                ts: fields.remove("ts").unwrap_or_default(),
                raw: take_string(&mut fields, "raw"),
            },
            Some("search") => Message::Search {
                ts: fields.remove("ts").unwrap_or_default(),
                system_id: take_string(&mut fields, "systemId"),
                addresses: fields
                    .remove("addresses")
                    .and_then(|addresses| Vec::<String>::deserialize(addresses).ok()),
            },
            _ => Message::Unknown,
        }
    }

    pub fn cmd(&self) -> &'static str {
        match self {
            Message::ClientInfo { .. } => "clientInfo",
            Message::Read { .. } => "read",
            Message::Search { .. } => "search",
            Message::Unknown => "unknown",
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> Option<String> {
    match fields.remove(name) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    }
}
