//! Wire codec for the five LAN Texter message kinds.
//!
//! Every datagram carries exactly one flat JSON object. The integer field
//! `code` selects the kind; `name` is always present and Chat adds `text`.

use serde_json::{json, Map, Value};

use crate::error::MalformedMessage;

/// Message codes as they appear on the wire.
pub mod codes {
    pub const WHO_IS_ONLINE: i64 = 1;
    pub const I_AM_ONLINE: i64 = 2;
    pub const CHAT: i64 = 3;
    pub const RENAME: i64 = 4;
    pub const LEFT: i64 = 5;
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Broadcast discovery query; receivers answer with `IAmOnline`.
    WhoIsOnline { name: String },
    /// Unicast answer to a discovery query.
    IAmOnline { name: String },
    Chat { name: String, text: String },
    /// Carries the sender's new name.
    Rename { name: String },
    Left { name: String },
}

impl WireMessage {
    pub fn code(&self) -> i64 {
        match self {
            WireMessage::WhoIsOnline { .. } => codes::WHO_IS_ONLINE,
            WireMessage::IAmOnline { .. } => codes::I_AM_ONLINE,
            WireMessage::Chat { .. } => codes::CHAT,
            WireMessage::Rename { .. } => codes::RENAME,
            WireMessage::Left { .. } => codes::LEFT,
        }
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::WhoIsOnline { .. } => "who-is-online",
            WireMessage::IAmOnline { .. } => "i-am-online",
            WireMessage::Chat { .. } => "chat",
            WireMessage::Rename { .. } => "rename",
            WireMessage::Left { .. } => "left",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WireMessage::WhoIsOnline { name }
            | WireMessage::IAmOnline { name }
            | WireMessage::Chat { name, .. }
            | WireMessage::Rename { name }
            | WireMessage::Left { name } => name,
        }
    }

    /// Encode as UTF-8 JSON text.
    pub fn encode(&self) -> Vec<u8> {
        let mut value = json!({
            "code": self.code(),
            "name": self.name(),
        });

        if let (WireMessage::Chat { text, .. }, Value::Object(map)) = (self, &mut value) {
            map.insert("text".to_string(), Value::String(text.clone()));
        }

        value.to_string().into_bytes()
    }

    /// Decode one datagram payload.
    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| MalformedMessage::NotJson(e.to_string()))?;

        let obj = value.as_object().ok_or(MalformedMessage::NotAnObject)?;
        let code = parse_code(obj)?;

        let name = string_field(obj, "name")?;
        let message = match code {
            codes::WHO_IS_ONLINE => WireMessage::WhoIsOnline { name },
            codes::I_AM_ONLINE => WireMessage::IAmOnline { name },
            codes::CHAT => WireMessage::Chat {
                name,
                text: string_field(obj, "text")?,
            },
            codes::RENAME => WireMessage::Rename { name },
            codes::LEFT => WireMessage::Left { name },
            other => return Err(MalformedMessage::UnknownCode(other)),
        };

        Ok(message)
    }
}

/// Older peers send the code as a decimal string, so both forms are accepted.
fn parse_code(obj: &Map<String, Value>) -> Result<i64, MalformedMessage> {
    let code = match obj.get("code") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or(MalformedMessage::MissingCode)?;

    if !(codes::WHO_IS_ONLINE..=codes::LEFT).contains(&code) {
        return Err(MalformedMessage::UnknownCode(code));
    }

    Ok(code)
}

fn string_field(obj: &Map<String, Value>, field: &'static str) -> Result<String, MalformedMessage> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(MalformedMessage::MissingField(field))
}
