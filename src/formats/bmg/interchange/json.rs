//! JSON documents.
//!
//! ```json
//! {
//!   "encoding": "UTF-16",
//!   "file_id": 3,
//!   "mid": { "format": 0, "info": 0 },
//!   "messages": [
//!     { "id": 100, "attributes": "01-02-03-04",
//!       "tokens": ["Hello, ", { "escape": "01-00-02" }, "!"] }
//!   ]
//! }
//! ```
//!
//! `mid` and every message `id` are present together or not at all. A token
//! is either a string or an object with a single `escape` hex string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InterchangeError, TableBuilder, encoding_name, parse_encoding};
use crate::Result;
use crate::formats::bmg::tokens::{format_hex_bytes, parse_hex_bytes};
use crate::formats::bmg::{Bmg, Message, MessageToken, MidInfo};

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    encoding: String,
    file_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mid: Option<MidDocument>,
    #[serde(default)]
    messages: Vec<MessageDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MidDocument {
    format: u8,
    info: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default)]
    attributes: String,
    #[serde(default)]
    tokens: Vec<Value>,
}

fn token_value(token: &MessageToken) -> Value {
    match token {
        MessageToken::Text(text) => Value::String(text.clone()),
        MessageToken::Escape(bytes) => serde_json::json!({ "escape": format_hex_bytes(bytes) }),
    }
}

fn parse_token(value: &Value) -> Option<MessageToken> {
    match value {
        Value::String(text) => Some(MessageToken::Text(text.clone())),
        Value::Object(map) if map.len() == 1 => {
            let hex = map.get("escape")?.as_str()?;
            parse_hex_bytes(hex).ok().map(MessageToken::Escape)
        }
        _ => None,
    }
}

impl Bmg {
    /// Export the table as a pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String> {
        let doc = Document {
            encoding: encoding_name(self.encoding).to_string(),
            file_id: self.file_id as u64,
            mid: self.mid.map(|m| MidDocument {
                format: m.format,
                info: m.info,
            }),
            messages: self
                .messages
                .iter()
                .map(|msg| MessageDocument {
                    id: msg.id.map(u64::from),
                    attributes: format_hex_bytes(&msg.attributes),
                    tokens: msg.tokens.iter().map(token_value).collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&doc).map_err(InterchangeError::from)?)
    }

    /// Import a table from a JSON document produced by [`Bmg::to_json`] or
    /// written by hand.
    pub fn from_json(json: &str) -> Result<Bmg> {
        let doc: Document = serde_json::from_str(json).map_err(InterchangeError::from)?;
        Ok(from_document(doc)?)
    }
}

fn from_document(doc: Document) -> std::result::Result<Bmg, InterchangeError> {
    let encoding = parse_encoding(&doc.encoding)?;
    let file_id = u16::try_from(doc.file_id)
        .map_err(|_| InterchangeError::InvalidFileId(doc.file_id.to_string()))?;

    let mut table = TableBuilder::with_ids(doc.mid.is_some());
    for (index, msg) in doc.messages.iter().enumerate() {
        let id = msg
            .id
            .map(|id| u32::try_from(id).map_err(|_| InterchangeError::InvalidMessageId(index)))
            .transpose()?;
        let attributes =
            parse_hex_bytes(&msg.attributes).map_err(|_| InterchangeError::InvalidAttributes(index))?;
        let tokens = msg
            .tokens
            .iter()
            .enumerate()
            .map(|(token, value)| {
                parse_token(value).ok_or(InterchangeError::InvalidMessageToken {
                    message: index,
                    token,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        table.push(Message {
            id,
            attributes,
            tokens,
        })?;
    }

    let mid = doc
        .mid
        .map(|m| MidInfo {
            format: m.format,
            info: m.info,
        })
        .unwrap_or_default();
    Ok(table.finish(encoding, file_id, mid))
}
