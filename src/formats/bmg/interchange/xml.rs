//! The XML dialect of existing DS message editors.
//!
//! ```xml
//! <!DOCTYPE xml>
//! <bmg encoding="UTF-16" id="3">
//!   <message id="0x00000064" attributes="01 02 03 04">Hello, <escape data="01 00 02"/>!</message>
//! </bmg>
//! ```
//!
//! Message `id`s are hex with a `0x` prefix and appear on every message or
//! on none. `attributes` is left out when the table has no attribute bytes.
//! Hex byte arrays are digit pairs; spaces between pairs are optional.
//! Whitespace between messages is layout, text inside a message is content.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use super::{InterchangeError, TableBuilder, encoding_name, parse_encoding};
use crate::Result;
use crate::formats::bmg::{Bmg, Encoding, Message, MessageToken, MidInfo};

impl Bmg {
    /// Export the table as an XML document.
    ///
    /// The dialect has no place for MID1 header fields; they come back as
    /// zero from [`Bmg::from_xml`].
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<!DOCTYPE xml>\n");
        out.push_str(&format!("<bmg encoding=\"{}\"", encoding_name(self.encoding)));
        if self.file_id != 0 {
            out.push_str(&format!(" id=\"{}\"", self.file_id));
        }
        if self.messages.is_empty() {
            out.push_str("/>\n");
            return out;
        }
        out.push_str(">\n");

        for msg in &self.messages {
            out.push_str("  <message");
            if let Some(id) = msg.id {
                out.push_str(&format!(" id=\"0x{id:08x}\""));
            }
            if !msg.attributes.is_empty() {
                out.push_str(&format!(" attributes=\"{}\"", format_hex_list(&msg.attributes)));
            }
            if msg.tokens.is_empty() {
                out.push_str("/>\n");
                continue;
            }
            out.push('>');
            for token in &msg.tokens {
                match token {
                    MessageToken::Text(text) => out.push_str(&escape(text.as_str())),
                    MessageToken::Escape(bytes) => {
                        out.push_str(&format!("<escape data=\"{}\"/>", format_hex_list(bytes)))
                    }
                }
            }
            out.push_str("</message>\n");
        }
        out.push_str("</bmg>\n");
        out
    }

    /// Import a table from an XML document in the dialect written by
    /// [`Bmg::to_xml`].
    pub fn from_xml(xml: &str) -> Result<Bmg> {
        Ok(import(xml)?)
    }
}

fn format_hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace is dropped, the rest read as digit pairs. A trailing single
/// digit is a byte of its own.
fn parse_hex_list(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    digits
        .chunks(2)
        .map(|pair| {
            if !pair.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok()
        })
        .collect()
}

/// Decimal, or hex with a `0x` prefix.
fn parse_integer(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u64::from_str_radix(hex, 16).ok()
        }
        Some(_) => None,
        None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
        None => None,
    }
}

fn attribute(e: &BytesStart, name: &str) -> std::result::Result<Option<String>, InterchangeError> {
    let Some(attr) = e.try_get_attribute(name).map_err(quick_xml::Error::from)? else {
        return Ok(None);
    };
    Ok(Some(attr.unescape_value()?.into_owned()))
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Table header from the root element.
struct Header {
    encoding: Encoding,
    file_id: u16,
}

/// Where the reader is in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    BeforeRoot,
    Table,
    Message,
    Escape,
    AfterRoot,
}

struct Import {
    level: Level,
    header: Option<Header>,
    table: TableBuilder,
    message: Message,
}

impl Import {
    fn bad_token(&self) -> InterchangeError {
        InterchangeError::InvalidMessageToken {
            message: self.table.len(),
            token: self.message.tokens.len(),
        }
    }

    fn element(&mut self, e: &BytesStart, empty: bool) -> std::result::Result<(), InterchangeError> {
        match self.level {
            Level::BeforeRoot | Level::AfterRoot => {
                if self.level == Level::AfterRoot || e.name().as_ref() != b"bmg" {
                    return Err(InterchangeError::InvalidRootTag(tag_name(e)));
                }
                let encoding = parse_encoding(&attribute(e, "encoding")?.unwrap_or_default())?;
                let file_id = match attribute(e, "id")? {
                    Some(id) => parse_integer(&id)
                        .and_then(|v| u16::try_from(v).ok())
                        .ok_or(InterchangeError::InvalidFileId(id))?,
                    None => 0,
                };
                self.header = Some(Header { encoding, file_id });
                self.level = if empty { Level::AfterRoot } else { Level::Table };
            }
            Level::Table => {
                if e.name().as_ref() != b"message" {
                    return Err(InterchangeError::InvalidChildTag(tag_name(e)));
                }
                let index = self.table.len();
                let id = attribute(e, "id")?
                    .map(|id| {
                        parse_integer(&id)
                            .and_then(|v| u32::try_from(v).ok())
                            .ok_or(InterchangeError::InvalidMessageId(index))
                    })
                    .transpose()?;
                let attributes = match attribute(e, "attributes")? {
                    Some(hex) => {
                        parse_hex_list(&hex).ok_or(InterchangeError::InvalidAttributes(index))?
                    }
                    None => Vec::new(),
                };
                self.message = Message {
                    id,
                    attributes,
                    tokens: Vec::new(),
                };
                if empty {
                    self.table.push(std::mem::take(&mut self.message))?;
                } else {
                    self.level = Level::Message;
                }
            }
            Level::Message => {
                if e.name().as_ref() != b"escape" {
                    return Err(self.bad_token());
                }
                let bytes = attribute(e, "data")?
                    .and_then(|hex| parse_hex_list(&hex))
                    .ok_or_else(|| self.bad_token())?;
                self.message.tokens.push(MessageToken::Escape(bytes));
                if !empty {
                    self.level = Level::Escape;
                }
            }
            // An escape holds no content; report it against the escape itself.
            Level::Escape => {
                return Err(InterchangeError::InvalidMessageToken {
                    message: self.table.len(),
                    token: self.message.tokens.len() - 1,
                });
            }
        }
        Ok(())
    }

    fn end(&mut self) -> std::result::Result<(), InterchangeError> {
        self.level = match self.level {
            Level::Escape => Level::Message,
            Level::Message => {
                self.table.push(std::mem::take(&mut self.message))?;
                Level::Table
            }
            _ => Level::AfterRoot,
        };
        Ok(())
    }

    fn text(&mut self, text: &str) -> std::result::Result<(), InterchangeError> {
        match self.level {
            Level::Message => {
                if text.is_empty() {
                    return Ok(());
                }
                match self.message.tokens.last_mut() {
                    Some(MessageToken::Text(run)) => run.push_str(text),
                    _ => self.message.tokens.push(MessageToken::Text(text.to_string())),
                }
            }
            _ if text.trim().is_empty() => {}
            Level::Table => return Err(InterchangeError::InvalidChildTag("#text".into())),
            Level::Escape => {
                return Err(InterchangeError::InvalidMessageToken {
                    message: self.table.len(),
                    token: self.message.tokens.len() - 1,
                });
            }
            Level::BeforeRoot | Level::AfterRoot => {
                return Err(InterchangeError::InvalidRootTag("#text".into()));
            }
        }
        Ok(())
    }
}

fn import(xml: &str) -> std::result::Result<Bmg, InterchangeError> {
    let mut reader = Reader::from_str(xml);
    let mut state = Import {
        level: Level::BeforeRoot,
        header: None,
        table: TableBuilder::default(),
        message: Message::default(),
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => state.element(&e, false)?,
            Event::Empty(e) => state.element(&e, true)?,
            Event::End(_) => state.end()?,
            Event::Text(t) => state.text(&t.unescape()?)?,
            Event::CData(c) => state.text(&String::from_utf8_lossy(&c))?,
            Event::Eof => break,
            // Declarations, comments and processing instructions.
            _ => {}
        }
    }

    match (state.level, state.header) {
        (Level::AfterRoot, Some(header)) => {
            Ok(state.table.finish(header.encoding, header.file_id, MidInfo::default()))
        }
        _ => Err(InterchangeError::IncompleteXml),
    }
}
