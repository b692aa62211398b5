//! Text interchange for message tables.
//!
//! Two document shapes share one validation path: a JSON document
//! ([`Bmg::to_json`]) and the XML dialect understood by existing DS message
//! editors ([`Bmg::to_xml`]). Either way every message carries an ID or none
//! does, and every attribute array has the width of the first one.
//!
//! [`Bmg::to_json`]: crate::formats::bmg::Bmg::to_json
//! [`Bmg::to_xml`]: crate::formats::bmg::Bmg::to_xml

use thiserror::Error;

use super::{Bmg, Encoding, Message, MidInfo};

mod json;
mod xml;

/// Why a document could not be imported as a message table.
#[derive(Debug, Error)]
pub enum InterchangeError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("malformed XML: {0}")]
    MalformedXml(#[from] quick_xml::Error),
    /// The XML document ended before the root element was closed.
    #[error("XML document ended early")]
    IncompleteXml,
    #[error("expected a 'bmg' root element, found {0:?}")]
    InvalidRootTag(String),
    #[error("expected a 'message' element, found {0:?}")]
    InvalidChildTag(String),
    #[error("invalid encoding: {0:?}")]
    InvalidEncoding(String),
    #[error("invalid file ID: {0:?}")]
    InvalidFileId(String),
    #[error("message {0}: invalid ID")]
    InvalidMessageId(usize),
    #[error("message {0}: invalid attributes")]
    InvalidAttributes(usize),
    #[error("message {0}: ID presence differs from the table")]
    MessageIdMismatch(usize),
    #[error("message {index}: expected {expected} attribute bytes, found {found}")]
    AttributesMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("message {message}: invalid token {token}")]
    InvalidMessageToken { message: usize, token: usize },
}

fn encoding_name(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Cp1252 => "CP-1252",
        Encoding::Utf16 => "UTF-16",
        Encoding::ShiftJis => "Shift JIS",
        Encoding::Utf8 => "UTF-8",
    }
}

fn parse_encoding(name: &str) -> Result<Encoding, InterchangeError> {
    match name.to_ascii_lowercase().as_str() {
        "cp-1252" | "cp1252" => Ok(Encoding::Cp1252),
        "utf16" | "utf-16" => Ok(Encoding::Utf16),
        "shift jis" | "shift-jis" | "shiftjis" | "sjis" => Ok(Encoding::ShiftJis),
        "utf8" | "utf-8" => Ok(Encoding::Utf8),
        _ => Err(InterchangeError::InvalidEncoding(name.to_string())),
    }
}

/// Collects imported messages, holding each to the shape of the first.
#[derive(Debug, Default)]
struct TableBuilder {
    has_ids: Option<bool>,
    attribute_size: Option<usize>,
    messages: Vec<Message>,
}

impl TableBuilder {
    /// A table whose ID presence is fixed up front rather than by its first
    /// message.
    fn with_ids(has_ids: bool) -> Self {
        Self {
            has_ids: Some(has_ids),
            ..Default::default()
        }
    }

    /// Index the next pushed message will take.
    fn len(&self) -> usize {
        self.messages.len()
    }

    fn push(&mut self, msg: Message) -> Result<(), InterchangeError> {
        let index = self.len();
        if msg.id.is_some() != *self.has_ids.get_or_insert(msg.id.is_some()) {
            return Err(InterchangeError::MessageIdMismatch(index));
        }
        let expected = *self.attribute_size.get_or_insert(msg.attributes.len());
        if msg.attributes.len() != expected {
            return Err(InterchangeError::AttributesMismatch {
                index,
                expected,
                found: msg.attributes.len(),
            });
        }
        self.messages.push(msg);
        Ok(())
    }

    fn finish(self, encoding: Encoding, file_id: u16, mid: MidInfo) -> Bmg {
        Bmg {
            encoding,
            file_id,
            attribute_size: self.attribute_size.unwrap_or(0),
            mid: self.has_ids.unwrap_or(false).then_some(mid),
            messages: self.messages,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("CP-1252", Encoding::Cp1252)]
    #[case("cp1252", Encoding::Cp1252)]
    #[case("utf-16", Encoding::Utf16)]
    #[case("UTF16", Encoding::Utf16)]
    #[case("Shift JIS", Encoding::ShiftJis)]
    #[case("shiftjis", Encoding::ShiftJis)]
    #[case("utf8", Encoding::Utf8)]
    fn encoding_names(#[case] name: &str, #[case] encoding: Encoding) {
        assert_eq!(parse_encoding(name).unwrap(), encoding);
        assert_eq!(parse_encoding(encoding_name(encoding)).unwrap(), encoding);
    }

    #[test]
    fn first_message_sets_the_shape() {
        let mut table = TableBuilder::default();
        table
            .push(Message {
                id: Some(1),
                attributes: vec![0; 4],
                tokens: vec![],
            })
            .unwrap();
        assert!(matches!(
            table.push(Message::new(vec![])),
            Err(InterchangeError::MessageIdMismatch(1))
        ));

        let bmg = table.finish(Encoding::Utf16, 0, MidInfo::default());
        assert!(bmg.has_message_ids());
        assert_eq!(bmg.attribute_size, 4);
    }

    #[test]
    fn empty_table_has_no_ids() {
        let bmg = TableBuilder::default().finish(Encoding::Utf8, 2, MidInfo::default());
        assert_eq!(bmg.mid, None);
        assert_eq!(bmg.attribute_size, 0);
        assert_eq!(bmg.file_id, 2);
    }
}
