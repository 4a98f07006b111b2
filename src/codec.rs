//! Text encoding and decoding of protocol [`Message`]s.
//!
//! Every message is a single line terminated by `\n`, at most
//! [`Message::MAX_ENCODED_LEN`] bytes long including the newline. The line
//! starts with the command token (the uppercase type name) followed by
//! space-separated arguments. An argument containing whitespace or `"` is
//! surrounded by double quotes; there is no escape syntax inside quotes.

use std::io::{BufRead, Read};

use crate::error::{Result, TkvsError};
use crate::message::{Message, MessageType};

/// Encodes `msg` into its canonical wire form: single spaces between
/// tokens and a terminating newline.
///
/// # Errors
/// fails with [`TkvsError::InvalidMessage`] if the message has no type or
/// the encoded form would exceed [`Message::MAX_ENCODED_LEN`] bytes
pub fn encode(msg: &Message) -> Result<String> {
    let token = msg
        .message_type()
        .wire_name()
        .ok_or_else(|| TkvsError::InvalidMessage("cannot encode a message with no type".into()))?;

    let mut encoded = String::from(token);
    for arg in msg.args() {
        if arg.contains(|c: char| c.is_whitespace() || c == '"') {
            encoded.push_str(" \"");
            encoded.push_str(arg);
            encoded.push('"');
        } else {
            encoded.push(' ');
            encoded.push_str(arg);
        }
    }
    encoded.push('\n');

    if encoded.len() > Message::MAX_ENCODED_LEN {
        return Err(TkvsError::InvalidMessage(
            "encoded message exceeds maximum length".into(),
        ));
    }
    Ok(encoded)
}

/// Decodes one encoded line into a [`Message`].
///
/// The decoder tolerates leading whitespace and runs of whitespace between
/// tokens, but rejects input without a terminating newline, input longer
/// than [`Message::MAX_ENCODED_LEN`] bytes, unknown command tokens,
/// unterminated quoted arguments, and messages whose arguments violate the
/// arity or slot constraints of their type.
///
/// # Errors
/// all of the above fail with [`TkvsError::InvalidMessage`]
pub fn decode(encoded: &str) -> Result<Message> {
    if encoded.len() > Message::MAX_ENCODED_LEN {
        return Err(TkvsError::InvalidMessage(
            "encoded message exceeds maximum length".into(),
        ));
    }
    let line = encoded
        .strip_suffix('\n')
        .ok_or_else(|| TkvsError::InvalidMessage("encoded message must end with a newline".into()))?;

    let tokens = tokenize(line)?;
    let (command, args) = tokens
        .split_first()
        .ok_or_else(|| TkvsError::InvalidMessage("encoded message is empty".into()))?;

    let message_type = MessageType::from_wire_name(command)
        .ok_or_else(|| TkvsError::InvalidMessage(format!("unknown command: {}", command)))?;

    let msg = Message::with_args(message_type, args.iter().cloned());
    if !msg.is_valid() {
        return Err(TkvsError::InvalidMessage(format!(
            "malformed {} message",
            command
        )));
    }
    Ok(msg)
}

/// Reads one newline-terminated frame from `reader`, returning `None` at
/// end of stream.
///
/// Reads at most one byte past [`Message::MAX_ENCODED_LEN`] so an over-long
/// line surfaces as a decode failure rather than unbounded buffering.
///
/// # Errors
/// fails with [`TkvsError::Comm`] if the underlying read fails
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut raw = Vec::new();
    let limit = (Message::MAX_ENCODED_LEN + 1) as u64;
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(raw))
}

/// decodes a raw frame as read by [`read_frame`]
///
/// # Errors
/// fails with [`TkvsError::InvalidMessage`] if the frame is not UTF-8 or
/// does not decode to a valid message
pub fn decode_frame(raw: &[u8]) -> Result<Message> {
    let line = std::str::from_utf8(raw)
        .map_err(|_| TkvsError::InvalidMessage("message is not valid UTF-8".into()))?;
    decode(line)
}

/// splits a line into bare and quoted tokens. A quoted token preserves its
/// interior exactly and must be followed by whitespace or end of line.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut rest = line;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(opened) = rest.strip_prefix('"') {
            let end = opened.find('"').ok_or_else(|| {
                TkvsError::InvalidMessage("unterminated quoted argument".into())
            })?;
            tokens.push(opened[..end].to_string());
            rest = &opened[end + 1..];
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                return Err(TkvsError::InvalidMessage(
                    "quoted argument not followed by whitespace".into(),
                ));
            }
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            tokens.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }
    Ok(tokens)
}
