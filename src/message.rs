//! Request and response messages exchanged between clients and the server.

/// The closed set of message types in the wire protocol.
///
/// `Login` through `Bye` are requests sent by clients, `Ok` through `Data`
/// are responses sent by the server. `None` is the sentinel type of a
/// default-constructed [`Message`] and is never valid on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// sentinel for a message that has not been given a type
    None,
    /// authenticate with a username; must be the first request of a session
    Login,
    /// create a new, empty table
    Create,
    /// push a value onto the operand stack
    Push,
    /// discard the top of the operand stack
    Pop,
    /// read the top of the operand stack without removing it
    Top,
    /// pop a value and store it under a table key
    Set,
    /// read a table key and push the value onto the operand stack
    Get,
    /// pop two operands, push their sum
    Add,
    /// pop two operands, push their difference
    Sub,
    /// pop two operands, push their product
    Mul,
    /// pop two operands, push their quotient
    Div,
    /// start an explicit transaction
    Begin,
    /// commit the current transaction
    Commit,
    /// end the session
    Bye,
    /// success response
    Ok,
    /// response to a command that could not be carried out
    Failed,
    /// response to a protocol violation; the connection ends after this
    Error,
    /// response carrying a value
    Data,
}

impl MessageType {
    /// the command token used for this type on the wire.
    /// `None` has no wire representation.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            MessageType::None => None,
            MessageType::Login => Some("LOGIN"),
            MessageType::Create => Some("CREATE"),
            MessageType::Push => Some("PUSH"),
            MessageType::Pop => Some("POP"),
            MessageType::Top => Some("TOP"),
            MessageType::Set => Some("SET"),
            MessageType::Get => Some("GET"),
            MessageType::Add => Some("ADD"),
            MessageType::Sub => Some("SUB"),
            MessageType::Mul => Some("MUL"),
            MessageType::Div => Some("DIV"),
            MessageType::Begin => Some("BEGIN"),
            MessageType::Commit => Some("COMMIT"),
            MessageType::Bye => Some("BYE"),
            MessageType::Ok => Some("OK"),
            MessageType::Failed => Some("FAILED"),
            MessageType::Error => Some("ERROR"),
            MessageType::Data => Some("DATA"),
        }
    }

    /// parses a command token into a message type
    pub fn from_wire_name(token: &str) -> Option<MessageType> {
        let message_type = match token {
            "LOGIN" => MessageType::Login,
            "CREATE" => MessageType::Create,
            "PUSH" => MessageType::Push,
            "POP" => MessageType::Pop,
            "TOP" => MessageType::Top,
            "SET" => MessageType::Set,
            "GET" => MessageType::Get,
            "ADD" => MessageType::Add,
            "SUB" => MessageType::Sub,
            "MUL" => MessageType::Mul,
            "DIV" => MessageType::Div,
            "BEGIN" => MessageType::Begin,
            "COMMIT" => MessageType::Commit,
            "BYE" => MessageType::Bye,
            "OK" => MessageType::Ok,
            "FAILED" => MessageType::Failed,
            "ERROR" => MessageType::Error,
            "DATA" => MessageType::Data,
            _ => return None,
        };
        Some(message_type)
    }

    /// the exact number of arguments this type carries
    pub fn arity(self) -> usize {
        match self {
            MessageType::Login
            | MessageType::Create
            | MessageType::Push
            | MessageType::Failed
            | MessageType::Error
            | MessageType::Data => 1,
            MessageType::Set | MessageType::Get => 2,
            _ => 0,
        }
    }

    /// true for the types a client may send
    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::Login
                | MessageType::Create
                | MessageType::Push
                | MessageType::Pop
                | MessageType::Top
                | MessageType::Set
                | MessageType::Get
                | MessageType::Add
                | MessageType::Sub
                | MessageType::Mul
                | MessageType::Div
                | MessageType::Begin
                | MessageType::Commit
                | MessageType::Bye
        )
    }
}

/// A single protocol message: a type plus its ordered argument vector.
///
/// Usernames, table names, and keys are identifiers
/// (`^[A-Za-z][A-Za-z0-9_]*$`). Values are non-empty strings containing no
/// whitespace and no `"`. The quoted-text argument of FAILED and ERROR
/// responses may contain spaces; it is stored here without the surrounding
/// quotes, which exist only in the encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    args: Vec<String>,
}

impl Message {
    /// maximum length of an encoded message in bytes, including the
    /// terminating newline
    pub const MAX_ENCODED_LEN: usize = 1024;

    /// creates a message of the given type with no arguments
    pub fn new(message_type: MessageType) -> Self {
        Message {
            message_type,
            args: Vec::new(),
        }
    }

    /// creates a message of the given type with the given arguments
    /// # Example
    /// ```rust
    /// use tkvs::{Message, MessageType};
    /// let msg = Message::with_args(MessageType::Set, ["accounts", "acct123"]);
    /// assert!(msg.is_valid());
    /// ```
    pub fn with_args<I, S>(message_type: MessageType, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message {
            message_type,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// this message's type
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// the raw argument vector
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// appends an argument
    pub fn push_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// the username of a LOGIN request
    pub fn username(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Login => self.arg(0),
            _ => None,
        }
    }

    /// the table name of a CREATE, SET, or GET request
    pub fn table(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Create | MessageType::Set | MessageType::Get => self.arg(0),
            _ => None,
        }
    }

    /// the key of a SET or GET request
    pub fn key(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Set | MessageType::Get => self.arg(1),
            _ => None,
        }
    }

    /// the value of a PUSH request or DATA response
    pub fn value(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Push | MessageType::Data => self.arg(0),
            _ => None,
        }
    }

    /// the free-text reason of a FAILED or ERROR response
    pub fn quoted_text(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Failed | MessageType::Error => self.arg(0),
            _ => None,
        }
    }

    /// checks that this message conforms to the protocol: the argument count
    /// matches the type's arity and every argument satisfies the constraint
    /// of its slot
    pub fn is_valid(&self) -> bool {
        if self.message_type == MessageType::None {
            return false;
        }
        if self.args.len() != self.message_type.arity() {
            return false;
        }

        match self.message_type {
            MessageType::Login | MessageType::Create => is_identifier(&self.args[0]),
            MessageType::Set | MessageType::Get => {
                is_identifier(&self.args[0]) && is_identifier(&self.args[1])
            }
            MessageType::Push | MessageType::Data => is_value(&self.args[0]),
            MessageType::Failed | MessageType::Error => is_quoted_text(&self.args[0]),
            _ => true,
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new(MessageType::None)
    }
}

/// true if `s` matches `^[A-Za-z][A-Za-z0-9_]*$`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// true if `s` is usable as a value: non-empty, no whitespace, no `"`
pub fn is_value(s: &str) -> bool {
    !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '"')
}

// Quoted text carries spaces, but the quoted form has no escape syntax, so a
// `"` or a newline inside it could not survive a round trip.
fn is_quoted_text(s: &str) -> bool {
    !s.is_empty() && !s.contains(['"', '\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_invalid() {
        let m = Message::default();
        assert_eq!(m.message_type(), MessageType::None);
        assert!(!m.is_valid());
    }

    #[test]
    fn accessors_return_slot_values() {
        let login = Message::with_args(MessageType::Login, ["alice"]);
        assert_eq!(login.username(), Some("alice"));
        assert_eq!(login.table(), None);

        let set = Message::with_args(MessageType::Set, ["accounts", "acct123"]);
        assert_eq!(set.table(), Some("accounts"));
        assert_eq!(set.key(), Some("acct123"));
        assert_eq!(set.value(), None);

        let push = Message::with_args(MessageType::Push, ["47374"]);
        assert_eq!(push.value(), Some("47374"));

        let failed = Message::with_args(MessageType::Failed, ["The operation failed"]);
        assert_eq!(failed.quoted_text(), Some("The operation failed"));
    }

    #[test]
    fn valid_messages() {
        assert!(Message::with_args(MessageType::Login, ["alice"]).is_valid());
        assert!(Message::with_args(MessageType::Create, ["accounts"]).is_valid());
        // underscores in identifiers are legal (if not the first character)
        assert!(Message::with_args(MessageType::Create, ["line_items"]).is_valid());
        assert!(Message::with_args(MessageType::Push, ["47374"]).is_valid());
        assert!(Message::new(MessageType::Pop).is_valid());
        assert!(Message::new(MessageType::Add).is_valid());
        assert!(Message::new(MessageType::Bye).is_valid());
        assert!(Message::new(MessageType::Ok).is_valid());
        assert!(Message::with_args(MessageType::Data, ["10012"]).is_valid());
        assert!(Message::with_args(MessageType::Failed, ["The operation failed"]).is_valid());
    }

    #[test]
    fn invalid_messages() {
        // too many args
        assert!(!Message::with_args(MessageType::Login, ["bob", "extra"]).is_valid());
        // arg is not an identifier
        assert!(!Message::with_args(MessageType::Create, ["8foobar"]).is_valid());
        assert!(!Message::with_args(MessageType::Create, ["_foobar"]).is_valid());
        assert!(!Message::with_args(MessageType::Get, ["tbl", "bad key"]).is_valid());
        // missing argument
        assert!(!Message::new(MessageType::Data).is_valid());
        // values may not be empty or contain whitespace or quotes
        assert!(!Message::with_args(MessageType::Push, [""]).is_valid());
        assert!(!Message::with_args(MessageType::Push, ["two words"]).is_valid());
        assert!(!Message::with_args(MessageType::Push, ["say\"cheese"]).is_valid());
        // quoted text cannot carry a quote character
        assert!(!Message::with_args(MessageType::Error, ["a \" b"]).is_valid());
    }

    #[test]
    fn request_and_response_types() {
        assert!(MessageType::Login.is_request());
        assert!(MessageType::Bye.is_request());
        assert!(!MessageType::Ok.is_request());
        assert!(!MessageType::Data.is_request());
        assert!(!MessageType::None.is_request());
    }

    #[test]
    fn identifier_predicate() {
        assert!(is_identifier("a"));
        assert!(is_identifier("Account_9"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier("no-dash"));
        assert!(!is_identifier("späce"));
    }
}
