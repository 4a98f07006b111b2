use std::io::{BufReader, BufWriter, Error, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::codec;
use crate::error::{Result, TkvsError};
use crate::message::{Message, MessageType};

/// A blocking protocol client for talking to a [`TkvsServer`].
///
/// One method per request type; each sends the request, reads one framed
/// response, and re-throws a FAILED response as [`TkvsError::Operation`]
/// and an ERROR response as [`TkvsError::InvalidMessage`], carrying the
/// server's reason text.
///
/// [`TkvsServer`]: crate::TkvsServer
pub struct TkvsClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TkvsClient {
    /// establishes a connection to the server at `addr` and logs in as
    /// `username`, which the protocol requires before anything else
    pub fn connect<A: ToSocketAddrs>(addr: A, username: &str) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;

        let mut client = TkvsClient {
            reader: BufReader::new(tcp_reader),
            writer: BufWriter::new(tcp_writer),
        };
        client.expect_ok(&Message::with_args(MessageType::Login, [username]))?;
        Ok(client)
    }

    /// creates a new table named `table`
    pub fn create_table(&mut self, table: &str) -> Result<()> {
        self.expect_ok(&Message::with_args(MessageType::Create, [table]))
    }

    /// pushes `value` onto the session's operand stack
    pub fn push(&mut self, value: &str) -> Result<()> {
        self.expect_ok(&Message::with_args(MessageType::Push, [value]))
    }

    /// discards the top of the operand stack
    pub fn pop(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Pop))
    }

    /// reads the top of the operand stack without removing it
    pub fn top(&mut self) -> Result<String> {
        let response = self.request(&Message::new(MessageType::Top))?;
        match response.value() {
            Some(value) if response.message_type() == MessageType::Data => {
                Ok(value.to_string())
            }
            _ => Err(unexpected(&response)),
        }
    }

    /// pops the top of the operand stack into `table[key]`
    pub fn set(&mut self, table: &str, key: &str) -> Result<()> {
        self.expect_ok(&Message::with_args(MessageType::Set, [table, key]))
    }

    /// pushes the value of `table[key]` onto the operand stack
    pub fn get(&mut self, table: &str, key: &str) -> Result<()> {
        self.expect_ok(&Message::with_args(MessageType::Get, [table, key]))
    }

    /// pops two operands and pushes their sum
    pub fn add(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Add))
    }

    /// pops two operands and pushes their difference
    pub fn sub(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Sub))
    }

    /// pops two operands and pushes their product
    pub fn mul(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Mul))
    }

    /// pops two operands and pushes their quotient
    pub fn div(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Div))
    }

    /// starts an explicit transaction
    pub fn begin(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Begin))
    }

    /// commits the current transaction
    pub fn commit(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Commit))
    }

    /// ends the session
    pub fn bye(&mut self) -> Result<()> {
        self.expect_ok(&Message::new(MessageType::Bye))
    }

    /// sends a request and reads its response, re-throwing server-reported
    /// failures as errors
    fn request(&mut self, request: &Message) -> Result<Message> {
        let encoded = codec::encode(request)?;
        self.writer.write_all(encoded.as_bytes())?;
        self.writer.flush()?;

        let raw = codec::read_frame(&mut self.reader)?.ok_or_else(|| TkvsError::Comm {
            source: Error::new(ErrorKind::UnexpectedEof, "server closed the connection"),
        })?;
        let response = codec::decode_frame(&raw)?;

        match response.message_type() {
            MessageType::Failed => Err(TkvsError::Operation(
                response.quoted_text().unwrap_or_default().to_string(),
            )),
            MessageType::Error => Err(TkvsError::InvalidMessage(
                response.quoted_text().unwrap_or_default().to_string(),
            )),
            _ => Ok(response),
        }
    }

    fn expect_ok(&mut self, request: &Message) -> Result<()> {
        let response = self.request(request)?;
        if response.message_type() != MessageType::Ok {
            return Err(unexpected(&response));
        }
        Ok(())
    }
}

fn unexpected(response: &Message) -> TkvsError {
    TkvsError::InvalidMessage(format!(
        "unexpected response: {:?}",
        response.message_type()
    ))
}
