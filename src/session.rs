//! The per-client state machine: command dispatch, the operand stack, the
//! locks-held set, and autocommit/transaction routing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{BufRead, Write};

use tracing::debug;

use crate::codec;
use crate::error::{Result, TkvsError};
use crate::message::{Message, MessageType};
use crate::registry::Registry;
use crate::table::{Table, TableGuard};
use crate::value_stack::ValueStack;

/// what the dispatcher tells the request loop to do next
enum Outcome {
    Continue,
    Goodbye,
}

/// One client's session with the store.
///
/// A session reads framed requests from `reader`, dispatches them, and
/// writes one response per request to `writer`. It is generic over the
/// stream halves so production code can hand it the two sides of a
/// `TcpStream` while tests drive it from in-memory buffers.
///
/// Error handling follows the protocol's three response paths:
/// [`TkvsError::InvalidMessage`] answers ERROR and ends the session,
/// [`TkvsError::Operation`] and [`TkvsError::FailedTransaction`] roll back
/// any open transaction and answer FAILED, and [`TkvsError::Comm`] ends the
/// session without a response. Every exit path, including communication
/// failures, unwinds an open transaction and releases its table locks.
pub struct Session<R: BufRead, W: Write> {
    registry: Registry,
    reader: R,
    writer: W,
    stack: ValueStack,
    username: Option<String>,
    // None in autocommit mode; in a transaction, the guards of every table
    // locked so far, keyed by table name
    transaction: Option<HashMap<String, TableGuard>>,
}

impl<R: BufRead, W: Write> Session<R, W> {
    /// creates a session over the given stream halves
    pub fn new(registry: Registry, reader: R, writer: W) -> Self {
        Session {
            registry,
            reader,
            writer,
            stack: ValueStack::new(),
            username: None,
            transaction: None,
        }
    }

    /// Serves the client until it says BYE, closes the connection, or
    /// violates the protocol.
    ///
    /// # Errors
    /// returns [`TkvsError::Comm`] if the connection failed mid-session;
    /// protocol-level failures are reported to the peer, not the caller
    pub fn chat(&mut self) -> Result<()> {
        let outcome = self.request_loop();
        // unconditional unwind: a transaction left open by BYE, EOF, a
        // protocol violation, or an I/O error must release its locks
        self.rollback_transaction();
        outcome
    }

    fn request_loop(&mut self) -> Result<()> {
        loop {
            let raw = match codec::read_frame(&mut self.reader)? {
                Some(raw) => raw,
                None => return Ok(()),
            };
            let request = match self.parse_request(&raw) {
                Ok(request) => request,
                Err(err) => {
                    self.send_error(&err)?;
                    return Ok(());
                }
            };

            match self.dispatch(&request) {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Goodbye) => return Ok(()),
                Err(err @ TkvsError::Operation(_)) => {
                    self.rollback_transaction();
                    self.send_failed(&err)?;
                }
                Err(err @ TkvsError::FailedTransaction(_)) => {
                    self.rollback_transaction();
                    self.send_failed(&err)?;
                }
                Err(err @ TkvsError::InvalidMessage(_)) => {
                    self.send_error(&err)?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn parse_request(&self, raw: &[u8]) -> Result<Message> {
        let request = codec::decode_frame(raw)?;

        if !request.message_type().is_request() {
            return Err(TkvsError::InvalidMessage("not a request message".into()));
        }
        if self.username.is_none() && request.message_type() != MessageType::Login {
            return Err(TkvsError::InvalidMessage("first message must be LOGIN".into()));
        }
        Ok(request)
    }

    fn dispatch(&mut self, request: &Message) -> Result<Outcome> {
        debug!(user = self.username.as_deref(), request = ?request.message_type(), "dispatching");
        match request.message_type() {
            MessageType::Login => self.handle_login(request),
            MessageType::Create => self.handle_create(request),
            MessageType::Push => self.handle_push(request),
            MessageType::Pop => self.handle_pop(),
            MessageType::Top => self.handle_top(),
            MessageType::Set => self.handle_set(request),
            MessageType::Get => self.handle_get(request),
            MessageType::Add | MessageType::Sub | MessageType::Mul | MessageType::Div => {
                self.handle_arithmetic(request.message_type())
            }
            MessageType::Begin => self.handle_begin(),
            MessageType::Commit => self.handle_commit(),
            MessageType::Bye => self.handle_bye(),
            // parse_request only lets requests through
            _ => Err(TkvsError::InvalidMessage("not a request message".into())),
        }
    }

    // repeat LOGIN is idempotent; the first-message rule applies only to
    // the first command of the connection
    fn handle_login(&mut self, request: &Message) -> Result<Outcome> {
        self.username = Some(request.username().unwrap_or_default().to_string());
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_create(&mut self, request: &Message) -> Result<Outcome> {
        self.registry
            .create_table(request.table().unwrap_or_default())?;
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_push(&mut self, request: &Message) -> Result<Outcome> {
        self.stack.push(request.value().unwrap_or_default());
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_pop(&mut self) -> Result<Outcome> {
        self.stack.pop()?;
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_top(&mut self) -> Result<Outcome> {
        let value = self.stack.peek()?.to_string();
        self.send(&Message::with_args(MessageType::Data, [value]))?;
        Ok(Outcome::Continue)
    }

    fn handle_set(&mut self, request: &Message) -> Result<Outcome> {
        // the value is popped before the table lookup and is not restored
        // if the lookup fails
        let value = self.stack.pop()?;
        let table = self.lookup(request.table().unwrap_or_default())?;
        let key = request.key().unwrap_or_default();

        match self.transaction.as_mut() {
            Some(held) => {
                let guard = acquire_for_transaction(held, &table)?;
                guard.set(key, value);
            }
            None => {
                let mut guard = table.lock();
                guard.set(key, value);
                guard.commit_changes();
            }
        }
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_get(&mut self, request: &Message) -> Result<Outcome> {
        let table = self.lookup(request.table().unwrap_or_default())?;
        let key = request.key().unwrap_or_default();

        let value = match self.transaction.as_mut() {
            Some(held) => acquire_for_transaction(held, &table)?.get(key)?,
            None => table.lock().get(key)?,
        };
        self.stack.push(value);
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_arithmetic(&mut self, op: MessageType) -> Result<Outcome> {
        let right = self.stack.pop()?;
        let left = match self.stack.pop() {
            Ok(left) => left,
            Err(_) => {
                self.stack.push(right);
                return Err(TkvsError::Operation("not enough operands".into()));
            }
        };

        // on any operand failure the stack is restored to its prior state
        let (a, b) = match (parse_operand(&left), parse_operand(&right)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                self.stack.push(left);
                self.stack.push(right);
                return Err(TkvsError::Operation("non-integer operand".into()));
            }
        };
        if op == MessageType::Div && b == 0 {
            self.stack.push(left);
            self.stack.push(right);
            return Err(TkvsError::Operation("division by zero".into()));
        }

        // ADD, SUB, and DIV are 32-bit; MUL widens so the product of any
        // two 32-bit operands is exact
        let result: i64 = match op {
            MessageType::Add => i64::from(a.wrapping_add(b)),
            MessageType::Sub => i64::from(a.wrapping_sub(b)),
            MessageType::Mul => i64::from(a) * i64::from(b),
            MessageType::Div => i64::from(a.wrapping_div(b)),
            _ => unreachable!("dispatch only routes arithmetic types here"),
        };
        self.stack.push(result.to_string());
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_begin(&mut self) -> Result<Outcome> {
        if self.transaction.is_some() {
            return Err(TkvsError::FailedTransaction(
                "transaction already in progress".into(),
            ));
        }
        self.transaction = Some(HashMap::new());
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    fn handle_commit(&mut self) -> Result<Outcome> {
        let held = self.transaction.take().ok_or_else(|| {
            TkvsError::Operation("no transaction in progress".into())
        })?;
        for (_, mut guard) in held {
            guard.commit_changes();
            // the guard drops here, so each lock is released only after
            // its table's changes are committed
        }
        debug!(user = self.username.as_deref(), "transaction committed");
        self.send_ok()?;
        Ok(Outcome::Continue)
    }

    // BYE answers OK first; the rollback of an open transaction happens in
    // the session exit path
    fn handle_bye(&mut self) -> Result<Outcome> {
        self.send_ok()?;
        Ok(Outcome::Goodbye)
    }

    fn rollback_transaction(&mut self) {
        if let Some(held) = self.transaction.take() {
            for (_, mut guard) in held {
                guard.rollback_changes();
            }
            debug!(user = self.username.as_deref(), "transaction rolled back");
        }
    }

    fn lookup(&self, name: &str) -> Result<Table> {
        self.registry
            .find_table(name)
            .ok_or_else(|| TkvsError::Operation(format!("no such table: {}", name)))
    }

    fn send(&mut self, response: &Message) -> Result<()> {
        let encoded = codec::encode(response)?;
        self.writer.write_all(encoded.as_bytes())?;
        self.writer.flush()?;
        debug!(user = self.username.as_deref(), response = ?response.message_type(), "response sent");
        Ok(())
    }

    fn send_ok(&mut self) -> Result<()> {
        self.send(&Message::new(MessageType::Ok))
    }

    fn send_failed(&mut self, err: &TkvsError) -> Result<()> {
        self.send(&Message::with_args(MessageType::Failed, [err.to_string()]))
    }

    fn send_error(&mut self, err: &TkvsError) -> Result<()> {
        self.send(&Message::with_args(MessageType::Error, [err.to_string()]))
    }
}

/// In a transaction a table lock already held is reused; otherwise the lock
/// must be available immediately or the transaction fails. Transactions
/// never wait on a lock, so no cycle of waiters can form.
fn acquire_for_transaction<'a>(
    held: &'a mut HashMap<String, TableGuard>,
    table: &Table,
) -> Result<&'a mut TableGuard> {
    match held.entry(table.name().to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(slot) => {
            let guard = table.try_lock().ok_or_else(|| {
                TkvsError::FailedTransaction(format!(
                    "table {} is locked by another session",
                    table.name()
                ))
            })?;
            Ok(slot.insert(guard))
        }
    }
}

/// parses an operand matching `^-?[0-9]+$` into an i32; anything else,
/// including an in-pattern value outside the i32 range, is rejected
fn parse_operand(s: &str) -> Option<i32> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// feeds a scripted request stream to a fresh session and returns
    /// everything the session wrote back
    fn run_session(registry: &Registry, script: &str) -> String {
        let mut output = Vec::new();
        let reader = Cursor::new(script.as_bytes().to_vec());
        let mut session = Session::new(registry.clone(), reader, &mut output);
        session.chat().expect("in-memory session should not fail");
        drop(session);
        String::from_utf8(output).expect("responses are UTF-8")
    }

    fn committed(registry: &Registry, table: &str, key: &str) -> Result<String> {
        registry.find_table(table).expect("table exists").lock().get(key)
    }

    #[test]
    fn create_set_get_round_trip() {
        let registry = Registry::new();
        let output = run_session(
            &registry,
            "LOGIN a\nCREATE t\nPUSH 5\nSET t k\nGET t k\nTOP\nBYE\n",
        );
        assert_eq!(output, "OK\nOK\nOK\nOK\nOK\nDATA 5\nOK\n");
        assert_eq!(committed(&registry, "t", "k").unwrap(), "5");
    }

    #[test]
    fn arithmetic_add() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 3\nPUSH 4\nADD\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\nDATA 7\nOK\n");
    }

    #[test]
    fn arithmetic_sub_and_div_and_negative_operands() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 10\nPUSH 4\nSUB\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\nDATA 6\nOK\n");

        let output = run_session(&registry, "LOGIN a\nPUSH -5\nPUSH 3\nADD\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\nDATA -2\nOK\n");

        let output = run_session(&registry, "LOGIN a\nPUSH 17\nPUSH 5\nDIV\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\nDATA 3\nOK\n");
    }

    #[test]
    fn arithmetic_mul_is_exact_for_large_operands() {
        let registry = Registry::new();
        let output = run_session(
            &registry,
            "LOGIN a\nPUSH 2000000000\nPUSH 2000000000\nMUL\nTOP\nBYE\n",
        );
        assert_eq!(output, "OK\nOK\nOK\nOK\nDATA 4000000000000000000\nOK\n");
    }

    #[test]
    fn division_by_zero_fails_and_restores_operands() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 10\nPUSH 0\nDIV\nTOP\nBYE\n");
        assert_eq!(
            output,
            "OK\nOK\nOK\nFAILED \"division by zero\"\nDATA 0\nOK\n"
        );
    }

    #[test]
    fn non_integer_operand_fails_and_restores_operands() {
        let registry = Registry::new();
        let output = run_session(
            &registry,
            "LOGIN a\nPUSH foo\nPUSH 3\nADD\nTOP\nPOP\nTOP\nBYE\n",
        );
        assert_eq!(
            output,
            "OK\nOK\nOK\nFAILED \"non-integer operand\"\nDATA 3\nOK\nDATA foo\nOK\n"
        );
    }

    #[test]
    fn out_of_range_operand_is_not_an_integer() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 1\nPUSH 99999999999\nADD\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nFAILED \"non-integer operand\"\nOK\n");
    }

    #[test]
    fn arithmetic_underflow_restores_the_single_operand() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 1\nADD\nTOP\nBYE\n");
        assert_eq!(
            output,
            "OK\nOK\nFAILED \"not enough operands\"\nDATA 1\nOK\n"
        );
    }

    #[test]
    fn duplicate_create_fails_but_session_continues() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nCREATE t\nCREATE t\nBYE\n");
        assert_eq!(output, "OK\nOK\nFAILED \"table already exists: t\"\nOK\n");
    }

    #[test]
    fn nested_begin_fails_and_rolls_back() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        let output = run_session(
            &registry,
            "LOGIN a\nBEGIN\nPUSH 5\nSET t k\nBEGIN\nBYE\n",
        );
        assert_eq!(
            output,
            "OK\nOK\nOK\nOK\nFAILED \"transaction already in progress\"\nOK\n"
        );
        // the first transaction's tentative write was rolled back
        assert!(matches!(
            committed(&registry, "t", "k"),
            Err(TkvsError::Operation(_))
        ));
    }

    #[test]
    fn first_message_must_be_login() {
        let registry = Registry::new();
        let output = run_session(&registry, "CREATE t\nLOGIN a\n");
        // the session ends after the ERROR; the later LOGIN is never read
        assert_eq!(output, "ERROR \"first message must be LOGIN\"\n");
        assert!(registry.find_table("t").is_none());
    }

    #[test]
    fn repeat_login_is_idempotent() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nLOGIN b\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\n");
    }

    #[test]
    fn malformed_request_ends_the_session() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nCREATE 9lives\nBYE\n");
        assert_eq!(output, "OK\nERROR \"malformed CREATE message\"\n");

        let output = run_session(&registry, "LOGIN a\nFROB\nBYE\n");
        assert_eq!(output, "OK\nERROR \"unknown command: FROB\"\n");
    }

    #[test]
    fn response_types_are_rejected_as_requests() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nOK\nBYE\n");
        assert_eq!(output, "OK\nERROR \"not a request message\"\n");
    }

    #[test]
    fn overlong_request_line_ends_the_session() {
        let registry = Registry::new();
        let script = format!("LOGIN a\nPUSH {}\nBYE\n", "x".repeat(2000));
        let output = run_session(&registry, &script);
        assert_eq!(
            output,
            "OK\nERROR \"encoded message exceeds maximum length\"\n"
        );
    }

    #[test]
    fn set_and_get_without_a_table_fail() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nPUSH 5\nSET t k\nBYE\n");
        assert_eq!(output, "OK\nOK\nFAILED \"no such table: t\"\nOK\n");

        let output = run_session(&registry, "LOGIN a\nGET t k\nBYE\n");
        assert_eq!(output, "OK\nFAILED \"no such table: t\"\nOK\n");
    }

    #[test]
    fn get_of_missing_key_fails() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        let output = run_session(&registry, "LOGIN a\nGET t nope\nBYE\n");
        assert_eq!(output, "OK\nFAILED \"no such key: nope\"\nOK\n");
    }

    #[test]
    fn set_with_empty_stack_fails() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        let output = run_session(&registry, "LOGIN a\nSET t k\nBYE\n");
        assert_eq!(output, "OK\nFAILED \"stack is empty\"\nOK\n");
    }

    #[test]
    fn committed_transaction_is_visible_to_later_sessions() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();

        let output = run_session(
            &registry,
            "LOGIN a\nBEGIN\nPUSH 42\nSET t k\nCOMMIT\nBYE\n",
        );
        assert_eq!(output, "OK\nOK\nOK\nOK\nOK\nOK\n");

        let output = run_session(&registry, "LOGIN b\nGET t k\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nDATA 42\nOK\n");
    }

    #[test]
    fn operation_failure_inside_a_transaction_rolls_it_back() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        run_session(&registry, "LOGIN a\nPUSH 1\nSET t k\nBYE\n");

        let output = run_session(
            &registry,
            "LOGIN a\nBEGIN\nPUSH 9\nSET t k\nGET t missing\nGET t k\nTOP\nBYE\n",
        );
        // the failed GET rolled back the tentative 9; the later GET runs in
        // autocommit mode and sees the committed 1
        assert_eq!(
            output,
            "OK\nOK\nOK\nOK\nFAILED \"no such key: missing\"\nOK\nDATA 1\nOK\n"
        );
        assert_eq!(committed(&registry, "t", "k").unwrap(), "1");
    }

    #[test]
    fn commit_without_begin_fails() {
        let registry = Registry::new();
        let output = run_session(&registry, "LOGIN a\nCOMMIT\nBYE\n");
        assert_eq!(output, "OK\nFAILED \"no transaction in progress\"\nOK\n");
    }

    #[test]
    fn transactional_reads_see_own_tentative_writes() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        let output = run_session(
            &registry,
            "LOGIN a\nBEGIN\nPUSH 7\nSET t k\nGET t k\nTOP\nCOMMIT\nBYE\n",
        );
        assert_eq!(output, "OK\nOK\nOK\nOK\nOK\nDATA 7\nOK\nOK\n");
    }

    #[test]
    fn transaction_fails_fast_when_a_table_is_locked() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();

        let table = registry.find_table("t").unwrap();
        let guard = table.lock();
        let output = run_session(&registry, "LOGIN a\nBEGIN\nPUSH 5\nSET t k\nBYE\n");
        assert_eq!(
            output,
            "OK\nOK\nOK\nFAILED \"table t is locked by another session\"\nOK\n"
        );
        drop(guard);

        // the lock is free again and nothing was written
        assert!(matches!(
            committed(&registry, "t", "k"),
            Err(TkvsError::Operation(_))
        ));
    }

    #[test]
    fn disconnect_mid_transaction_rolls_back() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();
        run_session(&registry, "LOGIN a\nPUSH 1\nSET t k\nBYE\n");

        // the stream ends without BYE or COMMIT
        let output = run_session(&registry, "LOGIN a\nBEGIN\nPUSH 9\nSET t k\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\n");

        let output = run_session(&registry, "LOGIN b\nGET t k\nTOP\nBYE\n");
        assert_eq!(output, "OK\nOK\nDATA 1\nOK\n");
    }

    #[test]
    fn bye_mid_transaction_rolls_back_after_the_ok() {
        let registry = Registry::new();
        registry.create_table("t").unwrap();

        let output = run_session(&registry, "LOGIN a\nBEGIN\nPUSH 9\nSET t k\nBYE\n");
        assert_eq!(output, "OK\nOK\nOK\nOK\nOK\n");
        assert!(matches!(
            committed(&registry, "t", "k"),
            Err(TkvsError::Operation(_))
        ));
    }

    #[test]
    fn transaction_may_span_multiple_tables() {
        let registry = Registry::new();
        registry.create_table("t1").unwrap();
        registry.create_table("t2").unwrap();

        let output = run_session(
            &registry,
            "LOGIN a\nBEGIN\nPUSH 1\nSET t1 k\nPUSH 2\nSET t2 k\nCOMMIT\nBYE\n",
        );
        assert_eq!(output, "OK\nOK\nOK\nOK\nOK\nOK\nOK\nOK\n");
        assert_eq!(committed(&registry, "t1", "k").unwrap(), "1");
        assert_eq!(committed(&registry, "t2", "k").unwrap(), "2");
    }
}
