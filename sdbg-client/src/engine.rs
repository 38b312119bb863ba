//! The protocol engine: session handshake, the dispatch state machine, the
//! source-parse sub-state-machine, and outbound commands.
//!
//! The engine is single-threaded and cooperative. [`Engine::advance`] polls
//! the channel without blocking so the caller can interleave local input with
//! server traffic; once a fragmented field has started, the protocol
//! guarantees more data is imminent, so reassembly reads block.

use crate::channel::{Channel, Poll};
use crate::error::SessionError;
use crate::registry::{BreakTarget, BreakpointKey, HitKind, Registry, SourceFunction};
use bytes::Bytes;
use sdbg_protocol::message::{client, family, scope, server, variable};
use sdbg_protocol::{
    fragment, ByteOrder, MessageBuilder, PayloadReader, PointerWidth, StringAssembler,
    StringFamily, PROTOCOL_VERSION, VERSION_FRAME_SIZE,
};
use std::collections::HashSet;

/// What the caller should do next after one engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do; poll again later.
    Wait,
    /// The server is stopped and user input is expected.
    Prompt,
    /// Display this text.
    Text(String),
    /// The session is over; release the channel.
    End,
}

/// Immutable-after-handshake session facts.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub byte_order: ByteOrder,
    pub pointer_width: PointerWidth,
    /// Largest message (type byte + payload) either side may send.
    pub max_message_size: u8,
    pub version: u32,
}

/// A client-supplied file for WAIT_FOR_SOURCE.
#[derive(Debug, Clone)]
pub struct ClientSource {
    pub name: String,
    pub contents: String,
}

/// Supplies the files the client wants executed, one per WAIT_FOR_SOURCE.
pub trait SourceSupplier {
    /// The next file, or `None` when no more remain.
    fn next_source(&mut self) -> Option<ClientSource>;
}

/// A supplier with nothing to run; the server is told so immediately.
#[derive(Debug, Default)]
pub struct NoSources;

impl SourceSupplier for NoSources {
    fn next_source(&mut self) -> Option<ClientSource> {
        None
    }
}

impl SourceSupplier for Vec<ClientSource> {
    fn next_source(&mut self) -> Option<ClientSource> {
        if self.is_empty() {
            None
        } else {
            Some(self.remove(0))
        }
    }
}

/// Engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Lines of source shown around a stop location; 0 disables the window.
    pub display_lines: u32,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_lines(mut self, lines: u32) -> Self {
        self.display_lines = lines;
        self
    }
}

/// Outcome of a set-breakpoint request. Every variant carries display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetBreakpoint {
    /// At least one breakpoint became active.
    Active(String),
    /// Nothing matched; the request was stored as a pending breakpoint.
    Pending(String),
    /// Nothing matched and pending registration was not requested.
    NotFound(String),
    /// The request itself was malformed; recoverable.
    Invalid(String),
}

impl SetBreakpoint {
    pub fn text(&self) -> &str {
        match self {
            SetBreakpoint::Active(text)
            | SetBreakpoint::Pending(text)
            | SetBreakpoint::NotFound(text)
            | SetBreakpoint::Invalid(text) => text,
        }
    }
}

/// A connected debugging session.
pub struct Engine<C: Channel> {
    channel: C,
    session: Session,
    registry: Registry,
    sources: Box<dyn SourceSupplier>,
    config: EngineConfig,
    /// A stop notification owes the caller a prompt once traffic drains.
    prompt_owed: bool,
    last_hit: Option<BreakpointKey>,
    backtrace_depth: u32,
}

impl<C: Channel> Engine<C> {
    /// Connects and performs the two-message handshake: the fixed version
    /// frame, then the configuration message.
    pub fn connect(
        mut channel: C,
        config: EngineConfig,
        sources: Box<dyn SourceSupplier>,
    ) -> Result<Self, SessionError> {
        let version_frame = channel.connect()?;
        if version_frame.len() != VERSION_FRAME_SIZE || version_frame[0] != server::VERSION {
            return Err(SessionError::MalformedFrame("unexpected version frame"));
        }
        let byte_order = ByteOrder::from_flag(version_frame[1]);
        let version = PayloadReader::new(&version_frame[2..], byte_order).read_u32()?;
        if version != PROTOCOL_VERSION {
            return Err(SessionError::ProtocolVersionMismatch {
                server: version,
                client: PROTOCOL_VERSION,
            });
        }

        let configuration = match channel.get_message(true)? {
            Poll::Ready(data) => data,
            Poll::Empty | Poll::Closed => return Err(SessionError::ConnectionLost),
        };
        let mut reader = PayloadReader::new(&configuration, byte_order);
        if reader.read_u8()? != server::CONFIGURATION {
            return Err(SessionError::MalformedFrame("configuration message expected"));
        }
        let max_message_size = reader.read_u8()?;
        let pointer_byte = reader.read_u8()?;
        reader.expect_end()?;
        let pointer_width = PointerWidth::from_config(pointer_byte)
            .map_err(|_| SessionError::UnsupportedPointerWidth(pointer_byte))?;

        tracing::debug!(
            "session established: {:?} byte order, {}-byte pointers, version {}, max message size {}",
            byte_order,
            pointer_width.size(),
            version,
            max_message_size
        );

        Ok(Self {
            channel,
            session: Session {
                byte_order,
                pointer_width,
                max_message_size,
                version,
            },
            registry: Registry::new(),
            sources,
            config,
            prompt_owed: false,
            last_hit: None,
            backtrace_depth: 0,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs one step of the dispatch loop. `pause_requested` reports that
    /// local input wants the running program stopped; it is honored once with
    /// a step command. An empty poll yields [`Action::Prompt`] when a prompt
    /// is owed, otherwise [`Action::Wait`].
    pub fn advance(&mut self, pause_requested: bool) -> Result<Action, SessionError> {
        let mut pause = pause_requested;
        loop {
            let poll = self.channel.get_message(false)?;
            if pause {
                pause = false;
                self.step()?;
            }
            let data = match poll {
                Poll::Empty => {
                    return Ok(if self.prompt_owed {
                        Action::Prompt
                    } else {
                        Action::Wait
                    });
                }
                Poll::Closed => return Ok(Action::End),
                Poll::Ready(data) => data,
            };
            if let Some(action) = self.dispatch(data)? {
                return Ok(action);
            }
        }
    }

    /// Releases the channel. Idempotent.
    pub fn close(&mut self) {
        self.channel.close();
    }

    fn dispatch(&mut self, data: Bytes) -> Result<Option<Action>, SessionError> {
        let msg_type = *data.first().ok_or(SessionError::MalformedFrame("empty message"))?;
        tracing::debug!("message type {}, payload size {}", msg_type, data.len() - 1);

        match msg_type {
            server::PARSE_ERROR | server::SOURCE_8BIT..=server::SOURCE_16BIT_END => {
                Ok(self.parse_source(data)?.map(Action::Text))
            }
            server::WAITING_AFTER_PENDING => {
                let message =
                    MessageBuilder::new(self.session.byte_order, client::PENDING_RESUME).finish()?;
                self.channel.send_message(&message)?;
                Ok(None)
            }
            server::CLOSE_CONNECTION => Ok(Some(Action::End)),
            server::RELEASE_FUNCTION => {
                self.on_release_function(&data[1..])?;
                Ok(None)
            }
            server::BREAKPOINT_HIT => self.on_hit(false, &data[1..]).map(Some),
            server::EXCEPTION_HIT => self.on_hit(true, &data[1..]).map(Some),
            server::BACKTRACE_TOTAL => {
                let total = PayloadReader::new(&data[1..], self.session.byte_order).read_u32()?;
                self.backtrace_depth = 0;
                Ok(Some(Action::Text(format!(
                    "Total number of frames: {total}\n"
                ))))
            }
            server::BACKTRACE | server::EXCEPTION_BACKTRACE => {
                self.backtrace_frames(&data[1..]).map(Some)
            }
            server::BACKTRACE_END => {
                self.backtrace_depth = 0;
                self.prompt_owed = true;
                Ok(Some(Action::Wait))
            }
            server::EVAL_RESULT_8BIT..=server::EVAL_RESULT_16BIT_END => {
                let text = self.reassemble(family::EVAL_RESULT, data)?;
                self.prompt_owed = true;
                Ok(Some(Action::Text(format!("{text}\n"))))
            }
            server::EVAL_FAILED_8BIT..=server::EVAL_FAILED_16BIT_END => {
                let text = self.reassemble(family::EVAL_FAILED, data)?;
                self.prompt_owed = true;
                Ok(Some(Action::Text(format!("Uncaught exception: {text}\n"))))
            }
            server::SCOPE_CHAIN | server::SCOPE_CHAIN_END => {
                self.on_scope_chain(data).map(Some)
            }
            server::VARIABLE => self.on_variable(&data[1..]),
            server::PRINT_8BIT..=server::PRINT_16BIT_END => {
                let text = self.reassemble(family::PRINT, data)?;
                Ok(Some(Action::Text(text)))
            }
            server::EXCEPTION_8BIT..=server::EXCEPTION_16BIT_END => {
                let text = self.reassemble(family::EXCEPTION, data)?;
                Ok(Some(Action::Text(format!("Exception: {text}\n"))))
            }
            server::WAIT_FOR_SOURCE => {
                self.send_next_source()?;
                Ok(None)
            }
            other => Err(SessionError::UnknownMessage(other)),
        }
    }

    /// The source-parse sub-state-machine. Entered on the first SOURCE_* or
    /// PARSE_ERROR message of a load; blocking-reads until PARSE_DONE commits
    /// the unit, PARSE_ERROR aborts it with the decoded error text, or the
    /// connection drops (which aborts this load only).
    fn parse_source(&mut self, first: Bytes) -> Result<Option<String>, SessionError> {
        let order = self.session.byte_order;
        let width = self.session.pointer_width;

        let mut source_assembler = StringAssembler::new(family::SOURCE);
        let mut source_text = String::new();
        let mut file_assembler = StringAssembler::new(family::FILE_NAME);
        let mut file_name = String::new();
        let mut name_assembler = StringAssembler::new(family::FUNCTION_NAME);
        let mut function_name = String::new();
        let mut locations: Vec<(u32, u32)> = Vec::new();
        let mut parsed: Vec<SourceFunction> = Vec::new();

        let mut data = first;
        loop {
            let msg_type = data[0];
            let payload = &data[1..];

            match msg_type {
                server::PARSE_DONE => break,
                server::PARSE_ERROR => {
                    let text = match self.read_string(family::STRING) {
                        Ok(text) => text,
                        Err(SessionError::ConnectionLost) => {
                            return Ok(Some(source_lost_text()));
                        }
                        Err(other) => return Err(other),
                    };
                    tracing::warn!("parse error reported by server");
                    return Ok(Some(format!("Parse error: {text}\n")));
                }
                server::SOURCE_8BIT..=server::SOURCE_16BIT_END => {
                    if let Some(text) = source_assembler.push(msg_type, payload, order)? {
                        source_text = text;
                    }
                }
                server::FILE_NAME_8BIT..=server::FILE_NAME_16BIT_END => {
                    if let Some(text) = file_assembler.push(msg_type, payload, order)? {
                        file_name = text;
                    }
                }
                server::FUNCTION_NAME_8BIT..=server::FUNCTION_NAME_16BIT_END => {
                    if let Some(text) = name_assembler.push(msg_type, payload, order)? {
                        function_name = text;
                    }
                }
                server::BREAKPOINT_LOCATION => {
                    if payload.len() % 8 != 0 {
                        return Err(SessionError::MalformedFrame(
                            "breakpoint location table length",
                        ));
                    }
                    let mut reader = PayloadReader::new(payload, order);
                    while !reader.is_empty() {
                        let line = reader.read_u32()?;
                        let offset = reader.read_u32()?;
                        locations.push((line, offset));
                    }
                }
                server::FUNCTION_PTR => {
                    let mut reader = PayloadReader::new(payload, order);
                    let handle = reader.read_pointer(width)?;
                    let line = reader.read_u32()?;
                    let column = reader.read_u32()?;
                    reader.expect_end()?;

                    parsed.push(SourceFunction::new(
                        handle,
                        line,
                        column,
                        &source_text,
                        file_name.clone(),
                        std::mem::take(&mut function_name),
                        &locations,
                    ));
                    locations.clear();
                }
                other => return Err(SessionError::UnknownMessage(other)),
            }

            data = match self.read_blocking() {
                Ok(data) => data,
                Err(SessionError::ConnectionLost) => return Ok(Some(source_lost_text())),
                Err(other) => return Err(other),
            };
        }

        // Commit: register every function, then promote matching pendings.
        let mut new_handles = HashSet::with_capacity(parsed.len());
        for function in parsed {
            new_handles.insert(function.handle);
            self.registry.insert_function(function);
        }

        let mut text = String::new();
        if !new_handles.is_empty() && !self.registry.pending_is_empty() {
            let promotions = self.registry.match_pending(&new_handles);
            for (pending_index, keys) in &promotions {
                self.registry.remove_pending(*pending_index);
                for &key in keys {
                    if let Some((index, newly_active)) = self.registry.activate(key) {
                        if newly_active {
                            self.send_breakpoint_update(true, key)?;
                        }
                        text.push_str(&format!(
                            "Breakpoint {index} at {}\n",
                            self.registry.describe(key)
                        ));
                    }
                }
            }
            if !promotions.is_empty() && self.registry.pending_is_empty() {
                self.send_pending_config(false)?;
            }
        }

        Ok(if text.is_empty() { None } else { Some(text) })
    }

    fn on_release_function(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let mut reader = PayloadReader::new(payload, self.session.byte_order);
        let handle = reader.read_pointer(self.session.pointer_width)?;
        reader.expect_end()?;

        if !self.registry.release_function(handle) {
            tracing::warn!("release for unknown function {:#x}", handle);
        }
        let message = MessageBuilder::new(self.session.byte_order, client::FUNCTION_RELEASED)
            .pointer(handle, self.session.pointer_width)
            .finish()?;
        self.send(message)
    }

    fn on_hit(&mut self, exception: bool, payload: &[u8]) -> Result<Action, SessionError> {
        let mut reader = PayloadReader::new(payload, self.session.byte_order);
        let handle = reader.read_pointer(self.session.pointer_width)?;
        let offset = reader.read_u32()?;
        reader.expect_end()?;

        self.prompt_owed = true;
        let Some((key, kind)) = self.registry.resolve_hit(handle, offset) else {
            tracing::warn!("stop at unknown location {:#x}+{}", handle, offset);
            return Ok(Action::Text("Stopped at unknown location\n".to_string()));
        };
        self.last_hit = Some(key);

        let mut text = String::from(if exception { "Exception stopped" } else { "Stopped" });
        text.push_str(match kind {
            HitKind::Exact => " at",
            HitKind::Nearest => " around",
        });
        if let Some(index) = self.registry.active_index_of(key) {
            text.push_str(&format!(" breakpoint:{index}"));
        }
        text.push(' ');
        text.push_str(&self.registry.describe(key));
        text.push('\n');
        if self.config.display_lines > 0 {
            text.push_str(&self.source_window());
        }
        Ok(Action::Text(text))
    }

    fn backtrace_frames(&mut self, payload: &[u8]) -> Result<Action, SessionError> {
        let record = self.session.pointer_width.size() + 4;
        if payload.is_empty() || payload.len() % record != 0 {
            return Err(SessionError::MalformedFrame("backtrace record length"));
        }
        let mut reader = PayloadReader::new(payload, self.session.byte_order);
        let mut text = String::new();
        while !reader.is_empty() {
            let handle = reader.read_pointer(self.session.pointer_width)?;
            let offset = reader.read_u32()?;
            let location = match self.registry.resolve_hit(handle, offset) {
                Some((key, _)) => self.registry.describe(key),
                None => "<unknown>".to_string(),
            };
            text.push_str(&format!("Frame {}: {}\n", self.backtrace_depth, location));
            self.backtrace_depth += 1;
        }
        Ok(Action::Text(text))
    }

    fn on_scope_chain(&mut self, first: Bytes) -> Result<Action, SessionError> {
        let mut tags: Vec<u8> = Vec::new();
        let mut data = first;
        loop {
            tags.extend_from_slice(&data[1..]);
            if data[0] == server::SCOPE_CHAIN_END {
                break;
            }
            data = self.read_blocking()?;
            if data[0] != server::SCOPE_CHAIN && data[0] != server::SCOPE_CHAIN_END {
                return Err(SessionError::MalformedFrame("scope chain interrupted"));
            }
        }

        let mut text = String::new();
        for (index, &tag) in tags.iter().enumerate() {
            text.push_str(&format!("{}: {} scope\n", index, scope_kind_name(tag)));
        }
        self.prompt_owed = true;
        Ok(Action::Text(text))
    }

    fn on_variable(&mut self, payload: &[u8]) -> Result<Option<Action>, SessionError> {
        let mut reader = PayloadReader::new(payload, self.session.byte_order);
        let kind = reader.read_u8()?;
        if kind == variable::END {
            reader.expect_end()?;
            self.prompt_owed = true;
            return Ok(Some(Action::Wait));
        }

        let value = match kind {
            variable::UNDEFINED => "undefined".to_string(),
            variable::NULL => "null".to_string(),
            variable::TRUE => "true".to_string(),
            variable::FALSE => "false".to_string(),
            variable::NUMBER => decode_inline_text(reader.rest()),
            variable::STRING => format!("\"{}\"", decode_inline_text(reader.rest())),
            variable::OBJECT => format!("[object:{}]", reader.read_u32()?),
            variable::ARRAY => format!("[array:{}]", reader.read_u32()?),
            variable::FUNCTION => format!("[function:{}]", reader.read_u32()?),
            _ => return Err(SessionError::MalformedFrame("unknown variable kind")),
        };
        let name = self.read_string(family::STRING)?;
        Ok(Some(Action::Text(format!("{name}: {value}\n"))))
    }

    fn send_next_source(&mut self) -> Result<(), SessionError> {
        match self.sources.next_source() {
            Some(source) => {
                tracing::debug!("sending client source {}", source.name);
                let combined = format!("{}\0{}", source.name, source.contents);
                let messages = fragment(
                    family::CLIENT_SOURCE,
                    &combined,
                    self.session.byte_order,
                    self.session.max_message_size,
                );
                for message in messages {
                    self.channel.send_message(&message)?;
                }
            }
            None => {
                let message =
                    MessageBuilder::new(self.session.byte_order, client::NO_MORE_SOURCES)
                        .finish()?;
                self.channel.send_message(&message)?;
            }
        }
        Ok(())
    }

    // --- fragmented-field plumbing ---

    /// Blocking read of the next message; inside an open exchange a closed
    /// channel is a lost connection.
    fn read_blocking(&mut self) -> Result<Bytes, SessionError> {
        match self.channel.get_message(true)? {
            Poll::Ready(data) if !data.is_empty() => Ok(data),
            _ => Err(SessionError::ConnectionLost),
        }
    }

    /// Reassembles a fragmented field whose first message is `first`.
    fn reassemble(&mut self, family: StringFamily, first: Bytes) -> Result<String, SessionError> {
        let mut assembler = StringAssembler::new(family);
        let mut data = first;
        loop {
            if let Some(text) = assembler.push(data[0], &data[1..], self.session.byte_order)? {
                return Ok(text);
            }
            data = self.read_blocking()?;
        }
    }

    /// Reads a whole fragmented field that has not started yet.
    fn read_string(&mut self, family: StringFamily) -> Result<String, SessionError> {
        let first = self.read_blocking()?;
        self.reassemble(family, first)
    }

    // --- outbound commands ---

    /// Sends one finished message; issuing a command clears the owed prompt.
    fn send(&mut self, message: Vec<u8>) -> Result<(), SessionError> {
        self.prompt_owed = false;
        self.channel.send_message(&message)?;
        Ok(())
    }

    fn send_simple(&mut self, command: u8) -> Result<(), SessionError> {
        let message = MessageBuilder::new(self.session.byte_order, command).finish()?;
        self.send(message)
    }

    fn send_breakpoint_update(
        &mut self,
        enable: bool,
        key: BreakpointKey,
    ) -> Result<(), SessionError> {
        let message = MessageBuilder::new(self.session.byte_order, client::UPDATE_BREAKPOINT)
            .u8(u8::from(enable))
            .pointer(key.handle, self.session.pointer_width)
            .u32(key.offset)
            .finish()?;
        self.send(message)
    }

    fn send_pending_config(&mut self, enable: bool) -> Result<(), SessionError> {
        tracing::debug!("pending-breakpoint notifications {}", if enable { "on" } else { "off" });
        let message = MessageBuilder::new(self.session.byte_order, client::PENDING_CONFIG)
            .u8(u8::from(enable))
            .finish()?;
        self.send(message)
    }

    /// Resumes execution.
    pub fn do_continue(&mut self) -> Result<(), SessionError> {
        self.send_simple(client::CONTINUE)
    }

    /// Executes the next byte-code step; also used to pause a running program.
    pub fn step(&mut self) -> Result<(), SessionError> {
        self.send_simple(client::STEP)
    }

    /// Steps over calls within the current function.
    pub fn next(&mut self) -> Result<(), SessionError> {
        self.send_simple(client::NEXT)
    }

    /// Runs until the current function returns.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.send_simple(client::FINISH)
    }

    /// Evaluates an expression in the paused frame. The reply arrives later
    /// through the ordinary dispatch loop.
    pub fn eval(&mut self, code: &str) -> Result<(), SessionError> {
        self.prompt_owed = false;
        let messages = fragment(
            family::EVAL,
            code,
            self.session.byte_order,
            self.session.max_message_size,
        );
        for message in messages {
            self.channel.send_message(&message)?;
        }
        Ok(())
    }

    /// Requests the current backtrace.
    pub fn backtrace(&mut self) -> Result<(), SessionError> {
        self.backtrace_depth = 0;
        self.send_simple(client::GET_BACKTRACE)
    }

    /// Requests the scope chain of the paused frame.
    pub fn scope_chain(&mut self) -> Result<(), SessionError> {
        self.send_simple(client::GET_SCOPE_CHAIN)
    }

    /// Requests the variables of one scope of the paused frame.
    pub fn scope_variables(&mut self, scope_index: u32) -> Result<(), SessionError> {
        let message = MessageBuilder::new(self.session.byte_order, client::GET_SCOPE_VARIABLES)
            .u32(scope_index)
            .finish()?;
        self.send(message)
    }

    /// Requests the properties of an object previously reported by reference.
    pub fn get_object(&mut self, object_id: u32) -> Result<(), SessionError> {
        let message = MessageBuilder::new(self.session.byte_order, client::GET_OBJECT)
            .u32(object_id)
            .finish()?;
        self.send(message)
    }

    /// Activates breakpoints for a `file:line` or function-name request.
    /// With `add_pending` set, a request with no loaded match is stored as a
    /// pending breakpoint; the first pending flips the server into
    /// pending-notification mode.
    pub fn set_breakpoint(
        &mut self,
        request: &str,
        add_pending: bool,
    ) -> Result<SetBreakpoint, SessionError> {
        let target = match parse_break_target(request) {
            Ok(target) => target,
            Err(text) => return Ok(SetBreakpoint::Invalid(text)),
        };

        let keys = self.registry.candidates(&target, None);
        if keys.is_empty() {
            if add_pending {
                let first_pending = self.registry.pending_is_empty();
                let index = self.registry.add_pending(target);
                if first_pending {
                    self.send_pending_config(true)?;
                }
                return Ok(SetBreakpoint::Pending(format!(
                    "Pending breakpoint {index} at {request}\n"
                )));
            }
            return Ok(SetBreakpoint::NotFound(format!(
                "Error: no breakpoint found at {request}\n"
            )));
        }

        let mut text = String::new();
        for key in keys {
            if let Some((index, newly_active)) = self.registry.activate(key) {
                if newly_active {
                    self.send_breakpoint_update(true, key)?;
                }
                text.push_str(&format!(
                    "Breakpoint {index} at {}\n",
                    self.registry.describe(key)
                ));
            }
        }
        Ok(SetBreakpoint::Active(text))
    }

    /// Deletes one breakpoint by index, or all of a class with
    /// `all` | `active` | `pending`.
    pub fn delete_breakpoint(&mut self, argument: &str) -> Result<String, SessionError> {
        match argument {
            "" => Ok(
                "Error: breakpoint index expected; use 'delete all|active|pending' to clear in bulk\n"
                    .to_string(),
            ),
            "all" => {
                self.delete_all_active()?;
                self.delete_all_pending()?;
                Ok(String::new())
            }
            "active" => {
                self.delete_all_active()?;
                Ok(String::new())
            }
            "pending" => {
                self.delete_all_pending()?;
                Ok(String::new())
            }
            _ => match argument.parse::<u32>() {
                Err(_) => Ok("Error: integer breakpoint index expected\n".to_string()),
                Ok(index) => {
                    if let Some(key) = self.registry.deactivate(index) {
                        self.send_breakpoint_update(false, key)?;
                        Ok(format!("Breakpoint {index} deleted\n"))
                    } else if self.registry.remove_pending(index) {
                        if self.registry.pending_is_empty() {
                            self.send_pending_config(false)?;
                        }
                        Ok(format!("Pending breakpoint {index} deleted\n"))
                    } else {
                        Ok(format!("Error: breakpoint {index} not found\n"))
                    }
                }
            },
        }
    }

    fn delete_all_active(&mut self) -> Result<(), SessionError> {
        let entries: Vec<(u32, BreakpointKey)> = self.registry.active_entries().collect();
        for (index, key) in entries {
            self.registry.deactivate(index);
            self.send_breakpoint_update(false, key)?;
        }
        Ok(())
    }

    fn delete_all_pending(&mut self) -> Result<(), SessionError> {
        if self.registry.clear_pending() > 0 {
            self.send_pending_config(false)?;
        }
        Ok(())
    }

    /// Renders the active and pending breakpoint sets.
    pub fn list_breakpoints(&self) -> String {
        let mut text = String::new();
        if !self.registry.active_is_empty() {
            text.push_str("=== Active breakpoints ===\n");
            for (index, key) in self.registry.active_entries() {
                text.push_str(&format!(" {index}: {}\n", self.registry.describe(key)));
            }
        }
        if !self.registry.pending_is_empty() {
            text.push_str("=== Pending breakpoints ===\n");
            for pending in self.registry.pending_entries() {
                text.push_str(&format!(" {}: {}\n", pending.index, pending.target));
            }
        }
        if text.is_empty() {
            text.push_str("No breakpoints\n");
        }
        text
    }

    /// Source lines around the last stop, with a marker on the stop line.
    fn source_window(&self) -> String {
        let Some(key) = self.last_hit else {
            return String::new();
        };
        let Some(function) = self.registry.function(key.handle) else {
            return String::new();
        };
        let Some(slot) = function.slot_at_offset(key.offset) else {
            return String::new();
        };

        let mut text = String::new();
        if !function.source_name.is_empty() {
            text.push_str(&format!("Source: {}\n", function.source_name));
        }
        let around = self.config.display_lines as usize;
        let hit_line = slot.line as usize;
        let total = function.source.len();
        let start = hit_line.saturating_sub(around);
        let end = (hit_line + around - 1).min(total);
        for index in start..end {
            let marker = if index + 1 == hit_line { " > " } else { "   " };
            text.push_str(&format!("{:4}{}{}\n", index + 1, marker, function.source[index]));
        }
        text
    }
}

impl<C: Channel> Drop for Engine<C> {
    fn drop(&mut self) {
        self.channel.close();
    }
}

fn source_lost_text() -> String {
    "Error: connection lost during source code receiving\n".to_string()
}

/// Inline value text of NUMBER/STRING variables (8-bit, permissive).
fn decode_inline_text(raw: &[u8]) -> String {
    raw.iter().map(|&b| b as char).collect()
}

fn scope_kind_name(tag: u8) -> &'static str {
    match tag {
        scope::GLOBAL => "Global",
        scope::FUNCTION => "Function",
        scope::DECLARATIVE => "Declarative",
        scope::OBJECT => "Object",
        scope::MODULE => "Module",
        _ => "Unknown",
    }
}

/// `file:line` or bare function name. A `:` suffix must be a positive line
/// number; anything else is a recoverable input error.
fn parse_break_target(request: &str) -> Result<BreakTarget, String> {
    match request.rsplit_once(':') {
        Some((source, line_text)) => match line_text.parse::<u32>() {
            Ok(line) if line > 0 => Ok(BreakTarget::Location {
                source: source.to_string(),
                line,
            }),
            _ => Err("Error: positive line number expected after ':'\n".to_string()),
        },
        None if request.is_empty() => Err("Error: breakpoint location expected\n".to_string()),
        None => Ok(BreakTarget::Function {
            name: request.to_string(),
        }),
    }
}
