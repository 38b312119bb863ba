//! End-to-end sessions over a scripted in-memory channel: connect, source
//! loads, breakpoint management, hits, eval, backtraces, scopes, variables,
//! pending promotion, and teardown. Asserts both the returned actions and the
//! exact bytes sent to the server.

use bytes::Bytes;
use sdbg_client::{
    Action, Channel, ChannelError, ClientSource, Engine, EngineConfig, NoSources, Poll,
    SessionError, SetBreakpoint,
};
use sdbg_protocol::message::{client, server, variable};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Shared handles into a [`ScriptedChannel`], kept by the test while the
/// engine owns the channel itself.
#[derive(Clone, Default)]
struct Script {
    incoming: Rc<RefCell<VecDeque<Vec<u8>>>>,
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: Rc<Cell<bool>>,
}

impl Script {
    fn push(&self, message: Vec<u8>) {
        self.incoming.borrow_mut().push_back(message);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.borrow().clone()
    }

    fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }

    fn last_sent(&self) -> Vec<u8> {
        self.sent.borrow().last().cloned().expect("something sent")
    }
}

struct ScriptedChannel {
    script: Script,
    version_frame: Vec<u8>,
}

impl Channel for ScriptedChannel {
    fn connect(&mut self) -> Result<Vec<u8>, ChannelError> {
        Ok(self.version_frame.clone())
    }

    fn get_message(&mut self, _blocking: bool) -> Result<Poll, ChannelError> {
        if let Some(message) = self.script.incoming.borrow_mut().pop_front() {
            return Ok(Poll::Ready(Bytes::from(message)));
        }
        if self.script.closed.get() {
            Ok(Poll::Closed)
        } else {
            Ok(Poll::Empty)
        }
    }

    fn send_message(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        self.script.sent.borrow_mut().push(message.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.script.closed.set(true);
    }
}

const HANDLE: u64 = 0x1000;

fn u32le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

fn ptr64(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// A server→client message as the channel delivers it: type byte + payload.
fn msg(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = vec![msg_type];
    message.extend_from_slice(payload);
    message
}

/// Little-endian, protocol version 1.
fn version_frame() -> Vec<u8> {
    vec![server::VERSION, 1, 1, 0, 0, 0]
}

fn config_message(max_message_size: u8, pointer_size: u8) -> Vec<u8> {
    vec![server::CONFIGURATION, max_message_size, pointer_size]
}

fn connect(script: &Script, config: EngineConfig) -> Engine<ScriptedChannel> {
    script.push(config_message(64, 8));
    let channel = ScriptedChannel {
        script: script.clone(),
        version_frame: version_frame(),
    };
    Engine::connect(channel, config, Box::new(NoSources)).expect("handshake")
}

/// Queues a one-function source load: `source_name` with slots `locations`.
fn push_source_load(script: &Script, source_name: &str, name: &str, locations: &[(u32, u32)]) {
    let source = "function main() {\n  first();\n  second();\n  third();\n}\n";
    script.push(msg(server::SOURCE_8BIT_END, source.as_bytes()));
    script.push(msg(server::FILE_NAME_8BIT_END, source_name.as_bytes()));
    script.push(msg(server::FUNCTION_NAME_8BIT_END, name.as_bytes()));

    let mut table = Vec::new();
    for &(line, offset) in locations {
        table.extend_from_slice(&u32le(line));
        table.extend_from_slice(&u32le(offset));
    }
    script.push(msg(server::BREAKPOINT_LOCATION, &table));

    let mut info = Vec::new();
    info.extend_from_slice(&ptr64(HANDLE));
    info.extend_from_slice(&u32le(1));
    info.extend_from_slice(&u32le(1));
    script.push(msg(server::FUNCTION_PTR, &info));
    script.push(msg(server::PARSE_DONE, &[]));
}

fn push_hit(script: &Script, msg_type: u8, handle: u64, offset: u32) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&ptr64(handle));
    payload.extend_from_slice(&u32le(offset));
    script.push(msg(msg_type, &payload));
}

fn load_standard_function(script: &Script, engine: &mut Engine<ScriptedChannel>) {
    push_source_load(script, "foo.js", "main", &[(10, 0), (12, 5), (15, 9)]);
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
}

#[test]
fn test_connect_negotiates_session() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    assert_eq!(engine.session().pointer_width.size(), 8);
    assert_eq!(engine.session().max_message_size, 64);
    assert_eq!(engine.session().version, 1);

    // `continue` is exactly [length=1][CONTINUE].
    engine.do_continue().unwrap();
    assert_eq!(script.last_sent(), vec![1, client::CONTINUE]);
}

#[test]
fn test_connect_rejects_version_mismatch() {
    let script = Script::default();
    script.push(config_message(64, 8));
    let channel = ScriptedChannel {
        script: script.clone(),
        version_frame: vec![server::VERSION, 1, 9, 0, 0, 0],
    };
    let result = Engine::connect(channel, EngineConfig::new(), Box::new(NoSources));
    assert!(matches!(
        result,
        Err(SessionError::ProtocolVersionMismatch { server: 9, client: 1 })
    ));
}

#[test]
fn test_connect_rejects_bad_pointer_width() {
    let script = Script::default();
    script.push(config_message(64, 2));
    let channel = ScriptedChannel {
        script: script.clone(),
        version_frame: version_frame(),
    };
    let result = Engine::connect(channel, EngineConfig::new(), Box::new(NoSources));
    assert!(matches!(result, Err(SessionError::UnsupportedPointerWidth(2))));
}

#[test]
fn test_set_breakpoint_and_exact_hit() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    let outcome = engine.set_breakpoint("foo.js:12", false).unwrap();
    assert_eq!(
        outcome,
        SetBreakpoint::Active("Breakpoint 1 at foo.js:12\n".to_string())
    );
    // UPDATE_BREAKPOINT: [len=14][type][enable=1][ptr][offset=5]
    let mut expected = vec![14, client::UPDATE_BREAKPOINT, 1];
    expected.extend_from_slice(&ptr64(HANDLE));
    expected.extend_from_slice(&u32le(5));
    assert_eq!(script.last_sent(), expected);

    push_hit(&script, server::BREAKPOINT_HIT, HANDLE, 5);
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Stopped at breakpoint:1 foo.js:12\n".to_string())
    );
    // The stop owes a prompt once traffic drains.
    assert_eq!(engine.advance(false).unwrap(), Action::Prompt);
}

#[test]
fn test_hit_between_slots_resolves_nearest() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    // Offset 7 sits between slots (12,5) and (15,9): nearest is (12,5).
    push_hit(&script, server::BREAKPOINT_HIT, HANDLE, 7);
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Stopped around foo.js:12\n".to_string())
    );
}

#[test]
fn test_hit_below_first_slot_resolves_first() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    push_source_load(&script, "foo.js", "main", &[(4, 3), (6, 8)]);
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);

    push_hit(&script, server::BREAKPOINT_HIT, HANDLE, 1);
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Stopped around foo.js:4\n".to_string())
    );
}

#[test]
fn test_set_breakpoint_idempotent() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    engine.set_breakpoint("foo.js:12", false).unwrap();
    let updates_before = script.sent_count();
    let outcome = engine.set_breakpoint("foo.js:12", false).unwrap();

    // Same index, no second server notification.
    assert_eq!(
        outcome,
        SetBreakpoint::Active("Breakpoint 1 at foo.js:12\n".to_string())
    );
    assert_eq!(script.sent_count(), updates_before);
}

#[test]
fn test_indices_not_reused_across_delete() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    engine.set_breakpoint("foo.js:12", false).unwrap();
    assert_eq!(
        engine.delete_breakpoint("1").unwrap(),
        "Breakpoint 1 deleted\n"
    );
    let outcome = engine.set_breakpoint("foo.js:12", false).unwrap();
    assert_eq!(
        outcome,
        SetBreakpoint::Active("Breakpoint 2 at foo.js:12\n".to_string())
    );
}

#[test]
fn test_bulk_delete_notifies_each_entry_once() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    engine.set_breakpoint("foo.js:10", false).unwrap();
    engine.set_breakpoint("foo.js:15", false).unwrap();
    let before = script.sent_count();

    assert_eq!(engine.delete_breakpoint("all").unwrap(), "");

    let disables: Vec<Vec<u8>> = script.sent()[before..]
        .iter()
        .filter(|m| m[1] == client::UPDATE_BREAKPOINT && m[2] == 0)
        .cloned()
        .collect();
    assert_eq!(disables.len(), 2);
    assert_eq!(engine.list_breakpoints(), "No breakpoints\n");
}

#[test]
fn test_declined_pending_leaves_registry_unchanged() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    let before = script.sent_count();

    let outcome = engine.set_breakpoint("foo.js:10", false).unwrap();
    assert_eq!(
        outcome,
        SetBreakpoint::NotFound("Error: no breakpoint found at foo.js:10\n".to_string())
    );
    assert_eq!(script.sent_count(), before);
    assert_eq!(engine.list_breakpoints(), "No breakpoints\n");
}

#[test]
fn test_pending_breakpoint_promotion() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    let outcome = engine.set_breakpoint("foo.js:12", true).unwrap();
    assert_eq!(
        outcome,
        SetBreakpoint::Pending("Pending breakpoint 1 at foo.js:12\n".to_string())
    );
    // The first pending flips the server into pending-notification mode.
    assert_eq!(script.last_sent(), vec![2, client::PENDING_CONFIG, 1]);

    // The pending-wait handshake is answered automatically.
    script.push(msg(server::WAITING_AFTER_PENDING, &[]));
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
    assert_eq!(script.last_sent(), vec![1, client::PENDING_RESUME]);

    // Loading a matching function promotes the pending breakpoint under a
    // fresh index and turns pending notifications back off.
    push_source_load(&script, "foo.js", "main", &[(10, 0), (12, 5), (15, 9)]);
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Breakpoint 2 at foo.js:12\n".to_string())
    );
    let sent = script.sent();
    assert_eq!(sent[sent.len() - 1], vec![2, client::PENDING_CONFIG, 0]);
    assert_eq!(sent[sent.len() - 2][1], client::UPDATE_BREAKPOINT);
    assert!(engine.list_breakpoints().contains("2: foo.js:12"));
}

#[test]
fn test_function_name_breakpoint() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    let outcome = engine.set_breakpoint("main", false).unwrap();
    // Earliest slot of the matching function.
    assert_eq!(
        outcome,
        SetBreakpoint::Active("Breakpoint 1 at foo.js:10\n".to_string())
    );
}

#[test]
fn test_invalid_breakpoint_requests_recover() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    assert!(matches!(
        engine.set_breakpoint("foo.js:0", false).unwrap(),
        SetBreakpoint::Invalid(_)
    ));
    assert!(matches!(
        engine.set_breakpoint("foo.js:ten", false).unwrap(),
        SetBreakpoint::Invalid(_)
    ));
    let text = engine.delete_breakpoint("seven").unwrap();
    assert!(text.starts_with("Error:"));
    let text = engine.delete_breakpoint("7").unwrap();
    assert_eq!(text, "Error: breakpoint 7 not found\n");
}

#[test]
fn test_release_function_purges_and_acks() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);
    engine.set_breakpoint("foo.js:12", false).unwrap();

    script.push(msg(server::RELEASE_FUNCTION, &ptr64(HANDLE)));
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);

    let mut ack = vec![9, client::FUNCTION_RELEASED];
    ack.extend_from_slice(&ptr64(HANDLE));
    assert_eq!(script.last_sent(), ack);
    assert_eq!(engine.registry().function_count(), 0);
    assert_eq!(engine.list_breakpoints(), "No breakpoints\n");
}

#[test]
fn test_eval_fragments_and_result() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    // 200 bytes at a negotiated max of 64: 63 + 63 + 63 + 11.
    let code = "x".repeat(200);
    engine.eval(&code).unwrap();
    let sent = script.sent();
    assert_eq!(sent.len(), 4);
    for message in &sent[..3] {
        assert_eq!(message[1], client::EVAL_8BIT);
        assert_eq!(message.len(), 65);
    }
    assert_eq!(sent[3][1], client::EVAL_8BIT_END);

    // Result arrives fragmented too.
    script.push(msg(server::EVAL_RESULT_8BIT, b"4"));
    script.push(msg(server::EVAL_RESULT_8BIT_END, b"2"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("42\n".to_string())
    );
    assert_eq!(engine.advance(false).unwrap(), Action::Prompt);
}

#[test]
fn test_eval_failure_prefixed() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.push(msg(server::EVAL_FAILED_8BIT_END, b"ReferenceError: y"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Uncaught exception: ReferenceError: y\n".to_string())
    );
}

#[test]
fn test_backtrace_rendering() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    engine.backtrace().unwrap();
    assert_eq!(script.last_sent(), vec![1, client::GET_BACKTRACE]);

    script.push(msg(server::BACKTRACE_TOTAL, &u32le(2)));
    let mut frames = Vec::new();
    frames.extend_from_slice(&ptr64(HANDLE));
    frames.extend_from_slice(&u32le(5));
    frames.extend_from_slice(&ptr64(HANDLE));
    frames.extend_from_slice(&u32le(9));
    script.push(msg(server::BACKTRACE, &frames));
    script.push(msg(server::BACKTRACE_END, &[]));

    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Total number of frames: 2\n".to_string())
    );
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Frame 0: foo.js:12\nFrame 1: foo.js:15\n".to_string())
    );
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
    assert_eq!(engine.advance(false).unwrap(), Action::Prompt);
}

#[test]
fn test_scope_chain_rendering() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    engine.scope_chain().unwrap();
    script.push(msg(server::SCOPE_CHAIN, &[2, 3]));
    script.push(msg(server::SCOPE_CHAIN_END, &[1]));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("0: Function scope\n1: Declarative scope\n2: Global scope\n".to_string())
    );
    assert_eq!(engine.advance(false).unwrap(), Action::Prompt);
}

#[test]
fn test_variable_rendering() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    engine.scope_variables(0).unwrap();
    let mut expected = vec![5, client::GET_SCOPE_VARIABLES];
    expected.extend_from_slice(&u32le(0));
    assert_eq!(script.last_sent(), expected);

    script.push(msg(server::VARIABLE, &[variable::NUMBER, b'3', b'.', b'1']));
    script.push(msg(server::STRING_8BIT_END, b"pi"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("pi: 3.1\n".to_string())
    );

    let mut object_var = vec![variable::OBJECT];
    object_var.extend_from_slice(&u32le(7));
    script.push(msg(server::VARIABLE, &object_var));
    script.push(msg(server::STRING_8BIT_END, b"state"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("state: [object:7]\n".to_string())
    );

    script.push(msg(server::VARIABLE, &[variable::END]));
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
    assert_eq!(engine.advance(false).unwrap(), Action::Prompt);
}

#[test]
fn test_print_and_exception_text() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.push(msg(server::PRINT_8BIT_END, b"hello from script\n"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("hello from script\n".to_string())
    );

    script.push(msg(server::EXCEPTION_8BIT_END, b"boom"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Exception: boom\n".to_string())
    );
}

#[test]
fn test_exception_hit_uses_nearest_rule() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());
    load_standard_function(&script, &mut engine);

    push_hit(&script, server::EXCEPTION_HIT, HANDLE, 7);
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Exception stopped around foo.js:12\n".to_string())
    );
}

#[test]
fn test_parse_error_surfaces_text() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.push(msg(server::PARSE_ERROR, &[]));
    script.push(msg(server::STRING_8BIT_END, b"unexpected token '}'"));
    assert_eq!(
        engine.advance(false).unwrap(),
        Action::Text("Parse error: unexpected token '}'\n".to_string())
    );
    assert_eq!(engine.registry().function_count(), 0);
}

#[test]
fn test_wait_for_source_drains_supplier() {
    let script = Script::default();
    script.push(config_message(64, 8));
    let channel = ScriptedChannel {
        script: script.clone(),
        version_frame: version_frame(),
    };
    let sources = vec![ClientSource {
        name: "app.js".to_string(),
        contents: "var a = 1;".to_string(),
    }];
    let mut engine =
        Engine::connect(channel, EngineConfig::new(), Box::new(sources)).expect("handshake");

    script.push(msg(server::WAIT_FOR_SOURCE, &[]));
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
    let last = script.last_sent();
    assert_eq!(last[1], client::CLIENT_SOURCE_8BIT_END);
    assert_eq!(&last[2..], b"app.js\0var a = 1;");

    script.push(msg(server::WAIT_FOR_SOURCE, &[]));
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);
    assert_eq!(script.last_sent(), vec![1, client::NO_MORE_SOURCES]);
}

#[test]
fn test_display_window_follows_stop() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new().with_display_lines(2));
    push_source_load(&script, "foo.js", "main", &[(2, 0), (3, 4)]);
    assert_eq!(engine.advance(false).unwrap(), Action::Wait);

    push_hit(&script, server::BREAKPOINT_HIT, HANDLE, 4);
    let Action::Text(text) = engine.advance(false).unwrap() else {
        panic!("expected text");
    };
    assert!(text.starts_with("Stopped at foo.js:3\n"));
    assert!(text.contains("Source: foo.js\n"));
    assert!(text.contains("   3 >   second();\n"));
    assert!(text.contains("   2     first();\n"));
}

#[test]
fn test_pause_request_sends_step() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    assert_eq!(engine.advance(true).unwrap(), Action::Wait);
    assert_eq!(script.last_sent(), vec![1, client::STEP]);
}

#[test]
fn test_close_connection_ends_session() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.push(msg(server::CLOSE_CONNECTION, &[]));
    assert_eq!(engine.advance(false).unwrap(), Action::End);
}

#[test]
fn test_closed_channel_ends_session() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.closed.set(true);
    assert_eq!(engine.advance(false).unwrap(), Action::End);
}

#[test]
fn test_unknown_message_is_fatal() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    script.push(msg(200, &[]));
    assert!(matches!(
        engine.advance(false),
        Err(SessionError::UnknownMessage(200))
    ));
}

#[test]
fn test_step_commands_wire_format() {
    let script = Script::default();
    let mut engine = connect(&script, EngineConfig::new());

    engine.step().unwrap();
    assert_eq!(script.last_sent(), vec![1, client::STEP]);
    engine.next().unwrap();
    assert_eq!(script.last_sent(), vec![1, client::NEXT]);
    engine.finish().unwrap();
    assert_eq!(script.last_sent(), vec![1, client::FINISH]);
    engine.get_object(3).unwrap();
    let mut expected = vec![5, client::GET_OBJECT];
    expected.extend_from_slice(&u32le(3));
    assert_eq!(script.last_sent(), expected);
}
