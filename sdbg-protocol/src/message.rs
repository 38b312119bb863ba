//! Message type codes for SDP.
//!
//! Every message on the wire is `[total_length:1][type:1][payload]` where
//! `total_length` counts the type byte plus the payload. Text fields larger
//! than one message are fragmented per family: the 8-bit code is the family
//! base, 8-bit END is base+1, 16-bit is base+2, 16-bit END is base+3.

use crate::codec::StringFamily;

/// Messages sent by the server to the debugger client.
pub mod server {
    pub const VERSION: u8 = 0;
    pub const CONFIGURATION: u8 = 1;
    pub const CLOSE_CONNECTION: u8 = 2;
    pub const RELEASE_FUNCTION: u8 = 3;
    pub const PARSE_DONE: u8 = 4;
    pub const PARSE_ERROR: u8 = 5;
    // These four must be in the same order.
    pub const SOURCE_8BIT: u8 = 6;
    pub const SOURCE_8BIT_END: u8 = 7;
    pub const SOURCE_16BIT: u8 = 8;
    pub const SOURCE_16BIT_END: u8 = 9;
    // These four must be in the same order.
    pub const FILE_NAME_8BIT: u8 = 10;
    pub const FILE_NAME_8BIT_END: u8 = 11;
    pub const FILE_NAME_16BIT: u8 = 12;
    pub const FILE_NAME_16BIT_END: u8 = 13;
    // These four must be in the same order.
    pub const FUNCTION_NAME_8BIT: u8 = 14;
    pub const FUNCTION_NAME_8BIT_END: u8 = 15;
    pub const FUNCTION_NAME_16BIT: u8 = 16;
    pub const FUNCTION_NAME_16BIT_END: u8 = 17;
    pub const BREAKPOINT_LOCATION: u8 = 18;
    pub const FUNCTION_PTR: u8 = 19;
    pub const BREAKPOINT_HIT: u8 = 20;
    pub const EXCEPTION_HIT: u8 = 21;
    // These four must be in the same order.
    pub const EVAL_RESULT_8BIT: u8 = 22;
    pub const EVAL_RESULT_8BIT_END: u8 = 23;
    pub const EVAL_RESULT_16BIT: u8 = 24;
    pub const EVAL_RESULT_16BIT_END: u8 = 25;
    // These four must be in the same order.
    pub const EVAL_FAILED_8BIT: u8 = 26;
    pub const EVAL_FAILED_8BIT_END: u8 = 27;
    pub const EVAL_FAILED_16BIT: u8 = 28;
    pub const EVAL_FAILED_16BIT_END: u8 = 29;
    pub const BACKTRACE_TOTAL: u8 = 30;
    pub const BACKTRACE: u8 = 31;
    pub const BACKTRACE_END: u8 = 32;
    pub const EXCEPTION_BACKTRACE: u8 = 33;
    pub const SCOPE_CHAIN: u8 = 34;
    pub const SCOPE_CHAIN_END: u8 = 35;
    pub const VARIABLE: u8 = 36;
    // These four must be in the same order.
    pub const STRING_8BIT: u8 = 37;
    pub const STRING_8BIT_END: u8 = 38;
    pub const STRING_16BIT: u8 = 39;
    pub const STRING_16BIT_END: u8 = 40;
    // These four must be in the same order.
    pub const PRINT_8BIT: u8 = 41;
    pub const PRINT_8BIT_END: u8 = 42;
    pub const PRINT_16BIT: u8 = 43;
    pub const PRINT_16BIT_END: u8 = 44;
    // These four must be in the same order.
    pub const EXCEPTION_8BIT: u8 = 45;
    pub const EXCEPTION_8BIT_END: u8 = 46;
    pub const EXCEPTION_16BIT: u8 = 47;
    pub const EXCEPTION_16BIT_END: u8 = 48;
    pub const WAIT_FOR_SOURCE: u8 = 49;
    pub const WAITING_AFTER_PENDING: u8 = 50;
}

/// Messages sent by the debugger client to the server.
pub mod client {
    pub const FUNCTION_RELEASED: u8 = 0;
    pub const UPDATE_BREAKPOINT: u8 = 1;
    pub const CONTINUE: u8 = 2;
    pub const STEP: u8 = 3;
    pub const NEXT: u8 = 4;
    pub const FINISH: u8 = 5;
    // These four must be in the same order.
    pub const EVAL_8BIT: u8 = 6;
    pub const EVAL_8BIT_END: u8 = 7;
    pub const EVAL_16BIT: u8 = 8;
    pub const EVAL_16BIT_END: u8 = 9;
    pub const GET_BACKTRACE: u8 = 10;
    pub const GET_SCOPE_CHAIN: u8 = 11;
    pub const GET_SCOPE_VARIABLES: u8 = 12;
    pub const GET_OBJECT: u8 = 13;
    pub const PENDING_CONFIG: u8 = 14;
    pub const PENDING_RESUME: u8 = 15;
    // These four must be in the same order.
    pub const CLIENT_SOURCE_8BIT: u8 = 16;
    pub const CLIENT_SOURCE_8BIT_END: u8 = 17;
    pub const CLIENT_SOURCE_16BIT: u8 = 18;
    pub const CLIENT_SOURCE_16BIT_END: u8 = 19;
    pub const NO_MORE_SOURCES: u8 = 20;
}

/// Fragmented string families, one per multi-message text field.
pub mod family {
    use super::*;

    pub const SOURCE: StringFamily = StringFamily::new(server::SOURCE_8BIT);
    pub const FILE_NAME: StringFamily = StringFamily::new(server::FILE_NAME_8BIT);
    pub const FUNCTION_NAME: StringFamily = StringFamily::new(server::FUNCTION_NAME_8BIT);
    pub const EVAL_RESULT: StringFamily = StringFamily::new(server::EVAL_RESULT_8BIT);
    pub const EVAL_FAILED: StringFamily = StringFamily::new(server::EVAL_FAILED_8BIT);
    pub const STRING: StringFamily = StringFamily::new(server::STRING_8BIT);
    pub const PRINT: StringFamily = StringFamily::new(server::PRINT_8BIT);
    pub const EXCEPTION: StringFamily = StringFamily::new(server::EXCEPTION_8BIT);
    pub const EVAL: StringFamily = StringFamily::new(client::EVAL_8BIT);
    pub const CLIENT_SOURCE: StringFamily = StringFamily::new(client::CLIENT_SOURCE_8BIT);
}

/// Variable kind tags carried in the first payload byte of VARIABLE messages.
pub mod variable {
    /// End of the variable list for the current request.
    pub const END: u8 = 0;
    pub const UNDEFINED: u8 = 1;
    pub const NULL: u8 = 2;
    pub const TRUE: u8 = 3;
    pub const FALSE: u8 = 4;
    /// Value text is carried inline (8-bit).
    pub const NUMBER: u8 = 5;
    /// Value text is carried inline (8-bit), possibly truncated by the server.
    pub const STRING: u8 = 6;
    /// Payload carries an object id usable with GET_OBJECT.
    pub const OBJECT: u8 = 7;
    pub const ARRAY: u8 = 8;
    pub const FUNCTION: u8 = 9;
}

/// Scope kind tags carried in SCOPE_CHAIN payload bytes.
pub mod scope {
    pub const GLOBAL: u8 = 1;
    pub const FUNCTION: u8 = 2;
    pub const DECLARATIVE: u8 = 3;
    pub const OBJECT: u8 = 4;
    pub const MODULE: u8 = 5;
}
