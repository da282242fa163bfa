#![allow(non_snake_case)]

use std::backtrace::Backtrace;
use std::sync::Arc;

use super::exception::{ErrorCode, ErrorCodeBacktrace};

macro_rules! build_exceptions {
    ($($body:ident($code:expr)),*$(,)*) => {
            impl ErrorCode {
                $(
                pub fn $body(display_text: impl Into<String>) -> ErrorCode {
                    let bt = Some(ErrorCodeBacktrace::Origin(Arc::new(Backtrace::capture())));
                    ErrorCode::create($code, display_text.into(), bt)
                }
                paste::item! {
                    pub fn [< $body:snake _ code >] ()  -> u16{
                        $code
                    }

                    pub fn [< $body  Code >] ()  -> u16{
                        $code
                    }
                }
                )*
            }
    }
}

impl ErrorCode {
    pub const ILLEGAL_ARGUMENT_CODE: u16 = 1002;
    pub const NOT_FOUND_CODE: u16 = 1003;
    pub const CONFLICT_CODE: u16 = 1004;
    pub const UNRESOLVED_EVENT_REF_CODE: u16 = 2102;
}

// Internal errors [0, 2000).
build_exceptions! {
    IllegalArgument(ErrorCode::ILLEGAL_ARGUMENT_CODE),
    NotFound(ErrorCode::NOT_FOUND_CODE),
    Conflict(ErrorCode::CONFLICT_CODE),
    IllegalState(1005),
    Cancelled(1006),
    ScriptEvalFailed(1008),
    UnknownException(1999),
}

// Validation errors [2000, 2100).
build_exceptions! {
    InvalidCronExpression(2001),
    InvalidProcessDefinition(2002),
}

// Resolution errors [2100, 2200).
build_exceptions! {
    UnresolvedVariable(2101),
    UnresolvedEventRef(ErrorCode::UNRESOLVED_EVENT_REF_CODE),
}

// Synchronization errors [2200, 2300).
build_exceptions! {
    StaleJoin(2201),
    NoViableBranch(2202),
}

// Delegate errors [2300, 2400).
build_exceptions! {
    DelegateFailed(2301),
}
