//! Reply status codes.
//!
//! These mirror the cache daemon's control-protocol status codes so a
//! provider that proxies commands can pass them through unchanged.

/// Malformed command.
pub const SYNTAX: u16 = 100;

/// Unknown command.
pub const UNKNOWN: u16 = 101;

/// Command recognised but not implemented.
pub const UNIMPL: u16 = 102;

/// Too few arguments.
pub const TOOFEW: u16 = 104;

/// Too many arguments.
pub const TOOMANY: u16 = 105;

/// Invalid parameter.
pub const PARAM: u16 = 106;

/// Authentication required.
pub const AUTH: u16 = 107;

/// Success.
pub const OK: u16 = 200;

/// Success, but the body was truncated.
pub const TRUNCATED: u16 = 201;

/// The command could not be carried out.
pub const CANT: u16 = 300;

/// Communication failure.
pub const COMMS: u16 = 400;

/// The connection is being closed.
pub const CLOSE: u16 = 500;

/// Returns a human-readable name for a status code.
pub fn status_name(code: u16) -> &'static str {
    match code {
        SYNTAX => "SYNTAX",
        UNKNOWN => "UNKNOWN",
        UNIMPL => "UNIMPL",
        TOOFEW => "TOOFEW",
        TOOMANY => "TOOMANY",
        PARAM => "PARAM",
        AUTH => "AUTH",
        OK => "OK",
        TRUNCATED => "TRUNCATED",
        CANT => "CANT",
        COMMS => "COMMS",
        CLOSE => "CLOSE",
        _ => "OTHER",
    }
}

/// Returns true if the code fits the three-digit status field.
pub fn is_valid(code: u16) -> bool {
    (100..=999).contains(&code)
}

/// Returns true for the 2xx success range.
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}
