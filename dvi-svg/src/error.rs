//! Error types for every stage of the conversion.
//!
//! Decoding errors are fatal to a conversion. Execution errors are fatal too, but the
//! machines themselves degrade gracefully where they can (missing metrics, unknown
//! specials) and only log.

use std::io;

/// Errors raised while reading the DVI byte stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode} at byte {offset}")]
    UnknownOpcode { opcode: u8, offset: u64 },

    #[error("DVI stream ended at byte {offset} while reading {context}")]
    Truncated { context: &'static str, offset: u64 },

    #[error("malformed {context} at byte {offset}")]
    MalformedString { context: &'static str, offset: u64 },

    #[error("failed to read DVI stream: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while executing decoded commands against a machine.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("pop with an empty position stack")]
    UnbalancedStack,

    #[error("position stack should be empty at end of page, found depth {depth}")]
    StackNotEmpty { depth: usize },

    #[error("could not find font {0}")]
    UndefinedFont(u32),

    #[error("character {0} typeset before any font was selected")]
    NoFontSelected(u32),

    #[error("invalid {field} in preamble: {value}")]
    InvalidPreamble { field: &'static str, value: i64 },

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the PostScript subset interpreter. These abort a single special only.
#[derive(Debug, thiserror::Error)]
pub enum PostScriptError {
    #[error("invalid or unimplemented postscript expression `{0}`")]
    Unimplemented(String),

    #[error("postscript operand stack underflow in `{0}`")]
    StackUnderflow(&'static str),

    #[error("postscript operator `{0}` expects a number")]
    TypeCheck(&'static str),

    #[error("grestore without matching gsave")]
    UnmatchedGrestore,

    #[error("invalid escape character at end of postscript input")]
    InvalidEscape,
}

/// Errors raised while locating or parsing TeX font metric files.
#[derive(Debug, thiserror::Error)]
pub enum TfmError {
    #[error("font metrics for `{0}` not found")]
    NotFound(String),

    #[error("TFM data for `{name}` is truncated")]
    Truncated { name: String },

    #[error("TFM header for `{name}` is inconsistent: {reason}")]
    InvalidHeader { name: String, reason: &'static str },

    #[error("failed to load the built-in font metrics: {0}")]
    Builtin(String),

    #[error("failed to read font bundle: {0}")]
    Io(#[from] io::Error),
}

/// Any error that aborts a whole conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}
