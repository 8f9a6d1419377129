//! Accumulator protocol parser and formatter.
//!
//! One message per line, whitespace-separated tokens:
//! - Commands: `init <int>`, `add <int>`, `mul <int>`, `div <int>`, `compute`
//! - Answers: `answer <int>`
//!
//! Integers are signed decimal values in the `i32` range. The divisor of a
//! `div` command is never zero: it is rejected here, so nothing downstream
//! has to check it again.

use std::fmt;
use std::num::{IntErrorKind, NonZeroI32};
use std::str::FromStr;

/// Parsed protocol command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Replace the accumulated value
    Init(i32),

    /// Add to the accumulated value
    Add(i32),

    /// Multiply the accumulated value
    Mul(i32),

    /// Divide the accumulated value, truncating toward zero
    Div(NonZeroI32),

    /// Ask for the accumulated value (`compute` on the wire)
    Query,
}

impl Command {
    /// Build a `div` command, rejecting a zero divisor.
    pub fn div(value: i32) -> Result<Self, ParseError> {
        NonZeroI32::new(value)
            .map(Command::Div)
            .ok_or(ParseError::DivisionByZero)
    }

    /// True for the command that ends a session.
    pub fn is_query(&self) -> bool {
        matches!(self, Command::Query)
    }
}

/// Reply to a `compute` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Answer {
    pub value: i32,
}

impl Answer {
    pub fn new(value: i32) -> Self {
        Self { value }
    }
}

/// Protocol parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Empty line or unknown command keyword
    NotACommand,
    /// Empty line or a line not starting with `answer`
    NotAnAnswer,
    /// Command keyword without its operand
    MissingValue,
    /// Operand is not a decimal integer
    InvalidValue,
    /// Operand does not fit in an `i32`
    ValueOutOfRange,
    /// `div` with a zero operand
    DivisionByZero,
}

/// Coarse classification of a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
}

impl ParseError {
    /// Every parse failure is a malformed-input condition.
    pub fn kind(&self) -> ErrorCategory {
        ErrorCategory::InvalidInput
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::NotACommand => "not a command",
            ParseError::NotAnAnswer => "not an answer",
            ParseError::MissingValue => "value is missing",
            ParseError::InvalidValue => "value is invalid",
            ParseError::ValueOutOfRange => "value is out of range",
            ParseError::DivisionByZero => "division by zero",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for std::io::Error {
    fn from(e: ParseError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    }
}

/// Parse one command line (without its trailing newline).
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut parts = line.split_whitespace();
    let name = parts.next().ok_or(ParseError::NotACommand)?;

    let build: fn(i32) -> Result<Command, ParseError> = match name {
        "compute" => return Ok(Command::Query),
        "init" => |v| Ok(Command::Init(v)),
        "add" => |v| Ok(Command::Add(v)),
        "mul" => |v| Ok(Command::Mul(v)),
        "div" => Command::div,
        _ => return Err(ParseError::NotACommand),
    };

    build(parse_value(parts.next())?)
}

/// Format a command as its wire text (without the trailing newline).
pub fn format_command(command: &Command) -> String {
    command.to_string()
}

/// Parse one answer line (without its trailing newline).
pub fn parse_answer(line: &str) -> Result<Answer, ParseError> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("answer") => parse_value(parts.next()).map(Answer::new),
        _ => Err(ParseError::NotAnAnswer),
    }
}

/// Format an answer as its wire text (without the trailing newline).
pub fn format_answer(answer: &Answer) -> String {
    answer.to_string()
}

fn parse_value(token: Option<&str>) -> Result<i32, ParseError> {
    let token = token.ok_or(ParseError::MissingValue)?;
    token.parse::<i32>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ParseError::ValueOutOfRange,
        _ => ParseError::InvalidValue,
    })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Init(v) => write!(f, "init {}", v),
            Command::Add(v) => write!(f, "add {}", v),
            Command::Mul(v) => write!(f, "mul {}", v),
            Command::Div(v) => write!(f, "div {}", v),
            Command::Query => f.write_str("compute"),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "answer {}", self.value)
    }
}

impl FromStr for Answer {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_answer(s)
    }
}
