//! Console command grammar.

use core::fmt;

use sampler_core::link::ConnectionHandle;
use sampler_core::peripherals::{Peripheral, RawCode};
use winnow::ascii::{Caseless, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Connect(ConnectionHandle),
    Subscribe,
    Unsubscribe,
    Disconnect,
    Pulse { raw: RawCode, count: u16 },
    Advance { millis: u64 },
    Fail(Peripheral),
    Status,
    Help,
}

/// Syntax error with the byte offset where parsing stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected input at column {}", self.offset + 1)
    }
}

pub fn parse(line: &str) -> Result<Command, SyntaxError> {
    terminated(preceded(space0, command), (space0, eof))
        .parse(line)
        .map_err(|error| SyntaxError {
            offset: error.offset(),
        })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        connect,
        Caseless("subscribe").value(Command::Subscribe),
        Caseless("unsubscribe").value(Command::Unsubscribe),
        Caseless("disconnect").value(Command::Disconnect),
        pulse,
        advance,
        fail,
        Caseless("status").value(Command::Status),
        Caseless("help").value(Command::Help),
    ))
    .parse_next(input)
}

fn connect(input: &mut &str) -> ModalResult<Command> {
    preceded(Caseless("connect"), opt(preceded(space1, dec_uint)))
        .map(|handle: Option<u8>| Command::Connect(ConnectionHandle(handle.unwrap_or(0))))
        .parse_next(input)
}

fn pulse(input: &mut &str) -> ModalResult<Command> {
    (
        preceded((Caseless("pulse"), space1), dec_uint),
        opt(preceded(space1, dec_uint)),
    )
        .map(|(raw, count): (u16, Option<u16>)| Command::Pulse {
            raw,
            count: count.unwrap_or(1),
        })
        .parse_next(input)
}

fn advance(input: &mut &str) -> ModalResult<Command> {
    preceded((Caseless("advance"), space1), dec_uint)
        .map(|millis: u64| Command::Advance { millis })
        .parse_next(input)
}

fn fail(input: &mut &str) -> ModalResult<Command> {
    preceded((Caseless("fail"), space1), peripheral)
        .map(Command::Fail)
        .parse_next(input)
}

fn peripheral(input: &mut &str) -> ModalResult<Peripheral> {
    alt((
        Caseless("power").value(Peripheral::PowerGate),
        Caseless("trigger").value(Peripheral::PeriodicTrigger),
        Caseless("converter").value(Peripheral::ConversionEngine),
        Caseless("transfer").value(Peripheral::BatchTransferEngine),
    ))
    .parse_next(input)
}
