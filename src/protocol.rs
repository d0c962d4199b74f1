//! The line protocol spoken by the board while a program runs.
//!
//! Every line is either the single character `C` (the board is ready for the next upload chunk),
//! or a two-letter tag followed by colon-separated fields:
//!
//! | line | meaning |
//! |---|---|
//! | `pb:<id>:<value>` | unit `<id>` reported a value (`r` for a clicked reporter) |
//! | `rc:<id>:<data>` | unit `<id>` came alive |
//! | `dc:<id>:<data>` | unit `<id>` ended |
//! | `pv:<pin>:<value>` | a pin was written |
//! | `vv:<name>:<value>` | a variable was written |
//!
//! Anything else is console chatter from the board (including lua errors) and is only logged.

use core::fmt;

use compact_str::CompactString;

/// Identifier of a compiled unit, as it appears on the wire.
pub type UnitId = u32;

/// Who a reporter result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitRef {
    Id(UnitId),
    /// A reporter that was clicked in the editor rather than run as part of a script.
    Adhoc,
}
impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnitRef::Id(id) => write!(f, "{id}"),
            UnitRef::Adhoc => f.write_str("r"),
        }
    }
}

pub const CHUNK_READY: &str = "C";
pub const TAG_BUBBLE: &str = "pb";
pub const TAG_STARTED: &str = "rc";
pub const TAG_ENDED: &str = "dc";
pub const TAG_PIN: &str = "pv";
pub const TAG_VARIABLE: &str = "vv";

/// A decoded line from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamEvent {
    ChunkReady,
    ReporterResult { unit: UnitRef, value: CompactString },
    ThreadStarted { id: UnitId, data: CompactString },
    ThreadEnded { id: UnitId, data: CompactString },
    PinValue { pin: u32, value: CompactString },
    VariableValue { name: CompactString, value: CompactString },
    /// The lua prompt, printed once the board has booted and is listening.
    DeviceReady,
    Unrecognized(CompactString),
}

/// Decodes one line. This never fails: malformed lines come back as [`DownstreamEvent::Unrecognized`].
pub fn parse(line: &str) -> DownstreamEvent {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == CHUNK_READY {
        return DownstreamEvent::ChunkReady;
    }

    let mut fields = line.splitn(3, ':');
    let (tag, key, value) = match (fields.next(), fields.next(), fields.next()) {
        (Some(tag), Some(key), Some(value)) => (tag, key, value),
        _ => return unrecognized(line),
    };

    let event = match tag {
        TAG_BUBBLE => match key {
            "r" => Some(DownstreamEvent::ReporterResult { unit: UnitRef::Adhoc, value: value.into() }),
            _ => key.parse().ok().map(|id| DownstreamEvent::ReporterResult { unit: UnitRef::Id(id), value: value.into() }),
        }
        TAG_STARTED => key.parse().ok().map(|id| DownstreamEvent::ThreadStarted { id, data: value.into() }),
        TAG_ENDED => key.parse().ok().map(|id| DownstreamEvent::ThreadEnded { id, data: value.into() }),
        TAG_PIN => key.parse().ok().map(|pin| DownstreamEvent::PinValue { pin, value: value.into() }),
        TAG_VARIABLE if !key.is_empty() => Some(DownstreamEvent::VariableValue { name: key.into(), value: value.into() }),
        _ => None,
    };
    event.unwrap_or_else(|| unrecognized(line))
}

/// Checks for the shell prompt, which is the working directory followed by `>` (e.g. `/ > ` or `/sd > `),
/// or a bare `>` from the plain lua interpreter.
fn is_prompt(line: &str) -> bool {
    match line.trim().strip_suffix('>') {
        Some(dir) => {
            let dir = dir.trim_end();
            dir.is_empty() || (dir.starts_with('/') && !dir.contains(char::is_whitespace))
        }
        None => false,
    }
}

fn unrecognized(line: &str) -> DownstreamEvent {
    if is_prompt(line) {
        return DownstreamEvent::DeviceReady;
    }
    DownstreamEvent::Unrecognized(line.into())
}

#[test]
fn test_parse_tags() {
    assert_eq!(parse("C"), DownstreamEvent::ChunkReady);
    assert_eq!(parse("C\r"), DownstreamEvent::ChunkReady);
    assert_eq!(parse("pb:3:hello"), DownstreamEvent::ReporterResult { unit: UnitRef::Id(3), value: "hello".into() });
    assert_eq!(parse("pb:r:4.5"), DownstreamEvent::ReporterResult { unit: UnitRef::Adhoc, value: "4.5".into() });
    assert_eq!(parse("pb:0:a:b:c"), DownstreamEvent::ReporterResult { unit: UnitRef::Id(0), value: "a:b:c".into() });
    assert_eq!(parse("rc:12:"), DownstreamEvent::ThreadStarted { id: 12, data: "".into() });
    assert_eq!(parse("dc:12:on"), DownstreamEvent::ThreadEnded { id: 12, data: "on".into() });
    assert_eq!(parse("pv:4:1\r\n"), DownstreamEvent::PinValue { pin: 4, value: "1".into() });
    assert_eq!(parse("vv:speed:20"), DownstreamEvent::VariableValue { name: "speed".into(), value: "20".into() });
    assert_eq!(parse("/ > "), DownstreamEvent::DeviceReady);
    assert_eq!(parse("/sd/lib >"), DownstreamEvent::DeviceReady);
    assert_eq!(parse("> "), DownstreamEvent::DeviceReady);
}

#[test]
fn test_parse_garbage() {
    assert_eq!(parse(""), DownstreamEvent::Unrecognized("".into()));
    assert_eq!(parse("CC"), DownstreamEvent::Unrecognized("CC".into()));
    assert_eq!(parse("pb:x:1"), DownstreamEvent::Unrecognized("pb:x:1".into()));
    assert_eq!(parse("pb:3"), DownstreamEvent::Unrecognized("pb:3".into()));
    assert_eq!(parse("pv:-1:0"), DownstreamEvent::Unrecognized("pv:-1:0".into()));
    assert_eq!(parse("vv::1"), DownstreamEvent::Unrecognized("vv::1".into()));
    assert_eq!(parse("xx:1:2"), DownstreamEvent::Unrecognized("xx:1:2".into()));
    assert_eq!(parse("stdin:1: unexpected symbol near >"), DownstreamEvent::Unrecognized("stdin:1: unexpected symbol near >".into()));
    assert_eq!(parse("a > b >"), DownstreamEvent::Unrecognized("a > b >".into()));
    assert_eq!(parse("lua: autorun.lua:3: attempt to call a nil value"), DownstreamEvent::Unrecognized("lua: autorun.lua:3: attempt to call a nil value".into()));
}

#[test]
fn test_unit_ref_display() {
    assert_eq!(format!("{}", UnitRef::Id(7)), "7");
    assert_eq!(format!("{}", UnitRef::Adhoc), "r");
}
