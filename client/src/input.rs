//! Terminal input: maps typed lines to commands.

use shared::{Command, Direction, ProtocolError, DEFAULT_BROADCAST_TRIGGERS};

/// Prefix that relays the rest of the line as an announcement.
const SAY_PREFIX: &str = "say ";

pub const HELP: &str = "\
commands: w/a/s/d or up/down/left/right to steer, g/get to refresh, \
r/reset to respawn, q/quit to leave, say <text> to announce";

/// Parses one line of user input. Blank lines yield `None`.
///
/// Single-letter shortcuts map to movement and control commands. Known
/// announcement phrases are recognized as typed; anything else after `say `
/// is sent verbatim and left to the server to accept or reject.
pub fn parse_line(line: &str) -> Result<Option<Command>, ProtocolError> {
    let text = line.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let command = match text {
        "w" => Command::Move(Direction::Up),
        "a" => Command::Move(Direction::Left),
        "s" => Command::Move(Direction::Down),
        "d" => Command::Move(Direction::Right),
        "g" => Command::Get,
        "r" => Command::Reset,
        "q" => Command::Quit,
        other => match other.strip_prefix(SAY_PREFIX) {
            Some(message) if !message.trim().is_empty() => {
                Command::Announce(message.trim().to_string())
            }
            _ => Command::parse(other, &DEFAULT_BROADCAST_TRIGGERS)?,
        },
    };
    Ok(Some(command))
}
