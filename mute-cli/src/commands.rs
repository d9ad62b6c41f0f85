//! Interactive command parsing

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start muting, or add time to the running mute
    Toggle,
    Unmute,
    Status,
    Devices,
    /// Join a network, the configured one if none is named
    Connect(Option<String>),
    Disconnect,
    /// Take a speaker off the network
    Drop(String),
    /// Bring a dropped speaker back
    Return(String),
    /// Flip whether a speaker answers remote actions
    Fail(String),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("'{0}' needs a speaker (number or room name)")]
    MissingSpeaker(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let argument = (!rest.is_empty()).then(|| rest.to_string());

        let speaker = |name: &'static str| argument.clone().ok_or(CommandError::MissingSpeaker(name));

        match verb.to_ascii_lowercase().as_str() {
            "" | "t" | "toggle" | "mute" => Ok(Command::Toggle),
            "u" | "unmute" => Ok(Command::Unmute),
            "s" | "status" => Ok(Command::Status),
            "d" | "devices" | "ls" => Ok(Command::Devices),
            "connect" => Ok(Command::Connect(argument)),
            "disconnect" => Ok(Command::Disconnect),
            "drop" => speaker("drop").map(Command::Drop),
            "return" => speaker("return").map(Command::Return),
            "fail" => speaker("fail").map(Command::Fail),
            "h" | "help" | "?" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

pub const HELP: &str = "\
Commands:
  toggle (or Enter)   Mute every speaker, or add 30 seconds
  unmute              Restore every speaker now
  status              Show the status line
  devices             List simulated speakers
  connect [network]   Join a network
  disconnect          Leave the network
  drop <speaker>      Take a speaker off the network
  return <speaker>    Bring a speaker back
  fail <speaker>      Make a speaker stop (or resume) answering
  quit                Exit
Speakers are referenced by number or room name.";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", Command::Toggle)]
    #[case("toggle", Command::Toggle)]
    #[case("  T  ", Command::Toggle)]
    #[case("unmute", Command::Unmute)]
    #[case("status", Command::Status)]
    #[case("ls", Command::Devices)]
    #[case("connect", Command::Connect(None))]
    #[case("connect cafe wifi", Command::Connect(Some("cafe wifi".to_string())))]
    #[case("disconnect", Command::Disconnect)]
    #[case("drop 2", Command::Drop("2".to_string()))]
    #[case("return living room", Command::Return("living room".to_string()))]
    #[case("fail kitchen", Command::Fail("kitchen".to_string()))]
    #[case("quit", Command::Quit)]
    fn test_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(line.parse::<Command>(), Ok(expected));
    }

    #[rstest]
    #[case("drop", CommandError::MissingSpeaker("drop"))]
    #[case("fail   ", CommandError::MissingSpeaker("fail"))]
    #[case("dance", CommandError::Unknown("dance".to_string()))]
    fn test_parse_errors(#[case] line: &str, #[case] expected: CommandError) {
        assert_eq!(line.parse::<Command>(), Err(expected));
    }
}
