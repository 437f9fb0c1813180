use thiserror::Error;

pub const CMD_PREFIX: char = '/';
pub const FIELD_SEPARATOR: char = '|';

const CMD_INIT: &str = "init";
const CMD_CHAT_SEND: &str = "chatS";
const CMD_CHAT_RECEIVE: &str = "chatR";
const CMD_JOIN: &str = "join";
const CMD_DIAL: &str = "dial";
const CMD_LISTEN: &str = "listen";

/// One line of the peer wire protocol.
///
/// Lines starting with `/` and a known keyword are control commands, every
/// other line is chat text. Keywords must match exactly, so `/initial` is chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/init <name>`: the sender's display name.
    Init { name: String },
    /// `/chatS <address-suffix>`: ask for the chat log to be sent to the peer
    /// whose address ends with the suffix.
    ChatSend { address: String },
    /// `/chatR <json>`: a full chat log, JSON array of rendered lines.
    ChatReceive { payload: String },
    /// `/join <port>|<name>`: a newcomer announcing its listen port.
    Join { port: String, name: String },
    /// `/dial <address>|<name>`: instruction to connect to a newcomer.
    Dial { address: String, name: String },
    /// `/listen <port>`: the listen port of a peer that dialed us after a
    /// `/dial`.
    Listen { port: String },
    Chat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("/{command} requires an argument")]
    MissingArgument { command: String },
    #[error("/{command} expects `<value>|<name>`, got `{argument}`")]
    MissingSeparator { command: String, argument: String },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let Some(rest) = line.strip_prefix(CMD_PREFIX) else {
            return Ok(Self::Chat(line.to_string()));
        };
        let (keyword, argument) = match rest.split_once(' ') {
            Some((keyword, argument)) => (keyword, argument.trim()),
            None => (rest.trim_end(), ""),
        };

        match keyword {
            CMD_INIT => Ok(Self::Init {
                name: required(keyword, argument)?.to_string(),
            }),
            CMD_CHAT_SEND => Ok(Self::ChatSend {
                address: required(keyword, argument)?.to_string(),
            }),
            CMD_CHAT_RECEIVE => Ok(Self::ChatReceive {
                payload: required(keyword, argument)?.to_string(),
            }),
            CMD_JOIN => {
                let (port, name) = split_fields(keyword, argument)?;
                Ok(Self::Join { port, name })
            }
            CMD_DIAL => {
                let (address, name) = split_fields(keyword, argument)?;
                Ok(Self::Dial { address, name })
            }
            CMD_LISTEN => Ok(Self::Listen {
                port: required(keyword, argument)?.to_string(),
            }),
            _ => Ok(Self::Chat(line.to_string())),
        }
    }

    /// Wire form of the command, without the line terminator.
    pub fn encode(&self) -> String {
        match self {
            Self::Init { name } => format!("{CMD_PREFIX}{CMD_INIT} {name}"),
            Self::ChatSend { address } => format!("{CMD_PREFIX}{CMD_CHAT_SEND} {address}"),
            Self::ChatReceive { payload } => format!("{CMD_PREFIX}{CMD_CHAT_RECEIVE} {payload}"),
            Self::Join { port, name } => {
                format!("{CMD_PREFIX}{CMD_JOIN} {port}{FIELD_SEPARATOR}{name}")
            }
            Self::Dial { address, name } => {
                format!("{CMD_PREFIX}{CMD_DIAL} {address}{FIELD_SEPARATOR}{name}")
            }
            Self::Listen { port } => format!("{CMD_PREFIX}{CMD_LISTEN} {port}"),
            Self::Chat(text) => text.clone(),
        }
    }
}

fn required<'a>(command: &str, argument: &'a str) -> Result<&'a str, CommandError> {
    if argument.is_empty() {
        return Err(CommandError::MissingArgument {
            command: command.to_string(),
        });
    }
    Ok(argument)
}

fn split_fields(command: &str, argument: &str) -> Result<(String, String), CommandError> {
    let argument = required(command, argument)?;
    match argument.split_once(FIELD_SEPARATOR) {
        Some((value, name)) if !value.trim().is_empty() => {
            Ok((value.trim().to_string(), name.trim().to_string()))
        }
        _ => Err(CommandError::MissingSeparator {
            command: command.to_string(),
            argument: argument.to_string(),
        }),
    }
}

/// Requests from the terminal to the network layer.
#[derive(Debug, Clone)]
pub enum LocalCommand {
    /// Text typed by the local user, to be logged and broadcast.
    SendMessage(String),
    /// Close every connection and stop accepting new ones.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn dial(address: &str, name: &str) -> Command {
        Command::Dial {
            address: address.into(),
            name: name.into(),
        }
    }

    #[rstest]
    #[case("/init bob", Command::Init { name: "bob".into() })]
    #[case("/init  bob  ", Command::Init { name: "bob".into() })]
    #[case("/chatS 127.0.0.1:51000", Command::ChatSend { address: "127.0.0.1:51000".into() })]
    #[case(r#"/chatR ["a\n","b\n"]"#, Command::ChatReceive { payload: r#"["a\n","b\n"]"#.into() })]
    #[case("/join 9002|bob", Command::Join { port: "9002".into(), name: "bob".into() })]
    #[case("/join :9002|bob", Command::Join { port: ":9002".into(), name: "bob".into() })]
    #[case("/dial 127.0.0.1:9002|bob", dial("127.0.0.1:9002", "bob"))]
    #[case("/dial 9002|name|with|pipes", dial("9002", "name|with|pipes"))]
    #[case("/listen 9002", Command::Listen { port: "9002".into() })]
    fn parses_control_commands(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line), Ok(expected));
    }

    #[rstest]
    #[case("hello there")]
    #[case("")]
    #[case("/initial thoughts")]
    #[case("/dialtone")]
    #[case("/listening now")]
    #[case("/unknown command")]
    #[case("look: a | pipe")]
    fn everything_else_is_chat(#[case] line: &str) {
        assert_eq!(Command::parse(line), Ok(Command::Chat(line.to_string())));
    }

    #[rstest]
    #[case("/init")]
    #[case("/init   ")]
    #[case("/chatS")]
    #[case("/chatR")]
    #[case("/listen")]
    fn commands_without_argument_are_rejected(#[case] line: &str) {
        assert!(matches!(
            Command::parse(line),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[rstest]
    #[case("/join 9002")]
    #[case("/dial |bob")]
    fn multi_field_commands_need_a_separator(#[case] line: &str) {
        assert!(matches!(
            Command::parse(line),
            Err(CommandError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn encoded_commands_parse_back() {
        let commands = [
            Command::Init {
                name: "alice".into(),
            },
            Command::ChatSend {
                address: ":51000".into(),
            },
            Command::Join {
                port: "9001".into(),
                name: "alice".into(),
            },
            Command::Dial {
                address: "10.0.0.2:9001".into(),
                name: "alice".into(),
            },
            Command::Listen {
                port: "9001".into(),
            },
            Command::Chat("plain words".into()),
        ];
        for command in commands {
            assert_eq!(Command::parse(&command.encode()), Ok(command));
        }
    }

    #[test]
    fn join_encodes_wire_exact() {
        let join = Command::Join {
            port: "9001".into(),
            name: "bob".into(),
        };
        assert_eq!(join.encode(), "/join 9001|bob");
    }
}
