use std::fmt;
use std::mem;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::{BroadcastTag, ClientResponse, OutgoingMessage, ResponseTag};

/// One validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Connect { username: String },
    Rename { newname: String },
    Msg { text: String },
    Exit { reason: Option<String> },
    UpdateFile { content: String },
}

/// Recognized command tags, used to report which command a bad frame was
/// attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Connect,
    Rename,
    Msg,
    Exit,
    UpdateFile,
}

impl CommandTag {
    /// Tag echoed in `return-cmd` when the command fails validation.
    fn failure_tag(self) -> &'static str {
        match self {
            CommandTag::Connect => "connect",
            CommandTag::Rename => "rename",
            CommandTag::Msg => "message",
            CommandTag::Exit => "exit",
            CommandTag::UpdateFile => "update-file",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = match self {
            CommandTag::Connect => "connect",
            CommandTag::Rename => "rename",
            CommandTag::Msg => "msg",
            CommandTag::Exit => "exit",
            CommandTag::UpdateFile => "update-file",
        };
        f.write_str(wire)
    }
}

/// A frame that decoded as JSON but is not a usable command. The session
/// survives; only a failed status response goes back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unrecognized command tag `{tag}`")]
    UnrecognizedTag { tag: String },
    #[error("`{cmd}` command missing required field `{field}`")]
    MissingField { cmd: CommandTag, field: &'static str },
    #[error("`{cmd}` field `{field}` is not a string")]
    InvalidField { cmd: CommandTag, field: &'static str },
}

impl CommandError {
    /// Tag echoed in the failed response, empty when the tag itself was
    /// unrecognized.
    pub fn return_cmd(&self) -> &'static str {
        match self {
            CommandError::UnrecognizedTag { .. } => "",
            CommandError::MissingField { cmd, .. } | CommandError::InvalidField { cmd, .. } => {
                cmd.failure_tag()
            }
        }
    }
}

impl ClientCommand {
    /// Validate one decoded frame into a typed command.
    ///
    /// A missing or non-string `cmd` field reads as an unrecognized tag; a
    /// recognized tag with a missing or mistyped field reports exactly which
    /// field was at fault.
    pub fn from_frame(frame: &Map<String, Value>) -> Result<Self, CommandError> {
        let tag = frame.get("cmd").and_then(Value::as_str).unwrap_or_default();
        match tag {
            "connect" => Ok(ClientCommand::Connect {
                username: require_str(frame, CommandTag::Connect, "username")?,
            }),
            "rename" => Ok(ClientCommand::Rename {
                newname: require_str(frame, CommandTag::Rename, "newname")?,
            }),
            "msg" => Ok(ClientCommand::Msg {
                text: require_str(frame, CommandTag::Msg, "msg")?,
            }),
            "exit" => Ok(ClientCommand::Exit {
                reason: optional_str(frame, CommandTag::Exit, "msg")?,
            }),
            "update-file" => Ok(ClientCommand::UpdateFile {
                content: require_str(frame, CommandTag::UpdateFile, "msg")?,
            }),
            other => Err(CommandError::UnrecognizedTag {
                tag: other.to_string(),
            }),
        }
    }
}

fn require_str(
    frame: &Map<String, Value>,
    cmd: CommandTag,
    field: &'static str,
) -> Result<String, CommandError> {
    match frame.get(field) {
        None => Err(CommandError::MissingField { cmd, field }),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or(CommandError::InvalidField { cmd, field }),
    }
}

fn optional_str(
    frame: &Map<String, Value>,
    cmd: CommandTag,
    field: &'static str,
) -> Result<Option<String>, CommandError> {
    match frame.get(field) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|text| Some(text.to_string()))
            .ok_or(CommandError::InvalidField { cmd, field }),
    }
}

/// Unit of work handed to the broadcaster for one inbound command.
#[derive(Debug)]
pub(crate) struct Envelope {
    /// Fanned out to every session except the originator. Absent for
    /// commands that failed validation.
    pub outgoing: Option<OutgoingMessage>,
    /// Written back only to the originating connection.
    pub response: ClientResponse,
    pub error: Option<CommandError>,
    /// Set by an exit command; the originating session ends after delivery.
    pub terminate: bool,
}

/// Turn one validation outcome into a broadcast envelope.
///
/// This is the whole per-command state machine: connect and rename mutate the
/// session's display name, update-file overwrites the shared document, and
/// everything else relays untouched.
pub(crate) fn interpret(
    parsed: Result<ClientCommand, CommandError>,
    name: &mut String,
    document: &mut String,
) -> Envelope {
    let command = match parsed {
        Ok(command) => command,
        Err(err) => {
            return Envelope {
                outgoing: None,
                response: ClientResponse {
                    cmd: ResponseTag::ReturnStatus,
                    return_cmd: err.return_cmd().to_string(),
                    status: false,
                    payload: String::new(),
                },
                error: Some(err),
                terminate: false,
            };
        }
    };

    let mut from = name.clone();
    let mut terminate = false;
    let (tag, payload) = match command {
        ClientCommand::Connect { username } => {
            *name = username;
            from = name.clone();
            // New peers get the latest copy of the file.
            (BroadcastTag::ClientConnect, document.clone())
        }
        ClientCommand::Rename { newname } => {
            let old = mem::replace(name, newname);
            (BroadcastTag::ClientRename, format!("{old},{name}"))
        }
        ClientCommand::Msg { text } => (BroadcastTag::Message, text),
        ClientCommand::Exit { reason } => {
            terminate = true;
            let reason = reason.unwrap_or_else(|| "reason unknown".to_string());
            (BroadcastTag::ClientExit, reason)
        }
        ClientCommand::UpdateFile { content } => {
            document.clone_from(&content);
            (BroadcastTag::UpdateFile, content)
        }
    };

    // The full document travels only once, at connection time; every other
    // response carries an empty payload.
    let response_payload = if tag == BroadcastTag::ClientConnect {
        payload.clone()
    } else {
        String::new()
    };

    Envelope {
        outgoing: Some(OutgoingMessage {
            cmd: tag,
            from,
            payload,
        }),
        response: ClientResponse {
            cmd: ResponseTag::ReturnStatus,
            return_cmd: tag.as_str().to_string(),
            status: true,
            payload: response_payload,
        },
        error: None,
        terminate,
    }
}
