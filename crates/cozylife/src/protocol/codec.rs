use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::AttributeMap;
use super::Dpid;

const PROTOCOL_VERSION: u8 = 0;

/// Every frame on the wire ends with CRLF.
const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// The three commands a device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Info,
    Query,
    Set,
}

impl CommandKind {
    /// Numeric `cmd` value used on the wire.
    pub fn code(self) -> u8 {
        match self {
            CommandKind::Info => 0,
            CommandKind::Query => 2,
            CommandKind::Set => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CommandKind::Info),
            2 => Some(CommandKind::Query),
            3 => Some(CommandKind::Set),
            _ => None,
        }
    }
}

/// What a command asks the device to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read device id, product id and type code.
    Info,
    /// Read every attribute value and the supported attribute list.
    Query,
    /// Write the given attribute values.
    Set(AttributeMap),
}

impl Request {
    pub fn kind(&self) -> CommandKind {
        match self {
            Request::Info => CommandKind::Info,
            Request::Query => CommandKind::Query,
            Request::Set(_) => CommandKind::Set,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("set command needs at least one attribute")]
    EmptySet,
}

/// A request stamped with its sequence number, ready to be framed.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    sn: String,
    request: Request,
}

#[derive(Serialize)]
struct Frame<'a, M> {
    pv: u8,
    cmd: u8,
    sn: &'a str,
    msg: M,
}

#[derive(Serialize)]
struct InfoMsg {}

#[derive(Serialize)]
struct QueryMsg {
    attr: [u16; 1],
}

#[derive(Serialize)]
struct SetMsg<'a> {
    attr: Vec<Dpid>,
    data: &'a AttributeMap,
}

impl Command {
    pub fn new(sn: impl Into<String>, request: Request) -> Result<Self, CommandError> {
        if let Request::Set(attributes) = &request {
            if attributes.is_empty() {
                return Err(CommandError::EmptySet);
            }
        }
        Ok(Self {
            sn: sn.into(),
            request,
        })
    }

    pub fn info(sn: impl Into<String>) -> Self {
        Self {
            sn: sn.into(),
            request: Request::Info,
        }
    }

    pub fn query(sn: impl Into<String>) -> Self {
        Self {
            sn: sn.into(),
            request: Request::Query,
        }
    }

    pub fn set(sn: impl Into<String>, attributes: AttributeMap) -> Result<Self, CommandError> {
        Self::new(sn, Request::Set(attributes))
    }

    pub fn sn(&self) -> &str {
        &self.sn
    }

    pub fn kind(&self) -> CommandKind {
        self.request.kind()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Attribute values carried by a set command.
    pub fn attributes(&self) -> Option<&AttributeMap> {
        match &self.request {
            Request::Set(attributes) => Some(attributes),
            Request::Info | Request::Query => None,
        }
    }

    /// Encode into a single CRLF-terminated JSON frame.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let cmd = self.kind().code();
        let sn = self.sn.as_str();
        let mut frame = match &self.request {
            Request::Info => serde_json::to_vec(&Frame {
                pv: PROTOCOL_VERSION,
                cmd,
                sn,
                msg: InfoMsg {},
            })?,
            Request::Query => serde_json::to_vec(&Frame {
                pv: PROTOCOL_VERSION,
                cmd,
                sn,
                msg: QueryMsg { attr: [0] },
            })?,
            Request::Set(data) => serde_json::to_vec(&Frame {
                pv: PROTOCOL_VERSION,
                cmd,
                sn,
                msg: SetMsg {
                    attr: data.keys().copied().collect(),
                    data,
                },
            })?,
        };
        frame.extend_from_slice(FRAME_TERMINATOR);
        Ok(frame)
    }
}

/// A reply from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub sn: String,

    /// Result code, zero on success.
    #[serde(rename = "res")]
    pub result: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Map<String, Value>>,
}

impl Response {
    pub fn new(sn: impl Into<String>, result: i64, msg: Option<Map<String, Value>>) -> Self {
        Self {
            sn: sn.into(),
            result,
            msg,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == 0
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(FRAME_TERMINATOR);
        Ok(frame)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown command code {0}")]
    UnknownCommand(u8),
}

fn frame_text(line: &[u8]) -> Result<&str, DecodeError> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(text)
}

/// Decode one response line. Surrounding whitespace, including the line
/// terminator, is ignored.
pub fn decode(line: &[u8]) -> Result<Response, DecodeError> {
    Ok(serde_json::from_str(frame_text(line)?)?)
}

#[derive(Deserialize)]
struct RawCommand {
    cmd: u8,
    sn: String,
    #[serde(default)]
    msg: RawCommandMsg,
}

#[derive(Default, Deserialize)]
struct RawCommandMsg {
    #[serde(default)]
    data: AttributeMap,
}

/// Decode one request line, as a device would.
pub fn decode_command(line: &[u8]) -> Result<Command, DecodeError> {
    let raw: RawCommand = serde_json::from_str(frame_text(line)?)?;
    let request = match CommandKind::from_code(raw.cmd) {
        Some(CommandKind::Info) => Request::Info,
        Some(CommandKind::Query) => Request::Query,
        Some(CommandKind::Set) => Request::Set(raw.msg.data),
        None => return Err(DecodeError::UnknownCommand(raw.cmd)),
    };
    Ok(Command {
        sn: raw.sn,
        request,
    })
}
