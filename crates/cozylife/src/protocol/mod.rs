//! Wire protocol for CozyLife devices.
//!
//! Devices listen on TCP port 5555 and speak newline-delimited JSON:
//! - Requests: `{"pv":0,"cmd":<code>,"sn":"<digits>","msg":{...}}`
//! - Responses: `{"sn":"<digits>","res":<code>,"msg":{...}}`, `res == 0` on success
//!
//! Attribute ids (DPIDs) are integers in `attr` lists and decimal strings when
//! used as keys of a `data` object.

mod codec;
mod sequence;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

pub use codec::decode;
pub use codec::decode_command;
pub use codec::Command;
pub use codec::CommandError;
pub use codec::CommandKind;
pub use codec::DecodeError;
pub use codec::Request;
pub use codec::Response;
pub use sequence::SequenceSource;

/// TCP port every CozyLife device listens on.
pub const DEFAULT_PORT: u16 = 5555;

/// A device attribute id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dpid(pub u16);

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Dpid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Dpid)
    }
}

/// Attribute values keyed by DPID, ordered by id.
pub type AttributeMap = BTreeMap<Dpid, serde_json::Value>;

/// Device type code reported in the `dtp` field of an info response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum TypeCode {
    Switch,
    Light,
    RgbLight,
    Other(String),
}

impl TypeCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "00" => TypeCode::Switch,
            "01" => TypeCode::Light,
            "02" => TypeCode::RgbLight,
            other => TypeCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TypeCode::Switch => "00",
            TypeCode::Light => "01",
            TypeCode::RgbLight => "02",
            TypeCode::Other(code) => code,
        }
    }

    /// Whether the code names one of the light categories.
    pub fn is_light(&self) -> bool {
        matches!(self, TypeCode::Light | TypeCode::RgbLight)
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TypeCode> for String {
    fn from(code: TypeCode) -> Self {
        code.as_str().to_string()
    }
}
