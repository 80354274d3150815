//! Deciding whether a device should be driven as a light or as a switch.
//!
//! There is no single reliable signal. Type codes are wrong for some switch
//! models, and attribute ids overlap: on switches DPID 5 is a timer rather
//! than hue. Attribute evidence is weighed first, the type code second, and
//! the outcome can be overridden per device.

use serde::Deserialize;
use serde::Serialize;

use super::COLOR_TEMP;
use super::HUE;
use super::POWER;
use super::SATURATION;
use crate::protocol::Dpid;
use crate::protocol::TypeCode;

/// Number of gangs exposed for a bitmask switch unless configured otherwise.
pub const DEFAULT_GANGS: u8 = 2;

/// Per-device classification setting.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KindOverride {
    /// Decide from attribute ids and type code
    #[default]
    Auto,
    Light,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationPolicy {
    pub kind: KindOverride,

    /// Gangs to expose when the device is driven as a switch
    pub gangs: u8,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            kind: KindOverride::Auto,
            gangs: DEFAULT_GANGS,
        }
    }
}

/// How a device should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    /// Multi-gang switch driven through the DPID 1 bitmask
    Switch { gangs: u8 },
    Unsupported,
}

pub fn classify(dpids: &[Dpid], type_code: &TypeCode, policy: &ClassificationPolicy) -> DeviceKind {
    let switch = DeviceKind::Switch {
        gangs: policy.gangs,
    };
    match policy.kind {
        KindOverride::Light => return DeviceKind::Light,
        KindOverride::Switch => return switch,
        KindOverride::Auto => {}
    }

    let has = |dpid: Dpid| dpids.contains(&dpid);

    // Hue without saturation is a switch timer, not a color channel.
    if has(HUE) && !has(SATURATION) {
        return if has(POWER) {
            switch
        } else {
            DeviceKind::Unsupported
        };
    }
    // Hue and saturation only count together with a light type code.
    if has(COLOR_TEMP) || type_code.is_light() {
        return DeviceKind::Light;
    }
    if has(POWER) {
        return switch;
    }
    DeviceKind::Unsupported
}
