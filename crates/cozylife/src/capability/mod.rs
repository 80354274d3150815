//! Translation between raw device attribute values and normalized
//! capabilities.
//!
//! Devices report everything on their own scales (mostly 0-1000). The helpers
//! here convert to the ranges the rest of the world expects and back. None of
//! them touch the network.

pub mod classify;
pub mod light;
pub mod switch;

use serde_json::Value;

use crate::protocol::AttributeMap;
use crate::protocol::Dpid;

/// Power on/off, or the gang bitmask on multi-way switches.
pub const POWER: Dpid = Dpid(1);
/// Work mode: 0 white/temperature, 1 color/scene.
pub const WORK_MODE: Dpid = Dpid(2);
pub const COLOR_TEMP: Dpid = Dpid(3);
pub const BRIGHTNESS: Dpid = Dpid(4);
pub const HUE: Dpid = Dpid(5);
pub const SATURATION: Dpid = Dpid(6);

/// Values at or above this mean "not applicable in the current mode", e.g.
/// hue reads 65535 while the light is in white mode.
pub const INVALID_THRESHOLD: u64 = 60_000;

pub const MIN_KELVIN: u32 = 2000;
pub const MAX_KELVIN: u32 = 6500;

const DEVICE_SCALE: f64 = 1000.0;

/// Raw numeric value of an attribute, if it is a non-negative number.
pub fn raw_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

/// Raw value of `dpid` in `state`, treating the sentinel range as absent.
pub fn valid_value(state: &AttributeMap, dpid: Dpid) -> Option<u64> {
    state
        .get(&dpid)
        .and_then(raw_value)
        .filter(|v| *v < INVALID_THRESHOLD)
}

/// Device brightness (0-1000) to 0-255.
pub fn brightness_from_device(raw: u64) -> u8 {
    let scaled = (raw.min(1000) as f64 / DEVICE_SCALE * 255.0).round();
    scaled as u8
}

/// 0-255 brightness to the device scale (0-1000).
pub fn brightness_to_device(brightness: u8) -> u64 {
    (brightness as f64 / 255.0 * DEVICE_SCALE).round() as u64
}

/// Hue is reported in degrees already.
pub fn hue_from_device(raw: u64) -> f64 {
    raw.min(360) as f64
}

pub fn hue_to_device(hue: f64) -> u64 {
    hue.clamp(0.0, 360.0).round() as u64
}

/// Device saturation (0-1000) to percent.
pub fn saturation_from_device(raw: u64) -> f64 {
    raw.min(1000) as f64 / 10.0
}

pub fn saturation_to_device(saturation: f64) -> u64 {
    (saturation.clamp(0.0, 100.0) * 10.0).round() as u64
}

/// Device color temperature (0-1000, warm to cool) to Kelvin.
pub fn kelvin_from_device(raw: u64) -> u32 {
    let span = (MAX_KELVIN - MIN_KELVIN) as f64;
    (raw.min(1000) as f64 / DEVICE_SCALE * span) as u32 + MIN_KELVIN
}

/// Kelvin to the device color temperature scale, clamped to the supported
/// range.
pub fn kelvin_to_device(kelvin: u32) -> u64 {
    let kelvin = kelvin.clamp(MIN_KELVIN, MAX_KELVIN);
    let span = (MAX_KELVIN - MIN_KELVIN) as f64;
    ((kelvin - MIN_KELVIN) as f64 / span * DEVICE_SCALE).round() as u64
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_brightness_round_trip() {
        assert_eq!(brightness_to_device(255), 1000);
        assert_eq!(brightness_from_device(1000), 255);
        assert_eq!(brightness_to_device(0), 0);
        assert_eq!(brightness_from_device(0), 0);

        for b in 0..=255u8 {
            let back = brightness_from_device(brightness_to_device(b));
            assert!(back.abs_diff(b) <= 1, "{b} drifted to {back}");
        }
    }

    #[test]
    fn test_brightness_rounds_to_nearest() {
        // 500 / 1000 * 255 = 127.5
        assert_eq!(brightness_from_device(500), 128);
        // 128 / 255 * 1000 = 501.96
        assert_eq!(brightness_to_device(128), 502);
    }

    #[test]
    fn test_kelvin_bounds() {
        assert_eq!(kelvin_from_device(0), 2000);
        assert_eq!(kelvin_from_device(1000), 6500);
        assert_eq!(kelvin_from_device(500), 4250);

        assert_eq!(kelvin_to_device(2000), 0);
        assert_eq!(kelvin_to_device(6500), 1000);
        assert_eq!(kelvin_to_device(4250), 500);
        // out of range requests clamp
        assert_eq!(kelvin_to_device(1500), 0);
        assert_eq!(kelvin_to_device(9000), 1000);
    }

    #[test]
    fn test_hue_and_saturation() {
        assert_eq!(hue_from_device(240), 240.0);
        assert_eq!(hue_to_device(239.6), 240);
        assert_eq!(saturation_from_device(1000), 100.0);
        assert_eq!(saturation_from_device(455), 45.5);
        assert_eq!(saturation_to_device(45.5), 455);
    }

    #[test]
    fn test_sentinel_is_absent() {
        let mut state = AttributeMap::new();
        state.insert(COLOR_TEMP, json!(65535));
        state.insert(HUE, json!(60000));
        state.insert(SATURATION, json!(59999));
        state.insert(BRIGHTNESS, json!("bright"));

        assert_eq!(valid_value(&state, COLOR_TEMP), None);
        assert_eq!(valid_value(&state, HUE), None);
        assert_eq!(valid_value(&state, SATURATION), Some(59999));
        assert_eq!(valid_value(&state, BRIGHTNESS), None);
        assert_eq!(valid_value(&state, POWER), None);
    }

    #[test]
    fn test_raw_value_accepts_floats() {
        assert_eq!(raw_value(&json!(12.6)), Some(13));
        assert_eq!(raw_value(&json!(-1)), None);
        assert_eq!(raw_value(&json!(null)), None);
    }
}
