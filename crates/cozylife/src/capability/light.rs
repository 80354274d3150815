use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::json;

use super::brightness_from_device;
use super::brightness_to_device;
use super::hue_from_device;
use super::hue_to_device;
use super::kelvin_from_device;
use super::kelvin_to_device;
use super::raw_value;
use super::saturation_from_device;
use super::saturation_to_device;
use super::valid_value;
use super::BRIGHTNESS;
use super::COLOR_TEMP;
use super::HUE;
use super::POWER;
use super::SATURATION;
use super::WORK_MODE;
use crate::protocol::AttributeMap;
use crate::protocol::Dpid;

/// Power value sent when turning a light on.
const POWER_ON: u64 = 255;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColorMode {
    OnOff,
    Brightness,
    ColorTemp,
    Hs,
}

/// What a light can do, derived from its supported attribute ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightFeatures {
    dpids: Vec<Dpid>,
    modes: BTreeSet<ColorMode>,
}

impl LightFeatures {
    pub fn from_dpids(dpids: &[Dpid]) -> Self {
        let has = |dpid: Dpid| dpids.contains(&dpid);
        let mut modes = BTreeSet::new();

        if has(HUE) && has(SATURATION) {
            modes.insert(ColorMode::Hs);
        }
        if has(COLOR_TEMP) {
            modes.insert(ColorMode::ColorTemp);
        }
        // Color modes imply brightness control.
        if has(BRIGHTNESS) && modes.is_empty() {
            modes.insert(ColorMode::Brightness);
        }
        if modes.is_empty() {
            modes.insert(ColorMode::OnOff);
        }

        Self {
            dpids: dpids.to_vec(),
            modes,
        }
    }

    pub fn supported_color_modes(&self) -> &BTreeSet<ColorMode> {
        &self.modes
    }

    pub fn supports(&self, mode: ColorMode) -> bool {
        self.modes.contains(&mode)
    }

    fn has(&self, dpid: Dpid) -> bool {
        self.dpids.contains(&dpid)
    }
}

/// Normalized snapshot of a light.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightState {
    pub on: bool,

    /// Brightness level (0-255), if known.
    pub brightness: Option<u8>,

    pub color_mode: ColorMode,

    /// Hue in degrees and saturation in percent, while in color mode.
    pub hs_color: Option<(f64, f64)>,

    /// Color temperature, while in white mode.
    pub color_temp_kelvin: Option<u32>,
}

impl LightState {
    /// Read a light out of raw device attributes.
    pub fn from_attributes(state: &AttributeMap, features: &LightFeatures) -> Self {
        let on = state.get(&POWER).and_then(raw_value).unwrap_or(0) > 0;
        let brightness = valid_value(state, BRIGHTNESS).map(brightness_from_device);

        let hs_color = match (valid_value(state, HUE), valid_value(state, SATURATION)) {
            (Some(hue), Some(sat)) => Some((hue_from_device(hue), saturation_from_device(sat))),
            _ => None,
        };
        let color_temp_kelvin = valid_value(state, COLOR_TEMP).map(kelvin_from_device);

        let color_mode = if hs_color.is_some() {
            ColorMode::Hs
        } else if color_temp_kelvin.is_some() {
            ColorMode::ColorTemp
        } else if features.supports(ColorMode::Brightness) && brightness.is_some() {
            ColorMode::Brightness
        } else {
            ColorMode::OnOff
        };

        Self {
            on,
            brightness,
            color_mode,
            hs_color,
            color_temp_kelvin,
        }
    }
}

/// A request to turn a light on, optionally changing its settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightCommand {
    pub brightness: Option<u8>,
    pub hs_color: Option<(f64, f64)>,
    pub color_temp_kelvin: Option<u32>,
}

impl LightCommand {
    /// Attributes to send. Settings the light does not support are dropped.
    pub fn to_attributes(&self, features: &LightFeatures) -> AttributeMap {
        let mut attrs = AttributeMap::new();
        attrs.insert(POWER, json!(POWER_ON));
        attrs.insert(WORK_MODE, json!(0));

        if let Some(brightness) = self.brightness.filter(|_| features.has(BRIGHTNESS)) {
            attrs.insert(BRIGHTNESS, json!(brightness_to_device(brightness)));
        }
        if let Some((hue, sat)) = self.hs_color.filter(|_| features.supports(ColorMode::Hs)) {
            attrs.insert(HUE, json!(hue_to_device(hue)));
            attrs.insert(SATURATION, json!(saturation_to_device(sat)));
        }
        if let Some(kelvin) = self.color_temp_kelvin.filter(|_| features.has(COLOR_TEMP)) {
            attrs.insert(COLOR_TEMP, json!(kelvin_to_device(kelvin)));
        }
        attrs
    }
}

pub fn turn_off_attributes() -> AttributeMap {
    AttributeMap::from([(POWER, json!(0))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(ids: &[u16]) -> LightFeatures {
        let dpids: Vec<Dpid> = ids.iter().copied().map(Dpid).collect();
        LightFeatures::from_dpids(&dpids)
    }

    fn state(pairs: &[(u16, serde_json::Value)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(id, v)| (Dpid(*id), v.clone()))
            .collect()
    }

    #[test]
    fn test_supported_modes() {
        let rgbcw = features(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(
            rgbcw.supported_color_modes().iter().collect::<Vec<_>>(),
            vec![&ColorMode::ColorTemp, &ColorMode::Hs]
        );

        assert!(features(&[1, 4]).supports(ColorMode::Brightness));
        assert!(!features(&[1, 3, 4]).supports(ColorMode::Brightness));
        assert!(features(&[1]).supports(ColorMode::OnOff));
        assert!(features(&[]).supports(ColorMode::OnOff));
    }

    #[test]
    fn test_state_in_white_mode() {
        let features = features(&[1, 2, 3, 4, 5, 6]);
        let light = LightState::from_attributes(
            &state(&[
                (1, json!(255)),
                (3, json!(1000)),
                (4, json!(1000)),
                (5, json!(65535)),
                (6, json!(65535)),
            ]),
            &features,
        );

        assert!(light.on);
        assert_eq!(light.brightness, Some(255));
        assert_eq!(light.color_mode, ColorMode::ColorTemp);
        assert_eq!(light.color_temp_kelvin, Some(6500));
        assert_eq!(light.hs_color, None);
    }

    #[test]
    fn test_state_in_color_mode() {
        let features = features(&[1, 2, 3, 4, 5, 6]);
        let light = LightState::from_attributes(
            &state(&[
                (1, json!(0)),
                (3, json!(65535)),
                (5, json!(120)),
                (6, json!(500)),
            ]),
            &features,
        );

        assert!(!light.on);
        assert_eq!(light.color_mode, ColorMode::Hs);
        assert_eq!(light.hs_color, Some((120.0, 50.0)));
        assert_eq!(light.color_temp_kelvin, None);
    }

    #[test]
    fn test_state_dimmer() {
        let light = LightState::from_attributes(
            &state(&[(1, json!(1)), (4, json!(500))]),
            &features(&[1, 4]),
        );
        assert_eq!(light.color_mode, ColorMode::Brightness);
        assert_eq!(light.brightness, Some(128));

        let light = LightState::from_attributes(&AttributeMap::new(), &features(&[1]));
        assert!(!light.on);
        assert_eq!(light.color_mode, ColorMode::OnOff);
    }

    #[test]
    fn test_state_ignores_not_applicable_values() {
        let light = LightState::from_attributes(
            &state(&[
                (1, json!(255)),
                (4, json!(65535)),
                (5, json!(120)),
                (6, json!(65535)),
            ]),
            &features(&[1, 2, 3, 4, 5, 6]),
        );

        assert!(light.on);
        assert_eq!(light.brightness, None);
        assert_eq!(light.hs_color, None);
        assert_eq!(light.color_mode, ColorMode::OnOff);
    }

    #[test]
    fn test_turn_on_payload() {
        let command = LightCommand {
            brightness: Some(255),
            hs_color: Some((240.0, 100.0)),
            color_temp_kelvin: Some(2000),
        };
        let attrs = command.to_attributes(&features(&[1, 2, 3, 4, 5, 6]));

        assert_eq!(
            attrs,
            state(&[
                (1, json!(255)),
                (2, json!(0)),
                (3, json!(0)),
                (4, json!(1000)),
                (5, json!(240)),
                (6, json!(1000)),
            ])
        );
    }

    #[test]
    fn test_turn_on_drops_unsupported() {
        let command = LightCommand {
            brightness: Some(128),
            hs_color: Some((10.0, 10.0)),
            color_temp_kelvin: Some(4000),
        };
        let attrs = command.to_attributes(&features(&[1, 4]));

        assert_eq!(
            attrs,
            state(&[(1, json!(255)), (2, json!(0)), (4, json!(502))])
        );
    }

    #[test]
    fn test_turn_off_payload() {
        assert_eq!(turn_off_attributes(), state(&[(1, json!(0))]));
    }
}
