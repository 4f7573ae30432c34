//! Plain-value equalizer presets for the persistence layer.

use serde::{Deserialize, Serialize};

use super::analog::AnalogSettings;
use super::band::BandSettings;
use super::NUM_BANDS;
use crate::engine::error::EngineResult;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqPreset {
    pub name: String,
    pub bands: [BandSettings; NUM_BANDS],
    pub analog: AnalogSettings,
}

impl EqPreset {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eq::{AnalogModel, BandType, FilterSlope};

    #[test]
    fn test_preset_json() {
        let mut preset = EqPreset {
            name: "Air".into(),
            ..EqPreset::default()
        };
        preset.bands[4].band_type = BandType::HighShelf;
        preset.bands[4].frequency = 10000.0;
        preset.bands[4].gain_db = 3.0;
        preset.bands[0].slope = FilterSlope::Slope48dB;
        preset.analog.set_model(AnalogModel::SslChannel);

        let json = preset.to_json().unwrap();
        let back = EqPreset::from_json(&json).unwrap();
        assert_eq!(back, preset);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let preset = EqPreset::from_json(r#"{ "name": "Empty" }"#).unwrap();
        assert_eq!(preset.name, "Empty");
        assert_eq!(preset.bands[2], BandSettings::default());
        assert!(EqPreset::from_json("{ not json").is_err());
    }
}
