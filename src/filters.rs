//! Preset composition on top of the [`Filters`] record.

use crate::model::{
    Equalizer, Filters, Karaoke, LowPass, Rotation, Timescale, Tremolo, Vibrato,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Intensity of the bass-boost preset.
pub enum BassBoostLevel {
    /// A subtle lift of the low bands.
    Low,
    /// A noticeable lift.
    Medium,
    /// An aggressive lift.
    High,
}

impl BassBoostLevel {
    fn gains(self) -> [f32; 4] {
        match self {
            BassBoostLevel::Low => [0.1, 0.1, 0.05, 0.0],
            BassBoostLevel::Medium => [0.2, 0.15, 0.1, 0.05],
            BassBoostLevel::High => [0.3, 0.25, 0.2, 0.1],
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Composes filter presets into a single [`Filters`] record.
///
/// Presets stack: `FilterBuilder::new().bass_boost(...).nightcore().build()`
/// yields one record carrying both the equalizer and the timescale. Later
/// calls touching the same filter replace the earlier value.
pub struct FilterBuilder {
    filters: Filters,
}

impl FilterBuilder {
    /// Start from the empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record.
    pub fn from_filters(filters: Filters) -> Self {
        Self { filters }
    }

    /// Set the volume multiplier, clamped to `0.0..=5.0`.
    pub fn volume(mut self, volume: f32) -> Self {
        self.filters.volume = Some(volume.clamp(0.0, 5.0));
        self
    }

    /// Set the equalizer bands. Ranges are checked when the record is applied
    /// through [`crate::Player::set_filters`].
    pub fn equalizer(mut self, bands: Vec<Equalizer>) -> Self {
        self.filters.equalizer = Some(bands);
        self
    }

    /// Lift the low equalizer bands.
    pub fn bass_boost(mut self, level: BassBoostLevel) -> Self {
        let bands = level
            .gains()
            .into_iter()
            .enumerate()
            .map(|(band, gain)| Equalizer {
                band: band as u8,
                gain,
            })
            .collect();

        self.filters.equalizer = Some(bands);
        self
    }

    /// Speed and pitch up playback.
    pub fn nightcore(mut self) -> Self {
        self.filters.timescale = Some(Timescale {
            speed: Some(1.2),
            pitch: Some(1.2),
            rate: Some(1.0),
        });
        self
    }

    /// Slow and pitch down playback.
    pub fn vaporwave(mut self) -> Self {
        self.filters.timescale = Some(Timescale {
            speed: Some(0.8),
            pitch: Some(0.8),
            rate: Some(1.0),
        });
        self
    }

    /// Rotate the audio around the listener.
    pub fn eight_d(mut self) -> Self {
        self.filters.rotation = Some(Rotation {
            rotation_hz: Some(0.2),
        });
        self
    }

    /// Suppress vocals.
    pub fn karaoke(mut self) -> Self {
        self.filters.karaoke = Some(Karaoke {
            level: Some(1.0),
            mono_level: Some(1.0),
            filter_band: Some(220.0),
            filter_width: Some(100.0),
        });
        self
    }

    /// Oscillate the volume.
    pub fn tremolo(mut self) -> Self {
        self.filters.tremolo = Some(Tremolo {
            frequency: Some(2.0),
            depth: Some(0.5),
        });
        self
    }

    /// Oscillate the pitch.
    pub fn vibrato(mut self) -> Self {
        self.filters.vibrato = Some(Vibrato {
            frequency: Some(2.0),
            depth: Some(0.5),
        });
        self
    }

    /// Muffle high frequencies.
    pub fn low_pass(mut self) -> Self {
        self.filters.low_pass = Some(LowPass {
            smoothing: Some(20.0),
        });
        self
    }

    /// Set a plugin-defined filter.
    pub fn plugin_filter(
        mut self,
        plugin: &str,
        values: std::collections::HashMap<String, serde_json::Value>,
    ) -> Self {
        self.filters
            .plugin_filters
            .get_or_insert_with(Default::default)
            .insert(plugin.to_owned(), values);
        self
    }

    /// Finish composing.
    pub fn build(self) -> Filters {
        self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_serializes_to_empty_object() {
        let json = serde_json::to_string(&Filters::default()).expect("serialize");

        assert_eq!(json, "{}");
    }

    #[test]
    fn presets_compose_into_one_record() {
        let filters = FilterBuilder::new()
            .bass_boost(BassBoostLevel::Medium)
            .nightcore()
            .eight_d()
            .build();

        let equalizer = filters.equalizer.expect("equalizer set");
        assert_eq!(equalizer.len(), 4);
        assert_eq!(equalizer[0], Equalizer { band: 0, gain: 0.2 });

        let timescale = filters.timescale.expect("timescale set");
        assert_eq!(timescale.speed, Some(1.2));

        assert_eq!(
            filters.rotation.expect("rotation set").rotation_hz,
            Some(0.2)
        );
        assert!(filters.karaoke.is_none());
    }

    #[test]
    fn later_presets_replace_earlier_values() {
        let filters = FilterBuilder::new().nightcore().vaporwave().build();

        assert_eq!(filters.timescale.expect("timescale").speed, Some(0.8));
    }

    #[test]
    fn volume_is_clamped() {
        let filters = FilterBuilder::new().volume(9.0).build();

        assert_eq!(filters.volume, Some(5.0));
    }

    #[test]
    fn bass_boost_serializes_camel_case() {
        let filters = FilterBuilder::new().bass_boost(BassBoostLevel::Low).build();

        let json = serde_json::to_value(&filters).expect("serialize");

        assert_eq!(json["equalizer"][0]["band"], 0);
        assert!(json.get("timescale").is_none());
    }
}
