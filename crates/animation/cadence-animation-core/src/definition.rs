//! Animation definitions: the authored, immutable description of one
//! animation (bounds, looping, easing, stop points, markers, channel tracks).
//!
//! Definitions are loaded from JSON and shared between instances through
//! [`AnimationLibrary`].

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::ease::EaseKind;
use crate::error::{AnimationError, AnimationResult};
use crate::value::Value;

/// Name that addresses "the whole animation" when a command carries no name.
pub const ENTIRE_ANIMATION: &str = "(Entire Animation)";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EaseSpec {
    pub kind: EaseKind,
    pub min_length: f32,
    pub max_length: f32,
    pub length: f32,
}

/// Named instant inside the animation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub time: f32,
}

/// Named loop window that commands may select by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopSegment {
    pub name: String,
    pub begin: f32,
    pub end: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Animation time in seconds.
    pub time: f32,
    pub value: Value,
}

/// Keyframes driving one named channel of the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelTrack {
    pub channel: String,
    pub keys: Vec<Keyframe>,
}

impl ChannelTrack {
    /// Rest value the channel holds when this track contributes nothing.
    pub fn zero_state(&self) -> Option<&Value> {
        self.keys.first().map(|k| &k.value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationDefinition {
    pub name: String,
    pub start: f32,
    pub end: f32,
    /// Position to rest at before the first start; defaults to `start`.
    #[serde(default)]
    pub initial: Option<f32>,
    #[serde(default)]
    pub loop_start: Option<f32>,
    #[serde(default)]
    pub loop_end: Option<f32>,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub ease_in: EaseSpec,
    #[serde(default)]
    pub ease_out: EaseSpec,
    /// Natural resting points an eased stop may land on.
    #[serde(default)]
    pub stop_points: Vec<f32>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub loops: Vec<LoopSegment>,
    #[serde(default)]
    pub channels: Vec<ChannelTrack>,
}

impl AnimationDefinition {
    /// Bare definition with no channels, handy for driving a time converter alone.
    pub fn new(name: impl Into<String>, start: f32, end: f32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            initial: None,
            loop_start: None,
            loop_end: None,
            looped: false,
            auto_start: false,
            ease_in: EaseSpec::default(),
            ease_out: EaseSpec::default(),
            stop_points: Vec::new(),
            markers: Vec::new(),
            loops: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn from_json(text: &str) -> AnimationResult<Self> {
        let def: Self = serde_json::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> AnimationResult<()> {
        if !(self.start.is_finite() && self.end.is_finite()) || self.start > self.end {
            return Err(AnimationError::invalid(format!(
                "{}: bounds [{}, {}] are not an ordered range",
                self.name, self.start, self.end
            )));
        }
        let (lb, le) = self.loop_bounds();
        if lb > le {
            return Err(AnimationError::invalid(format!(
                "{}: loop [{lb}, {le}] is reversed",
                self.name
            )));
        }
        for track in &self.channels {
            if track.keys.is_empty() {
                return Err(AnimationError::invalid(format!(
                    "{}: channel '{}' has no keys",
                    self.name, track.channel
                )));
            }
            if track.keys.windows(2).any(|w| w[1].time < w[0].time) {
                return Err(AnimationError::invalid(format!(
                    "{}: channel '{}' keys are not time-ordered",
                    self.name, track.channel
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn loop_bounds(&self) -> (f32, f32) {
        (
            self.loop_start.unwrap_or(self.start),
            self.loop_end.unwrap_or(self.end),
        )
    }

    pub fn marker(&self, name: &str) -> Option<f32> {
        self.markers.iter().find(|m| m.name == name).map(|m| m.time)
    }

    pub fn loop_segment(&self, name: &str) -> Option<&LoopSegment> {
        self.loops.iter().find(|l| l.name == name)
    }

    /// Whether both animations drive at least one common channel.
    pub fn shares_channels_with(&self, other: &AnimationDefinition) -> bool {
        self.channels
            .iter()
            .any(|a| other.channels.iter().any(|b| a.channel == b.channel))
    }
}

/// Name-indexed store of shared definitions.
#[derive(Clone, Debug, Default)]
pub struct AnimationLibrary {
    anims: HashMap<String, Arc<AnimationDefinition>>,
}

impl AnimationLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: AnimationDefinition) -> Arc<AnimationDefinition> {
        let def = Arc::new(def);
        self.anims.insert(def.name.clone(), Arc::clone(&def));
        def
    }

    pub fn load_json(&mut self, text: &str) -> AnimationResult<Arc<AnimationDefinition>> {
        Ok(self.insert(AnimationDefinition::from_json(text)?))
    }

    pub fn get(&self, name: &str) -> AnimationResult<Arc<AnimationDefinition>> {
        self.anims
            .get(name)
            .cloned()
            .ok_or_else(|| AnimationError::UnknownAnimation {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.anims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOOR: &str = r#"{
        "name": "door",
        "start": 0.0,
        "end": 4.0,
        "loopStart": 1.0,
        "loop": true,
        "autoStart": true,
        "easeIn": { "kind": "const_accel", "minLength": 0.5, "maxLength": 1.0, "length": 0.5 },
        "stopPoints": [2.0],
        "markers": [{ "name": "creak", "time": 1.5 }],
        "channels": [
            { "channel": "hinge", "keys": [
                { "time": 0.0, "value": { "type": "Scalar", "data": 0.0 } },
                { "time": 4.0, "value": { "type": "Scalar", "data": 90.0 } }
            ] }
        ]
    }"#;

    #[test]
    fn parses_camel_case_definition() {
        let def = AnimationDefinition::from_json(DOOR).unwrap();
        assert_eq!(def.loop_bounds(), (1.0, 4.0));
        assert!(def.looped && def.auto_start);
        assert_eq!(def.ease_in.kind, EaseKind::ConstAccel);
        assert_eq!(def.marker("creak"), Some(1.5));
        assert_eq!(def.channels[0].zero_state(), Some(&Value::Scalar(0.0)));
    }

    #[test]
    fn rejects_reversed_bounds() {
        let def = AnimationDefinition::new("bad", 5.0, 1.0);
        assert_eq!(def.validate().unwrap_err().category(), "validation");
    }

    #[test]
    fn library_lookup() {
        let mut lib = AnimationLibrary::new();
        lib.load_json(DOOR).unwrap();
        assert!(lib.get("door").is_ok());
        assert!(matches!(
            lib.get("window"),
            Err(AnimationError::UnknownAnimation { .. })
        ));
    }
}
