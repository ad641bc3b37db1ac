//! Shared per-target channels and the priority/weight compose graph.
//!
//! Every channel an animation drives receives one contribution per attached
//! instance. Compiling orders the contributions from highest priority down
//! and cuts the list below the first fully weighted layer; evaluation then
//! blends the surviving layers bottom-up over the channel's rest value.

use hashbrown::HashMap;
use tracing::{debug, trace};

use cadence_message::InstanceId;

use crate::definition::{AnimationDefinition, ChannelTrack, Keyframe};
use crate::error::{AnimationError, AnimationResult};
use crate::instance::AnimationInstance;
use crate::value::Value;

/// Find the keys bracketing `t` and the local fraction between them.
///
/// Before the first key returns `(0, 0, 0)`, past the last `(last, last, 0)`.
fn find_segment(keys: &[Keyframe], t: f32) -> (usize, usize, f32) {
    let n = keys.len();
    if n <= 1 || t <= keys[0].time {
        return (0, 0, 0.0);
    }
    if t >= keys[n - 1].time {
        return (n - 1, n - 1, 0.0);
    }
    let i = keys.partition_point(|k| k.time <= t).saturating_sub(1);
    let (t0, t1) = (keys[i].time, keys[i + 1].time);
    let denom = (t1 - t0).max(f32::EPSILON);
    (i, i + 1, ((t - t0) / denom).clamp(0.0, 1.0))
}

/// Linear sample of a track at animation time `t`, held at both ends.
pub fn sample_track(track: &ChannelTrack, t: f32) -> Option<Value> {
    if track.keys.is_empty() {
        return None;
    }
    let (i0, i1, lt) = find_segment(&track.keys, t);
    let left = &track.keys[i0].value;
    if i0 == i1 {
        return Some(left.clone());
    }
    Some(left.lerp(&track.keys[i1].value, lt))
}

#[derive(Clone, Debug, PartialEq)]
struct Contribution {
    instance: InstanceId,
    /// Index into the definition's `channels`.
    track: usize,
    priority: i32,
    seq: u64,
}

#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    zero_state: Value,
    contributions: Vec<Contribution>,
    /// Indices into `contributions`, lowest layer first.
    compiled: Vec<usize>,
    value: Value,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn zero_state(&self) -> &Value {
        &self.zero_state
    }
}

#[derive(Clone, Debug)]
pub struct ChannelGraph {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
    max_channels: usize,
    needs_compile: bool,
    next_seq: u64,
}

impl ChannelGraph {
    pub fn new(max_channels: usize) -> Self {
        Self {
            channels: Vec::new(),
            index: HashMap::new(),
            max_channels,
            needs_compile: false,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channel_index(name).map(|i| &self.channels[i])
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.channel(name).map(|c| &c.value)
    }

    #[inline]
    pub fn needs_compile(&self) -> bool {
        self.needs_compile
    }

    pub fn set_needs_compile(&mut self) {
        self.needs_compile = true;
    }

    /// Merge every track of `def` into its channel at `priority`.
    ///
    /// Returns the channel index of each track. Fails without touching the
    /// graph when the new channels would exceed the channel cap.
    pub fn install(
        &mut self,
        instance: InstanceId,
        def: &AnimationDefinition,
        priority: i32,
    ) -> AnimationResult<Vec<usize>> {
        let mut new_names: Vec<&str> = Vec::new();
        for track in &def.channels {
            let name = track.channel.as_str();
            if !self.index.contains_key(name) && !new_names.contains(&name) {
                new_names.push(name);
            }
        }
        let count = self.channels.len() + new_names.len();
        if count > self.max_channels {
            return Err(AnimationError::TooManyChannels {
                count,
                max: self.max_channels,
            });
        }

        let mut installed = Vec::with_capacity(def.channels.len());
        for (track_idx, track) in def.channels.iter().enumerate() {
            let Some(zero) = track.zero_state() else {
                continue;
            };
            let ch_idx = match self.index.get(track.channel.as_str()) {
                Some(&i) => i,
                None => {
                    let i = self.channels.len();
                    self.channels.push(Channel {
                        name: track.channel.clone(),
                        zero_state: zero.clone(),
                        contributions: Vec::new(),
                        compiled: Vec::new(),
                        value: zero.clone(),
                    });
                    self.index.insert(track.channel.clone(), i);
                    i
                }
            };
            self.next_seq += 1;
            self.channels[ch_idx].contributions.push(Contribution {
                instance,
                track: track_idx,
                priority,
                seq: self.next_seq,
            });
            installed.push(ch_idx);
        }
        self.needs_compile = true;
        debug!(
            target: "cadence::blend",
            anim = %def.name,
            instance = instance.0,
            channels = installed.len(),
            "channels installed"
        );
        Ok(installed)
    }

    /// Drop every contribution of `instance`. Channels themselves stay so
    /// that dirty-mask bits keep their meaning.
    pub fn uninstall(&mut self, instance: InstanceId) {
        for ch in &mut self.channels {
            ch.contributions.retain(|c| c.instance != instance);
            ch.compiled.clear();
        }
        self.needs_compile = true;
    }

    /// Rebuild every channel's layer list from current blend weights.
    pub fn compile(&mut self, instances: &[AnimationInstance]) {
        for ch in &mut self.channels {
            let mut order: Vec<usize> = (0..ch.contributions.len()).collect();
            order.sort_by(|&a, &b| {
                let (ca, cb) = (&ch.contributions[a], &ch.contributions[b]);
                cb.priority.cmp(&ca.priority).then(cb.seq.cmp(&ca.seq))
            });
            ch.compiled.clear();
            for idx in order {
                let weight = find(instances, ch.contributions[idx].instance)
                    .map(|inst| inst.blend())
                    .unwrap_or(0.0);
                if weight <= 0.0 {
                    continue;
                }
                ch.compiled.push(idx);
                if weight >= 1.0 {
                    break;
                }
            }
            ch.compiled.reverse();
            trace!(
                target: "cadence::blend",
                channel = %ch.name,
                layers = ch.compiled.len(),
                "channel compiled"
            );
        }
        self.needs_compile = false;
    }

    /// Instances blended into `name`, lowest layer first.
    pub fn layers(&self, name: &str) -> Option<Vec<InstanceId>> {
        self.channel(name).map(|ch| {
            ch.compiled
                .iter()
                .map(|&i| ch.contributions[i].instance)
                .collect()
        })
    }

    /// Recompute channel values. Bit `i` of the result is set when channel `i`
    /// changed; channels whose bit is set in `ignore_mask` are left alone.
    pub fn evaluate(&mut self, instances: &[AnimationInstance], ignore_mask: u64) -> u64 {
        if self.needs_compile {
            self.compile(instances);
        }
        let mut dirty = 0u64;
        for (i, ch) in self.channels.iter_mut().enumerate() {
            let bit = 1u64 << i;
            if ignore_mask & bit != 0 {
                continue;
            }
            let mut acc = ch.zero_state.clone();
            for &idx in &ch.compiled {
                let c = &ch.contributions[idx];
                let Some(inst) = find(instances, c.instance) else {
                    continue;
                };
                if let Some(sample) = inst.sample(c.track) {
                    acc = acc.lerp(&sample, inst.blend().min(1.0));
                }
            }
            if acc != ch.value {
                ch.value = acc;
                dirty |= bit;
            }
        }
        dirty
    }
}

#[inline]
fn find(instances: &[AnimationInstance], id: InstanceId) -> Option<&AnimationInstance> {
    instances.iter().find(|i| i.id() == id)
}
