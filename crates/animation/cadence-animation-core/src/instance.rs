//! One playing animation on a target: its time converter plus the blend
//! weight and amplitude it contributes with, each optionally fading.

use std::sync::Arc;

use tracing::{debug, warn};

use cadence_message::{CallbackEvent, EntityKey, EventCallback, InstanceId, Message};

use crate::channel::sample_track;
use crate::config::Config;
use crate::definition::AnimationDefinition;
use crate::time_convert::TimeConvert;
use crate::value::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FadeKind {
    Blend,
    Amplitude,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Fade {
    goal: f32,
    /// Signed per-second step toward `goal`.
    rate: f32,
}

/// What the manager must do after a fade step or fade setup.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FadeOutcome {
    /// Blend crossed a 0/1 boundary and the graph must be recompiled.
    pub recompile: bool,
    /// Blend reached zero on a fade that asked to detach.
    pub detach: bool,
}

/// Completion callback attached to a one-shot animation: fires at a marker
/// when one is named, otherwise when the animation stops.
#[derive(Clone, Debug, PartialEq)]
pub struct OneShotCallback {
    pub marker: Option<String>,
    pub receiver: EntityKey,
    pub user: i32,
}

#[derive(Clone, Debug)]
pub struct AnimationInstance {
    id: InstanceId,
    def: Arc<AnimationDefinition>,
    time: TimeConvert,
    blend: f32,
    blend_fade: Option<Fade>,
    fade_detach: bool,
    amplitude: Option<f32>,
    amp_fade: Option<Fade>,
    priority: i32,
}

/// One fade step: move `cur` toward the goal by `rate * elapsed` without overshooting.
fn step_fade(fade: &Fade, cur: f32, elapsed: f32) -> f32 {
    let next = cur + fade.rate * elapsed;
    if fade.rate > 0.0 {
        next.min(fade.goal)
    } else {
        next.max(fade.goal)
    }
}

#[inline]
fn crosses_bound(old: f32, new: f32) -> bool {
    old != new && (old == 0.0 || new == 0.0 || old == 1.0 || new == 1.0)
}

impl AnimationInstance {
    /// Create the instance and initialise its time converter for `owner`.
    pub fn new(
        id: InstanceId,
        def: Arc<AnimationDefinition>,
        owner: EntityKey,
        cfg: &Config,
        now: f64,
    ) -> Self {
        let mut time = TimeConvert::new(cfg);
        time.init(&def, id, owner, now);
        Self {
            id,
            def,
            time,
            blend: 0.0,
            blend_fade: None,
            fade_detach: false,
            amplitude: None,
            amp_fade: None,
            priority: cfg.default_blend_priority,
        }
    }

    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &AnimationDefinition {
        &self.def
    }

    pub fn definition_arc(&self) -> &Arc<AnimationDefinition> {
        &self.def
    }

    pub fn time(&self) -> &TimeConvert {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut TimeConvert {
        &mut self.time
    }

    #[inline]
    pub fn blend(&self) -> f32 {
        self.blend
    }

    #[inline]
    pub fn amplitude(&self) -> Option<f32> {
        self.amplitude
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn is_fading(&self) -> bool {
        self.blend_fade.is_some() || self.amp_fade.is_some()
    }

    /// Set the blend weight. Returns `true` when the graph must be recompiled.
    pub fn set_blend(&mut self, blend: f32) -> bool {
        let old = self.blend;
        self.blend = blend;
        crosses_bound(old, blend)
    }

    pub fn set_amplitude(&mut self, amp: f32) {
        self.amplitude = Some(amp);
    }

    pub fn clear_amplitude(&mut self) {
        self.amplitude = None;
        self.amp_fade = None;
    }

    /// Ramp blend or amplitude toward `goal` at `rate` per second.
    ///
    /// A zero rate applies the goal at once; with `detach` set, a blend fade
    /// ending at zero asks for the instance to be detached.
    pub fn fade(&mut self, goal: f32, rate: f32, kind: FadeKind, detach: bool) -> FadeOutcome {
        let mut outcome = FadeOutcome::default();
        if rate == 0.0 {
            match kind {
                FadeKind::Blend => {
                    outcome.recompile = self.set_blend(goal);
                    self.blend_fade = None;
                    self.fade_detach = detach;
                    outcome.detach = detach && goal == 0.0;
                }
                FadeKind::Amplitude => {
                    self.set_amplitude(goal);
                    self.amp_fade = None;
                }
            }
            return outcome;
        }

        let cur = match kind {
            FadeKind::Blend => self.blend,
            FadeKind::Amplitude => self.amplitude.unwrap_or(1.0),
        };
        let mut rate = rate.abs();
        if cur > goal {
            rate = -rate;
        }
        let fade = Some(Fade { goal, rate });
        match kind {
            FadeKind::Blend => {
                self.blend_fade = fade;
                self.fade_detach = detach;
            }
            FadeKind::Amplitude => {
                if self.amplitude.is_none() {
                    self.amplitude = Some(cur);
                }
                self.amp_fade = fade;
            }
        }
        debug!(
            target: "cadence::blend",
            anim = %self.def.name,
            ?kind,
            goal,
            rate,
            "fade started"
        );
        outcome
    }

    /// Advance active fades by `elapsed` seconds.
    pub fn process_fade(&mut self, elapsed: f32) -> FadeOutcome {
        let mut outcome = FadeOutcome::default();
        if let Some(fade) = self.blend_fade {
            let next = step_fade(&fade, self.blend, elapsed);
            if next == fade.goal {
                self.blend_fade = None;
            }
            outcome.recompile = self.set_blend(next);
            if self.fade_detach && next == fade.goal && fade.goal == 0.0 {
                outcome.detach = true;
            }
        }
        if let (Some(fade), Some(amp)) = (self.amp_fade, self.amplitude) {
            let next = step_fade(&fade, amp, elapsed);
            if next == fade.goal {
                self.amp_fade = None;
            }
            self.amplitude = Some(next);
        }
        outcome
    }

    /// Sample track `track` of the definition at the current animation time,
    /// scaled by amplitude against the track's rest value.
    pub fn sample(&self, track: usize) -> Option<Value> {
        let track = self.def.channels.get(track)?;
        let value = sample_track(track, self.time.current_anim_time())?;
        match (self.amplitude, track.zero_state()) {
            (Some(amp), Some(zero)) => Some(zero.lerp(&value, amp)),
            _ => Some(value),
        }
    }

    /// Register one-shot completion callbacks on the time converter.
    pub fn attach_callbacks(&mut self, callbacks: &[OneShotCallback]) {
        for cb in callbacks {
            let event = match &cb.marker {
                Some(marker) => match self.def.marker(marker) {
                    Some(t) => EventCallback::new(CallbackEvent::Time, cb.user).at_time(t),
                    None => {
                        warn!(
                            target: "cadence::blend",
                            anim = %self.def.name,
                            marker = %marker,
                            "one-shot callback names an unknown marker"
                        );
                        continue;
                    }
                },
                None => EventCallback::new(CallbackEvent::Stop, cb.user),
            };
            self.time.add_callback(Message::callback(cb.receiver, event));
        }
    }

    pub fn seek_relative(&mut self, delta: f32, jump: bool, now: f64) {
        let t = self.time.current_anim_time() + delta;
        self.time.set_current_anim_time(t, jump, now);
    }

    pub fn set_speed(&mut self, speed: f32, rate: f32, now: f64) {
        self.time.set_speed(speed, rate, now);
    }

    pub fn set_loop(&mut self, on: bool, now: f64) {
        self.time.set_loop(on, now);
    }

    pub fn is_at_end(&self) -> bool {
        if self.time.is_backwards() {
            self.time.current_anim_time() <= self.time.begin()
        } else {
            self.time.current_anim_time() >= self.time.end()
        }
    }

    pub fn world_to_anim_time_no_update(&self, world: f64) -> f32 {
        self.time.world_to_anim_time_no_update(world)
    }
}
