//! World time to animation time conversion.
//!
//! A `TimeConvert` owns the playback state of one animation instance: bounds,
//! loop window, speed, direction, easing and registered callbacks. Every
//! change of playback state pushes a [`StateSnapshot`] so that earlier world
//! times can still be mapped after the state moved on.
//!
//! Nothing here reads a clock. Operations that record a state change take the
//! current world time as `now`. Fired callbacks are buffered and drained with
//! [`TimeConvert::take_outgoing`].

use std::collections::VecDeque;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use cadence_message::wire::{read_message, write_message, MAX_CALLBACKS};
use cadence_message::{
    AnimCmd, AnimCommand, BroadcastFlags, CallbackEvent, CallbackTag, EntityKey, EventCallback,
    InstanceId, Message, WireError,
};

use crate::config::Config;
use crate::definition::AnimationDefinition;
use crate::ease::{EaseCurve, EaseKind};
use crate::error::AnimationResult;
use crate::flags::PlaybackFlags;
use crate::snapshot::{resolve_position, StateSnapshot, Window};

pub const MAX_STOP_POINTS: usize = 1024;

/// Which of the three ease curves is currently driving playback.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EaseSlot {
    #[default]
    None,
    In,
    Out,
    Speed,
}

impl EaseSlot {
    pub fn to_index(self) -> u8 {
        match self {
            EaseSlot::None => 0,
            EaseSlot::In => 1,
            EaseSlot::Out => 2,
            EaseSlot::Speed => 3,
        }
    }

    pub fn from_index(i: u8) -> Option<Self> {
        match i {
            0 => Some(EaseSlot::None),
            1 => Some(EaseSlot::In),
            2 => Some(EaseSlot::Out),
            3 => Some(EaseSlot::Speed),
            _ => None,
        }
    }
}

/// The minimal state needed to resume a converter elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeConvertState {
    pub flags: PlaybackFlags,
    pub last_state_anim_time: f32,
    pub last_state_change_world_time: f64,
    pub loop_begin: f32,
    pub loop_end: f32,
    pub speed: f32,
    pub ease_slot: EaseSlot,
    pub ease_begin_world_time: f64,
}

/// Whether `secs` lies in the frame just traversed from `start` to `stop`.
///
/// The frame start is excluded so a marker on a frame boundary belongs to
/// exactly one frame. A zero-length frame on the marker itself still counts.
#[inline]
fn time_in_frame(secs: f32, start: f32, stop: f32, backwards: bool, lb: f32, le: f32) -> bool {
    if secs == start && secs == stop {
        return true;
    }
    if backwards {
        if start < stop {
            // wrapped: only markers inside the loop
            (secs < start && secs >= lb) || (secs >= stop && secs <= le)
        } else {
            secs < start && secs >= stop
        }
    } else if start > stop {
        (secs > start && secs <= le) || (secs <= stop && secs >= lb)
    } else {
        secs > start && secs <= stop
    }
}

#[derive(Clone, Debug)]
pub struct TimeConvert {
    current_anim_time: f32,
    last_eval_world_time: f64,
    frame_delta: f64,

    begin: f32,
    end: f32,
    loop_begin: f32,
    loop_end: f32,
    initial_begin: f32,
    initial_end: f32,
    speed: f32,
    wrap_time: f32,
    flags: PlaybackFlags,

    ease_in: Option<EaseCurve>,
    ease_out: Option<EaseCurve>,
    speed_ease: Option<EaseCurve>,
    current_ease: EaseSlot,

    callbacks: Vec<Message>,
    stop_points: Vec<f32>,

    states: VecDeque<StateSnapshot>,
    last_state_change: f64,
    history_cap: usize,

    owner: Option<EntityKey>,
    locally_owned: bool,
    outgoing: Vec<Message>,
    dirty: bool,
}

impl Default for TimeConvert {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl TimeConvert {
    pub fn new(cfg: &Config) -> Self {
        Self {
            current_anim_time: 0.0,
            last_eval_world_time: 0.0,
            frame_delta: 0.0,
            begin: 0.0,
            end: 0.0,
            loop_begin: 0.0,
            loop_end: 0.0,
            initial_begin: 0.0,
            initial_end: 0.0,
            speed: 1.0,
            wrap_time: 0.0,
            flags: PlaybackFlags::default(),
            ease_in: None,
            ease_out: None,
            speed_ease: None,
            current_ease: EaseSlot::None,
            callbacks: Vec::new(),
            stop_points: Vec::new(),
            states: VecDeque::new(),
            last_state_change: 0.0,
            history_cap: cfg.history_cap(),
            owner: None,
            locally_owned: true,
            outgoing: Vec::new(),
            dirty: false,
        }
    }

    /// Set up from a definition for `instance` of the blend manager `owner`.
    ///
    /// Registers the standing start, stop and single-frame-adjust callbacks
    /// addressed to `owner`, then either starts or parks in the stopped state.
    pub fn init(
        &mut self,
        def: &AnimationDefinition,
        instance: InstanceId,
        owner: EntityKey,
        now: f64,
    ) {
        for event in [
            CallbackEvent::Start,
            CallbackEvent::Stop,
            CallbackEvent::SingleFrameAdjust,
        ] {
            let cb = EventCallback {
                repeats: -1,
                tag: CallbackTag::InstanceEval(instance),
                ..EventCallback::new(event, 0)
            };
            self.add_callback(Message::callback(owner, cb));
        }

        self.set_owner(Some(owner), self.locally_owned);
        self.flags = PlaybackFlags::default();
        self.stop_points.extend_from_slice(&def.stop_points);

        self.begin = def.start;
        self.end = def.end;
        self.initial_begin = self.begin;
        self.initial_end = self.end;

        self.set_current_anim_time(def.initial.unwrap_or(def.start), false, now);
        let (lb, le) = def.loop_bounds();
        self.set_loop_points(lb, le);
        self.set_loop(def.looped, now);
        self.set_speed(1.0, 0.0, now);
        let ei = &def.ease_in;
        self.set_ease(true, ei.kind, ei.min_length, ei.max_length, ei.length);
        let eo = &def.ease_out;
        self.set_ease(false, eo.kind, eo.min_length, eo.max_length, eo.length);

        if def.auto_start {
            self.start(now);
        } else {
            self.init_stop(now);
        }
        debug!(
            target: "cadence::time",
            anim = %def.name,
            auto_start = def.auto_start,
            "time converter initialised"
        );
    }

    // ---- accessors ----------------------------------------------------

    #[inline]
    pub fn current_anim_time(&self) -> f32 {
        self.current_anim_time
    }
    #[inline]
    pub fn last_eval_world_time(&self) -> f64 {
        self.last_eval_world_time
    }
    #[inline]
    pub fn last_state_change(&self) -> f64 {
        self.last_state_change
    }
    #[inline]
    pub fn begin(&self) -> f32 {
        self.begin
    }
    #[inline]
    pub fn end(&self) -> f32 {
        self.end
    }
    #[inline]
    pub fn loop_begin(&self) -> f32 {
        self.loop_begin
    }
    #[inline]
    pub fn loop_end(&self) -> f32 {
        self.loop_end
    }
    #[inline]
    pub fn speed(&self) -> f32 {
        self.speed
    }
    #[inline]
    pub fn flags(&self) -> PlaybackFlags {
        self.flags
    }
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flags.stopped
    }
    #[inline]
    pub fn is_looped(&self) -> bool {
        self.flags.looped
    }
    #[inline]
    pub fn is_backwards(&self) -> bool {
        self.flags.backwards
    }
    #[inline]
    pub fn is_forewards(&self) -> bool {
        !self.flags.backwards
    }
    pub fn callbacks(&self) -> &[Message] {
        &self.callbacks
    }
    pub fn stop_points(&self) -> &[f32] {
        &self.stop_points
    }
    pub fn stop_points_mut(&mut self) -> &mut Vec<f32> {
        &mut self.stop_points
    }
    pub fn states(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.states.iter()
    }
    pub fn ease_curve(&self, slot: EaseSlot) -> Option<&EaseCurve> {
        match slot {
            EaseSlot::None => None,
            EaseSlot::In => self.ease_in.as_ref(),
            EaseSlot::Out => self.ease_out.as_ref(),
            EaseSlot::Speed => self.speed_ease.as_ref(),
        }
    }
    #[inline]
    pub fn current_ease_slot(&self) -> EaseSlot {
        self.current_ease
    }
    #[inline]
    pub fn current_ease_curve(&self) -> Option<&EaseCurve> {
        self.ease_curve(self.current_ease)
    }

    fn current_ease_curve_mut(&mut self) -> Option<&mut EaseCurve> {
        match self.current_ease {
            EaseSlot::None => None,
            EaseSlot::In => self.ease_in.as_mut(),
            EaseSlot::Out => self.ease_out.as_mut(),
            EaseSlot::Speed => self.speed_ease.as_mut(),
        }
    }

    pub fn set_owner(&mut self, owner: Option<EntityKey>, locally_owned: bool) {
        self.owner = owner;
        self.locally_owned = locally_owned;
    }

    pub fn set_locally_owned(&mut self, locally_owned: bool) {
        self.locally_owned = locally_owned;
    }

    /// Drain callback messages fired since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    /// Whether the synchronised state changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn set_begin(&mut self, t: f32) {
        self.begin = t;
    }
    pub fn set_end(&mut self, t: f32) {
        self.end = t;
    }
    pub fn set_loop_begin(&mut self, t: f32) {
        self.loop_begin = t;
    }
    pub fn set_loop_end(&mut self, t: f32) {
        self.loop_end = t;
    }
    pub fn set_loop_points(&mut self, begin: f32, end: f32) {
        self.loop_begin = begin;
        self.loop_end = end;
    }

    fn window(&self) -> Window {
        Window {
            begin: self.begin,
            end: self.end,
            loop_begin: self.loop_begin,
            loop_end: self.loop_end,
            wrap_time: self.wrap_time,
        }
    }

    // ---- callbacks ----------------------------------------------------

    pub fn add_callback(&mut self, msg: Message) {
        if msg.event_callback().is_some() {
            self.callbacks.push(msg);
        }
    }

    /// Remove the first registered callback equal to `msg` (ignoring sender and repeats).
    pub fn remove_callback(&mut self, msg: &Message) {
        let Some(needle) = msg.event_callback() else {
            return;
        };
        let found = self.callbacks.iter().position(|m| {
            m.receivers == msg.receivers
                && m.event_callback().is_some_and(|cb| {
                    (needle.token != 0 && cb.token == needle.token)
                        || (cb.event == needle.event
                            && cb.event_time == needle.event_time
                            && cb.user == needle.user
                            && cb.tag == needle.tag)
                })
        });
        if let Some(i) = found {
            self.callbacks.remove(i);
        }
    }

    pub fn clear_callbacks(&mut self) {
        self.callbacks.clear();
    }

    pub fn enable_callbacks(&mut self, on: bool) {
        self.flags.no_callbacks = !on;
    }

    /// Send callback `i`. Returns `true` when it was removed from the list.
    fn send_callback(&mut self, i: usize) -> bool {
        if self.flags.no_callbacks {
            return false;
        }
        let owner = self.owner;
        let locally_owned = self.locally_owned;
        let msg = &mut self.callbacks[i];
        if msg.flags.net_propagate && owner.is_some() && !locally_owned {
            return false;
        }
        msg.sender = owner;
        self.outgoing.push(msg.clone());

        let repeats = msg.event_callback().map(|cb| cb.repeats).unwrap_or(0);
        if repeats == 0 {
            self.callbacks.remove(i);
            return true;
        }
        if repeats > 0 {
            if let Some(cb) = msg.event_callback_mut() {
                cb.repeats -= 1;
            }
        }
        false
    }

    /// Fire every registered callback matching `pred`, in registration order.
    fn fire_where(&mut self, pred: impl Fn(&EventCallback) -> bool) {
        let mut i = 0;
        while i < self.callbacks.len() {
            let hit = self.callbacks[i].event_callback().is_some_and(&pred);
            if hit && self.send_callback(i) {
                continue;
            }
            i += 1;
        }
    }

    fn fire_event(&mut self, event: CallbackEvent) {
        self.fire_where(|cb| cb.event == event);
    }

    fn check_time_callbacks(&mut self, frame_start: f32, frame_stop: f32) {
        let (begin, end) = (self.begin, self.end);
        let (lb, le) = (self.loop_begin, self.loop_end);
        let backwards = self.flags.backwards;
        let in_frame = move |t: f32| time_in_frame(t, frame_start, frame_stop, backwards, lb, le);
        self.fire_where(|cb| match cb.event {
            CallbackEvent::Time => in_frame(cb.event_time),
            CallbackEvent::Begin => in_frame(begin),
            CallbackEvent::End => in_frame(end),
            _ => false,
        });
    }

    // ---- snapshots ----------------------------------------------------

    fn state_at(&self, world: f64) -> Option<&StateSnapshot> {
        self.states.iter().find(|s| world >= s.start_world_time)
    }

    /// Record the current playback state as starting at `world`.
    ///
    /// `anim` is the animation time at `world`; `None` derives it from the
    /// state that was current at `world`. Changes earlier than the newest
    /// snapshot are ignored.
    fn process_state_change(&mut self, world: f64, anim: Option<f32>) {
        if let Some(front) = self.states.front() {
            if world < front.start_world_time {
                trace!(target: "cadence::time", world, "state change before newest snapshot ignored");
                return;
            }
        }
        self.last_state_change = world;
        let start_anim_time = anim.unwrap_or_else(|| self.world_to_anim_time_no_update(world));
        let snap = StateSnapshot {
            start_world_time: world,
            start_anim_time,
            flags: self.flags,
            begin: self.begin,
            end: self.end,
            loop_begin: self.loop_begin,
            loop_end: self.loop_end,
            speed: self.speed,
            wrap_time: self.wrap_time,
            ease: self.current_ease_curve().cloned(),
        };
        self.states.push_front(snap);
        self.flush_old_states();
        self.dirty = true;
    }

    /// Keep snapshots up to the first one older than one frame, within the history cap.
    fn flush_old_states(&mut self) {
        let horizon = self.last_eval_world_time - self.frame_delta;
        let mut keep = 0;
        for s in &self.states {
            keep += 1;
            if horizon >= s.start_world_time {
                break;
            }
        }
        self.states.truncate(keep.min(self.history_cap));
    }

    fn clear_all_states(&mut self) {
        self.states.clear();
    }

    fn clear_speed_ease(&mut self) {
        if self.current_ease == EaseSlot::Speed {
            self.current_ease = EaseSlot::None;
        }
        self.speed_ease = None;
    }

    // ---- evaluation ---------------------------------------------------

    /// Animation time at `world` according to recorded state; no side effects.
    pub fn world_to_anim_time_no_update(&self, world: f64) -> f32 {
        self.state_at(world)
            .map(|s| s.anim_time_at(world))
            .unwrap_or(0.0)
    }

    pub fn is_stopped_at(&self, world: f64) -> bool {
        if world > self.last_state_change {
            return self.flags.stopped && !self.flags.forced_move;
        }
        self.state_at(world).map(|s| s.is_stopped()).unwrap_or(true)
    }

    /// Advance playback to `world` and return the animation time there.
    pub fn world_to_anim_time(&mut self, world: f64) -> f32 {
        let prev_eval = self.last_eval_world_time;
        if world > prev_eval {
            self.frame_delta = world - prev_eval;
        }

        if world < self.last_state_change {
            self.current_anim_time = self.world_to_anim_time_no_update(world);
            self.last_eval_world_time = world;
            return self.current_anim_time;
        }

        if self.last_eval_world_time <= self.last_state_change {
            self.last_eval_world_time = self.last_state_change;
            if let Some(latest) = self.states.front() {
                self.current_anim_time = latest.start_anim_time;
            }
        }

        if self.flags.stopped || world == self.last_eval_world_time {
            if self.flags.forced_move {
                self.fire_event(CallbackEvent::SingleFrameEval);
            }
            self.flags.forced_move = false;
            self.last_eval_world_time = world;
            return self.current_anim_time;
        }

        let last_eval = self.last_eval_world_time;
        let mut del = match self.current_ease_curve().copied() {
            Some(curve) => {
                let mut d = curve.distance_between(last_eval, world);
                let curve_end = curve.end_world_time();
                if world > curve_end {
                    if self.flags.easing_in {
                        d += (world - curve_end) as f32 * self.speed;
                    }
                    self.clear_speed_ease();
                    self.current_ease = EaseSlot::None;
                }
                d
            }
            None => (world - last_eval) as f32 * self.speed,
        };
        if self.flags.backwards {
            del = -del;
        }

        let secs = self.current_anim_time + del;
        let forwards = del >= 0.0;
        let origin = self
            .states
            .front()
            .map(|s| s.start_anim_time)
            .unwrap_or(self.current_anim_time);
        let resolved = resolve_position(
            &self.window(),
            &self.flags,
            origin,
            self.current_anim_time,
            secs,
            forwards,
        );
        if resolved.stop {
            self.stop_at(world, resolved.secs);
        }

        self.check_time_callbacks(self.current_anim_time, resolved.secs);

        self.last_eval_world_time = world;
        let ease_out_done = self
            .ease_out
            .as_ref()
            .is_some_and(|c| world >= c.end_world_time());
        if ease_out_done && !self.flags.easing_in {
            self.stop_at(world, resolved.secs);
        }

        self.current_anim_time = resolved.secs;
        self.current_anim_time
    }

    /// Force the position. `jump` skips time callbacks between the old and new position.
    pub fn set_current_anim_time(&mut self, t: f32, jump: bool, now: f64) {
        self.flags.forced_move = true;
        if !jump {
            self.check_time_callbacks(self.current_anim_time, t);
        }
        self.current_anim_time = t;
        self.fire_event(CallbackEvent::SingleFrameAdjust);
        self.process_state_change(now, Some(self.current_anim_time));
    }

    // ---- transport ----------------------------------------------------

    fn stop_at(&mut self, world: f64, anim: f32) {
        if self.flags.stopped {
            return;
        }
        self.clear_speed_ease();
        self.flags.easing_in = false;
        self.flags.stopped = true;
        if self.flags.needs_reset {
            self.reset_wrap(world);
        }
        self.process_state_change(world, Some(anim));
        self.fire_event(CallbackEvent::Stop);
    }

    /// Park in the stopped state at the current position.
    pub fn init_stop(&mut self, now: f64) {
        self.stop_at(now, self.current_anim_time);
    }

    /// Stop, easing out onto the best stop point when an ease-out curve is set.
    pub fn stop(&mut self, now: f64) {
        if self.flags.stopped || (self.ease_out.is_some() && !self.flags.easing_in) {
            return;
        }
        let stop_anim_time = self.world_to_anim_time_no_update(now);
        self.flags.easing_in = false;

        let Some(mut out) = self.ease_out else {
            self.stop_at(now, self.current_anim_time);
            return;
        };

        let curr_speed = match self.current_ease_curve() {
            Some(c) if now < c.end_world_time() => {
                c.velocity_given_time((now - c.params().begin_world_time) as f32)
            }
            _ => self.speed,
        };
        out.recalc_to_speed(curr_speed.max(self.speed), 0.0);
        let best = self.best_stop_dist(
            out.min_distance(),
            out.max_distance(),
            out.norm_distance(),
            stop_anim_time,
        );
        out.set_length_on_distance(best);
        out.set_begin_world_time(now - out.time_given_velocity(curr_speed) as f64);
        self.ease_out = Some(out);
        self.current_ease = EaseSlot::Out;
        debug!(target: "cadence::time", best, "easing out");
        self.process_state_change(now, None);
    }

    pub fn start(&mut self, now: f64) {
        if self.flags.easing_in && now == self.last_state_change {
            return;
        }
        self.flags.easing_in = true;

        if let Some(mut ein) = self.ease_in {
            let curr_speed = match self.current_ease_curve() {
                Some(c) if now < c.end_world_time() => {
                    c.velocity_given_time((now - c.params().begin_world_time) as f32)
                }
                _ => 0.0,
            };
            if curr_speed <= self.speed {
                ein.recalc_to_speed(0.0, self.speed);
                ein.set_begin_world_time(now - ein.time_given_velocity(curr_speed) as f64);
                self.ease_in = Some(ein);
                self.current_ease = EaseSlot::In;
            } else {
                // Still faster than the target after an interrupted ease-out: slow down instead.
                let p = ein.params();
                let rate = if p.length > 0.0 { p.speed / p.length } else { 0.0 };
                self.set_speed(self.speed, rate, now);
            }
        }

        self.fire_event(CallbackEvent::Start);

        self.flags.stopped = false;
        if self.flags.backwards {
            if self.current_anim_time == self.begin {
                self.process_state_change(now, Some(self.end));
                return;
            }
        } else if self.current_anim_time == self.end {
            self.process_state_change(now, Some(self.begin));
            return;
        }
        self.process_state_change(now, None);
    }

    pub fn backwards(&mut self, now: f64) {
        if self.flags.backwards {
            return;
        }
        self.fire_event(CallbackEvent::Reverse);
        self.flags.backwards = true;
        self.process_state_change(now, Some(self.current_anim_time));
    }

    pub fn forewards(&mut self, now: f64) {
        if !self.flags.backwards {
            return;
        }
        self.fire_event(CallbackEvent::Reverse);
        self.flags.backwards = false;
        self.process_state_change(now, Some(self.current_anim_time));
    }

    pub fn set_loop(&mut self, on: bool, now: f64) {
        self.flags.looped = on;
        self.process_state_change(now, Some(self.current_anim_time));
    }

    /// Change speed. A `rate` of 0 is immediate; otherwise, while playing,
    /// speed ramps toward `goal` at `rate` per second.
    pub fn set_speed(&mut self, goal: f32, rate: f32, now: f64) {
        let mut cur_speed = self.speed;
        self.speed = goal;

        if rate == 0.0 {
            self.clear_speed_ease();
            self.current_ease = EaseSlot::None;
        } else if self.flags.easing_in {
            if let Some(c) = self.current_ease_curve() {
                cur_speed = c.velocity_given_time((now - c.params().begin_world_time) as f32);
            }
            let curve = match self.speed_ease.take() {
                Some(mut c) => {
                    c.recalc_to_speed(cur_speed, goal);
                    c.set_length_on_rate(rate);
                    Some(c)
                }
                None => {
                    let length = ((goal - cur_speed) / rate).abs();
                    EaseCurve::create(EaseKind::ConstAccel, length, length, length, cur_speed, goal)
                }
            };
            self.speed_ease = curve;
            if let Some(c) = self.speed_ease.as_mut() {
                c.set_begin_world_time(now);
            }
            self.current_ease = EaseSlot::Speed;
        }

        self.process_state_change(now, None);
    }

    /// Replace the ease-in or ease-out profile.
    pub fn set_ease(&mut self, ease_in: bool, kind: EaseKind, min: f32, max: f32, norm: f32) {
        if ease_in {
            self.ease_in = EaseCurve::create(kind, min, max, norm, 0.0, self.speed);
            if self.current_ease == EaseSlot::In {
                self.current_ease = EaseSlot::None;
            }
        } else {
            self.ease_out = EaseCurve::create(kind, min, max, norm, self.speed, 0.0);
            if self.current_ease == EaseSlot::Out {
                self.current_ease = EaseSlot::None;
            }
        }
    }

    /// Distance to travel while easing out from `time`.
    ///
    /// Picks the stop point whose distance lies in `[min, max]` and is closest
    /// to `norm`; ties keep the first candidate found. Falls back to `norm`.
    pub fn best_stop_dist(&self, min: f32, max: f32, norm: f32, time: f32) -> f32 {
        if self.stop_points.is_empty() {
            return norm;
        }
        let backwards = self.flags.backwards;
        let (lb, le) = (self.loop_begin, self.loop_end);
        let mut best: Option<(f32, f32)> = None;
        let mut consider = |cur_time: f32| {
            let cur_dist = (cur_time - norm).abs();
            if cur_time >= min
                && cur_time <= max
                && best.map_or(true, |(_, best_dist)| best_dist > cur_dist)
            {
                best = Some((cur_time, cur_dist));
            }
        };

        for &point in &self.stop_points {
            if self.flags.looped {
                let loop_dist = if backwards {
                    if (time >= lb && point < lb) || (time < lb && point > lb) {
                        continue;
                    }
                    -(le - lb)
                } else {
                    if (time <= le && point > le) || (time > le && point < le) {
                        continue; // never reached
                    }
                    le - lb
                };
                if point <= le && point >= lb {
                    let mut stop = point;
                    loop {
                        let mut cur_time = stop - time;
                        if backwards {
                            cur_time = -cur_time;
                        }
                        if cur_time > max {
                            break;
                        }
                        consider(cur_time);
                        if loop_dist == 0.0 {
                            break;
                        }
                        stop += loop_dist;
                    }
                    continue;
                }
            }
            let mut cur_time = point - time;
            if backwards {
                cur_time = -cur_time;
            }
            consider(cur_time);
        }

        match best {
            Some((t, _)) => t,
            None => norm,
        }
    }

    pub fn reset_wrap(&mut self, now: f64) {
        self.begin = self.initial_begin;
        self.end = self.initial_end;
        self.forewards(now);
        self.flags.wrap = false;
        self.flags.needs_reset = false;
    }

    /// Play until `time` is reached, then stop; bounds are restored afterwards.
    pub fn play_to_time(&mut self, time: f32, now: f64) {
        self.flags.needs_reset = true;
        if self.current_anim_time > time {
            if self.flags.looped {
                self.wrap_time = time;
                self.flags.wrap = true;
            } else {
                self.begin = time;
                self.backwards(now);
            }
        } else {
            self.end = time;
        }
        self.start(now);
    }

    pub fn play_to_percentage(&mut self, percent: f32, now: f64) {
        self.play_to_time(self.begin + (self.end - self.begin) * percent, now);
    }

    /// Apply an animation command. `flags` are the broadcast flags of the
    /// carrying message; callback edits from remote peers are ignored.
    pub fn handle_cmd(&mut self, cmd: &AnimCommand, flags: &BroadcastFlags, now: f64) -> bool {
        if self.flags.needs_reset {
            self.reset_wrap(now);
        }

        if !flags.net_created_remotely {
            if cmd.cmd(AnimCmd::AddCallbacks) {
                for cb in &cmd.callbacks {
                    self.add_callback(cb.clone());
                }
            }
            if cmd.cmd(AnimCmd::RemoveCallbacks) {
                for cb in &cmd.callbacks {
                    self.remove_callback(cb);
                }
            }
        }

        if cmd.cmd(AnimCmd::SetBackwards) {
            self.backwards(now);
        }
        if cmd.cmd(AnimCmd::SetForewards) {
            self.forewards(now);
        }
        if cmd.cmd(AnimCmd::Stop) {
            self.stop(now);
        }
        if cmd.cmd(AnimCmd::SetLooping) {
            self.set_loop(true, now);
        }
        if cmd.cmd(AnimCmd::UnSetLooping) {
            self.set_loop(false, now);
        }
        if cmd.cmd(AnimCmd::SetBegin) {
            self.begin = cmd.begin.max(self.initial_begin);
        }
        if cmd.cmd(AnimCmd::SetEnd) {
            self.end = cmd.end.min(self.initial_end);
        }
        if self.begin > self.end {
            self.begin = self.initial_begin;
            self.end = self.initial_end;
        }
        if cmd.cmd(AnimCmd::SetLoopEnd) {
            self.loop_end = cmd.loop_end;
        }
        if cmd.cmd(AnimCmd::SetLoopBegin) {
            self.loop_begin = cmd.loop_begin;
        }
        if cmd.cmd(AnimCmd::SetSpeed) {
            self.set_speed(cmd.speed, cmd.speed_change_rate, now);
        }
        if cmd.cmd(AnimCmd::GoToTime) {
            let t = cmd.time.clamp(self.begin, self.end);
            self.set_current_anim_time(t, true, now);
        }
        if cmd.cmd(AnimCmd::GoToPercent) {
            let t = self.begin + (self.end - self.begin) * cmd.time;
            self.set_current_anim_time(t, false, now);
        }
        if cmd.cmd(AnimCmd::GoToBegin) {
            self.set_current_anim_time(self.begin, true, now);
        }
        if cmd.cmd(AnimCmd::GoToEnd) {
            self.set_current_anim_time(self.end, true, now);
        }
        if cmd.cmd(AnimCmd::GoToLoopBegin) {
            self.set_current_anim_time(self.loop_begin, true, now);
        }
        if cmd.cmd(AnimCmd::GoToLoopEnd) {
            self.set_current_anim_time(self.loop_end, true, now);
        }
        if cmd.cmd(AnimCmd::ToggleState) {
            if self.flags.stopped {
                self.start(now);
            } else {
                self.stop(now);
            }
        }
        if cmd.cmd(AnimCmd::Continue) {
            self.start(now);
        }
        if cmd.cmd(AnimCmd::IncrementForward) {
            if self.current_anim_time == self.end {
                return true;
            }
            let t = (self.current_anim_time + self.frame_delta as f32).min(self.end);
            self.forewards(now);
            self.set_current_anim_time(t, false, now);
        }
        if cmd.cmd(AnimCmd::IncrementBackward) {
            if self.current_anim_time == self.begin {
                return true;
            }
            let t = (self.current_anim_time - self.frame_delta as f32).max(self.begin);
            self.backwards(now);
            self.set_current_anim_time(t, false, now);
        }
        if cmd.cmd(AnimCmd::PlayToTime) {
            self.play_to_time(cmd.time, now);
        }
        if cmd.cmd(AnimCmd::PlayToPercentage) {
            self.play_to_percentage(cmd.time, now);
        }
        if cmd.cmd(AnimCmd::FastForward) {
            let rest = if self.is_forewards() { self.end } else { self.begin };
            self.set_current_anim_time(rest, true, now);
            if self.flags.looped {
                self.start(now);
            }
        }
        true
    }

    // ---- synchronisation ---------------------------------------------

    pub fn capture_state(&self) -> TimeConvertState {
        TimeConvertState {
            flags: self.flags,
            last_state_anim_time: self
                .states
                .front()
                .map(|s| s.start_anim_time)
                .unwrap_or(self.current_anim_time),
            last_state_change_world_time: self.last_state_change,
            loop_begin: self.loop_begin,
            loop_end: self.loop_end,
            speed: self.speed,
            ease_slot: self.current_ease,
            ease_begin_world_time: self
                .current_ease_curve()
                .map(|c| c.params().begin_world_time)
                .unwrap_or(0.0),
        }
    }

    /// Rebuild playback from captured state. With `replay`, the converter is
    /// then evaluated up to `now` with callbacks suppressed so that events
    /// which already happened remotely do not fire again.
    pub fn restore_state(&mut self, state: &TimeConvertState, replay: bool, now: f64) {
        let callbacks_were_off = self.flags.no_callbacks;
        self.enable_callbacks(false);

        self.clear_all_states();
        self.flags = PlaybackFlags {
            no_callbacks: true,
            ..state.flags
        };
        self.loop_begin = state.loop_begin;
        self.loop_end = state.loop_end;
        self.speed = state.speed;
        self.current_ease = state.ease_slot;
        if self.current_ease_curve().is_none() {
            self.current_ease = EaseSlot::None;
        } else if let Some(curve) = self.current_ease_curve_mut() {
            curve.set_begin_world_time(state.ease_begin_world_time);
        }
        self.current_anim_time = state.last_state_anim_time;
        self.last_eval_world_time = state.last_state_change_world_time;
        self.process_state_change(
            state.last_state_change_world_time,
            Some(state.last_state_anim_time),
        );

        if replay && now > state.last_state_change_world_time {
            self.world_to_anim_time(now);
        }
        self.enable_callbacks(!callbacks_were_off);
        debug!(
            target: "cadence::time",
            anim_time = self.current_anim_time,
            replay,
            "state restored"
        );
    }

    // ---- persistence -------------------------------------------------

    pub fn write<W: Write>(&self, w: &mut W) -> AnimationResult<()> {
        w.write_u32::<LittleEndian>(self.flags.to_bits())?;
        for v in [
            self.begin,
            self.end,
            self.loop_end,
            self.loop_begin,
            self.speed,
        ] {
            w.write_f32::<LittleEndian>(v)?;
        }
        EaseCurve::write_opt(w, self.ease_in.as_ref())?;
        EaseCurve::write_opt(w, self.ease_out.as_ref())?;
        EaseCurve::write_opt(w, self.speed_ease.as_ref())?;
        w.write_f32::<LittleEndian>(self.current_anim_time)?;
        w.write_f64::<LittleEndian>(self.last_eval_world_time)?;

        w.write_u32::<LittleEndian>(self.callbacks.len() as u32)?;
        for cb in &self.callbacks {
            write_message(w, cb)?;
        }
        w.write_u32::<LittleEndian>(self.stop_points.len() as u32)?;
        for p in &self.stop_points {
            w.write_f32::<LittleEndian>(*p)?;
        }
        Ok(())
    }

    /// Read a converter written by [`TimeConvert::write`]; the first snapshot
    /// is rebuilt at world time zero from `begin`.
    pub fn read<R: Read>(r: &mut R, cfg: &Config) -> AnimationResult<Self> {
        let mut tc = TimeConvert::new(cfg);
        tc.flags = PlaybackFlags::from_bits(r.read_u32::<LittleEndian>()?);
        tc.begin = r.read_f32::<LittleEndian>()?;
        tc.end = r.read_f32::<LittleEndian>()?;
        tc.initial_begin = tc.begin;
        tc.initial_end = tc.end;
        tc.loop_end = r.read_f32::<LittleEndian>()?;
        tc.loop_begin = r.read_f32::<LittleEndian>()?;
        tc.speed = r.read_f32::<LittleEndian>()?;
        tc.ease_in = EaseCurve::read_opt(r)?;
        tc.ease_out = EaseCurve::read_opt(r)?;
        tc.speed_ease = EaseCurve::read_opt(r)?;
        tc.current_anim_time = r.read_f32::<LittleEndian>()?;
        tc.last_eval_world_time = r.read_f64::<LittleEndian>()?;

        let count = r.read_u32::<LittleEndian>()? as usize;
        if count > MAX_CALLBACKS {
            return Err(WireError::CountOutOfRange {
                what: "callbacks",
                count,
                max: MAX_CALLBACKS,
            }
            .into());
        }
        for _ in 0..count {
            let msg = read_message(r)?;
            if msg.event_callback().is_none() {
                return Err(WireError::invalid("registered callback is not an event callback").into());
            }
            tc.callbacks.push(msg);
        }

        let count = r.read_u32::<LittleEndian>()? as usize;
        if count > MAX_STOP_POINTS {
            return Err(WireError::CountOutOfRange {
                what: "stop points",
                count,
                max: MAX_STOP_POINTS,
            }
            .into());
        }
        for _ in 0..count {
            tc.stop_points.push(r.read_f32::<LittleEndian>()?);
        }

        tc.process_state_change(0.0, Some(tc.begin));
        tc.dirty = false;
        Ok(tc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const OWNER: EntityKey = EntityKey(1);

    fn converter(def: &AnimationDefinition) -> TimeConvert {
        let mut tc = TimeConvert::default();
        tc.init(def, InstanceId(0), OWNER, 0.0);
        tc.take_outgoing();
        tc
    }

    fn user_events(msgs: &[Message]) -> Vec<(CallbackEvent, i32)> {
        msgs.iter()
            .filter_map(|m| m.event_callback())
            .filter(|cb| cb.tag == CallbackTag::User)
            .map(|cb| (cb.event, cb.user))
            .collect()
    }

    #[test]
    fn time_in_frame_handles_wrap() {
        assert!(time_in_frame(1.0, 0.5, 1.5, false, 0.0, 2.0));
        assert!(time_in_frame(1.0, 1.5, 0.5, true, 0.0, 2.0));
        // forward wrap from 1.8 around to 0.3 covers 1.9 and 0.1 but not 1.0
        assert!(time_in_frame(1.9, 1.8, 0.3, false, 0.0, 2.0));
        assert!(time_in_frame(0.1, 1.8, 0.3, false, 0.0, 2.0));
        assert!(!time_in_frame(1.0, 1.8, 0.3, false, 0.0, 2.0));
    }

    #[test]
    fn time_in_frame_excludes_frame_start() {
        assert!(time_in_frame(3.0, 2.0, 3.0, false, 0.0, 10.0));
        assert!(!time_in_frame(3.0, 3.0, 4.0, false, 0.0, 10.0));
        assert!(time_in_frame(3.0, 4.0, 3.0, true, 0.0, 10.0));
        assert!(!time_in_frame(3.0, 3.0, 2.0, true, 0.0, 10.0));
        // wrapped forward frame starting on the marker
        assert!(!time_in_frame(1.8, 1.8, 0.3, false, 0.0, 2.0));
        // forced move onto the marker
        assert!(time_in_frame(3.0, 3.0, 3.0, false, 0.0, 10.0));
    }

    #[test]
    fn autostart_plays_at_unit_speed() {
        let mut def = AnimationDefinition::new("walk", 0.0, 10.0);
        def.auto_start = true;
        let mut tc = converter(&def);
        assert!(!tc.is_stopped());
        assert_relative_eq!(tc.world_to_anim_time(2.5), 2.5);
    }

    #[test]
    fn marker_callback_fires_once_per_crossing() {
        let mut def = AnimationDefinition::new("walk", 0.0, 10.0);
        def.auto_start = true;
        let mut tc = converter(&def);
        let mark = EventCallback::new(CallbackEvent::Time, 5).at_time(3.0);
        tc.add_callback(Message::callback(EntityKey(9), mark.with_repeats(-1)));

        tc.world_to_anim_time(2.0);
        assert!(user_events(&tc.take_outgoing()).is_empty());
        tc.world_to_anim_time(4.0);
        assert_eq!(user_events(&tc.take_outgoing()), vec![(CallbackEvent::Time, 5)]);
        tc.world_to_anim_time(5.0);
        assert!(user_events(&tc.take_outgoing()).is_empty());
    }

    #[test]
    fn zero_repeat_callback_is_removed_after_firing() {
        let mut def = AnimationDefinition::new("walk", 0.0, 2.0);
        def.auto_start = true;
        let mut tc = converter(&def);
        let before = tc.callbacks().len();
        tc.add_callback(Message::callback(
            EntityKey(9),
            EventCallback::new(CallbackEvent::Stop, 1),
        ));
        tc.world_to_anim_time(5.0);
        assert!(tc.is_stopped());
        assert_eq!(user_events(&tc.take_outgoing()), vec![(CallbackEvent::Stop, 1)]);
        assert_eq!(tc.callbacks().len(), before);
    }

    #[test]
    fn remote_owner_withholds_propagated_callbacks() {
        let mut def = AnimationDefinition::new("walk", 0.0, 2.0);
        def.auto_start = true;
        let mut tc = converter(&def);
        tc.set_locally_owned(false);
        tc.add_callback(
            Message::callback(EntityKey(9), EventCallback::new(CallbackEvent::Stop, 1))
                .with_flags(BroadcastFlags::propagated()),
        );
        tc.world_to_anim_time(5.0);
        assert!(user_events(&tc.take_outgoing()).is_empty());
    }

    #[test]
    fn disabled_callbacks_are_silent() {
        let mut def = AnimationDefinition::new("walk", 0.0, 2.0);
        def.auto_start = true;
        let mut tc = converter(&def);
        tc.enable_callbacks(false);
        tc.add_callback(Message::callback(
            EntityKey(9),
            EventCallback::new(CallbackEvent::Stop, 1),
        ));
        tc.world_to_anim_time(5.0);
        assert!(tc.take_outgoing().is_empty());
    }

    #[test]
    fn best_stop_dist_prefers_norm_and_first_on_tie() {
        let mut tc = TimeConvert::default();
        tc.stop_points_mut().extend([1.0, 3.0]);
        // both stop points are 1.0 away from norm; the first one wins
        assert_eq!(tc.best_stop_dist(0.0, 10.0, 2.0, 0.0), 1.0);
        // neither fits the window
        assert_eq!(tc.best_stop_dist(1.5, 2.5, 2.0, 0.0), 2.0);
        tc.stop_points_mut().clear();
        assert_eq!(tc.best_stop_dist(0.0, 10.0, 1.25, 0.0), 1.25);
    }

    #[test]
    fn best_stop_dist_walks_loop_repeats() {
        let mut tc = TimeConvert::default();
        tc.set_loop_points(0.0, 4.0);
        tc.flags.looped = true;
        tc.stop_points_mut().push(1.0);
        // from 3.0 the stop point is reached at distance 2.0 (next lap)
        assert_eq!(tc.best_stop_dist(0.5, 3.0, 2.0, 3.0), 2.0);
    }

    #[test]
    fn play_to_time_stops_and_restores_bounds() {
        let def = AnimationDefinition::new("lever", 0.0, 10.0);
        let mut tc = converter(&def);
        tc.play_to_time(4.0, 1.0);
        assert_eq!(tc.end(), 4.0);
        let t = tc.world_to_anim_time(9.0);
        assert_eq!(t, 4.0);
        assert!(tc.is_stopped());
        assert_eq!(tc.end(), 10.0);
    }

    #[test]
    fn handle_cmd_clamps_set_bounds_to_initial() {
        let def = AnimationDefinition::new("lever", 1.0, 5.0);
        let mut tc = converter(&def);
        let mut cmd = AnimCommand::new("")
            .with(AnimCmd::SetBegin)
            .with(AnimCmd::SetEnd);
        cmd.begin = 0.0;
        cmd.end = 9.0;
        tc.handle_cmd(&cmd, &BroadcastFlags::default(), 0.5);
        assert_eq!((tc.begin(), tc.end()), (1.0, 5.0));

        cmd.begin = 4.0;
        cmd.end = 2.0;
        tc.handle_cmd(&cmd, &BroadcastFlags::default(), 0.5);
        assert_eq!((tc.begin(), tc.end()), (1.0, 5.0));
    }

    #[test]
    fn remote_commands_cannot_add_callbacks() {
        let def = AnimationDefinition::new("lever", 0.0, 5.0);
        let mut tc = converter(&def);
        let before = tc.callbacks().len();
        let mut cmd = AnimCommand::new("").with(AnimCmd::AddCallbacks);
        cmd.callbacks.push(Message::callback(
            EntityKey(3),
            EventCallback::new(CallbackEvent::Stop, 0),
        ));
        let remote = BroadcastFlags {
            net_created_remotely: true,
            ..Default::default()
        };
        tc.handle_cmd(&cmd, &remote, 0.0);
        assert_eq!(tc.callbacks().len(), before);
        tc.handle_cmd(&cmd, &BroadcastFlags::default(), 0.0);
        assert_eq!(tc.callbacks().len(), before + 1);
    }

    #[test]
    fn forced_move_reports_single_frame_eval_once() {
        let def = AnimationDefinition::new("lever", 0.0, 5.0);
        let mut tc = converter(&def);
        tc.add_callback(Message::callback(
            EntityKey(3),
            EventCallback::new(CallbackEvent::SingleFrameEval, 7).with_repeats(-1),
        ));
        tc.set_current_anim_time(2.0, true, 1.0);
        assert!(!tc.is_stopped_at(1.5));
        tc.world_to_anim_time(1.5);
        assert_eq!(
            user_events(&tc.take_outgoing()),
            vec![(CallbackEvent::SingleFrameEval, 7)]
        );
        tc.world_to_anim_time(2.0);
        assert!(user_events(&tc.take_outgoing()).is_empty());
        assert!(tc.is_stopped_at(2.5));
    }

    #[test]
    fn state_changes_mark_dirty() {
        let def = AnimationDefinition::new("lever", 0.0, 5.0);
        let mut tc = converter(&def);
        assert!(tc.take_dirty());
        assert!(!tc.take_dirty());
        tc.start(1.0);
        assert!(tc.take_dirty());
    }

    #[test]
    fn history_is_bounded() {
        let cfg = Config {
            max_state_history: 3,
            ..Config::default()
        };
        let mut tc = TimeConvert::new(&cfg);
        tc.set_begin(0.0);
        tc.set_end(100.0);
        for i in 0..10 {
            tc.set_loop(i % 2 == 0, i as f64);
        }
        assert!(tc.states().count() <= 3);
    }
}
