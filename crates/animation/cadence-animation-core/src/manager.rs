//! Per-target owner of animation instances and their compose graph.
//!
//! The manager receives animation and group commands, routes the standing
//! start/stop/single-frame callbacks of its own instances back into itself,
//! and evaluates channel values once per frame. Messages for anybody else are
//! buffered and drained with [`BlendManager::take_outgoing`].
//!
//! Grouped targets: the group master owns a [`MessageAggregator`]. Commands
//! reaching the master are fanned out through it to every member (the master
//! included) and their completion callbacks are merged into one reply.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, warn};

use cadence_message::{
    AnimCmd, AnimCommand, BroadcastFlags, CallbackEvent, CallbackTag, EntityKey, EventCallback,
    GroupCmd, GroupCommand, InstanceId, Message, MessageAggregator, MessageBody,
};

use crate::channel::ChannelGraph;
use crate::config::Config;
use crate::definition::{AnimationDefinition, AnimationLibrary, ENTIRE_ANIMATION};
use crate::error::{AnimationError, AnimationResult};
use crate::instance::{AnimationInstance, FadeKind, FadeOutcome};
use crate::time_convert::TimeConvertState;
use crate::value::Value;

#[cfg(feature = "alloc-tracking")]
use crate::diagnostics::AllocLedger;

/// Priority used by one-shot animations so they override everything else.
pub const MAX_BLEND_PRIORITY: i32 = 0x0fff_ffff;

#[derive(Clone, Debug, Default)]
pub enum GroupRole {
    #[default]
    Solo,
    Member {
        master: EntityKey,
    },
    Master(MessageAggregator),
}

#[derive(Clone, Debug)]
pub struct BlendManager {
    key: EntityKey,
    cfg: Config,
    instances: Vec<AnimationInstance>,
    private_anims: Vec<Arc<AnimationDefinition>>,
    graph: ChannelGraph,
    next_instance: u32,
    needs_eval: bool,
    force_eval: bool,
    group: GroupRole,
    locally_owned: bool,
    dirty: bool,
    outbox: Vec<Message>,
    last_frame: Option<u64>,
    last_eval_world: Option<f64>,
    #[cfg(feature = "alloc-tracking")]
    ledger: AllocLedger,
}

#[inline]
fn lookup_name(name: &str) -> &str {
    if name.is_empty() {
        ENTIRE_ANIMATION
    } else {
        name
    }
}

impl BlendManager {
    pub fn new(key: EntityKey, cfg: Config) -> Self {
        let graph = ChannelGraph::new(cfg.channel_cap());
        Self {
            key,
            cfg,
            instances: Vec::new(),
            private_anims: Vec::new(),
            graph,
            next_instance: 0,
            needs_eval: false,
            force_eval: false,
            group: GroupRole::Solo,
            locally_owned: true,
            dirty: false,
            outbox: Vec::new(),
            last_frame: None,
            last_eval_world: None,
            #[cfg(feature = "alloc-tracking")]
            ledger: AllocLedger::default(),
        }
    }

    #[inline]
    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn instances(&self) -> &[AnimationInstance] {
        &self.instances
    }

    pub fn instance(&self, id: InstanceId) -> Option<&AnimationInstance> {
        self.instances.iter().find(|i| i.id() == id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut AnimationInstance> {
        self.instances.iter_mut().find(|i| i.id() == id)
    }

    pub fn graph(&self) -> &ChannelGraph {
        &self.graph
    }

    pub fn value(&self, channel: &str) -> Option<&Value> {
        self.graph.value(channel)
    }

    /// Whether any instance is playing and the host should keep calling `eval`.
    #[inline]
    pub fn needs_eval(&self) -> bool {
        self.needs_eval
    }

    pub fn group_role(&self) -> &GroupRole {
        &self.group
    }

    pub fn is_group_member(&self) -> bool {
        matches!(self.group, GroupRole::Member { .. })
    }

    pub fn is_group_master(&self) -> bool {
        matches!(self.group, GroupRole::Master(_))
    }

    pub fn aggregator(&self) -> Option<&MessageAggregator> {
        match &self.group {
            GroupRole::Master(agg) => Some(agg),
            _ => None,
        }
    }

    /// Lead a group: commands reaching this manager are forwarded through an
    /// aggregator keyed `aggregator_key` to `members` and to this manager.
    pub fn make_group_master(&mut self, aggregator_key: EntityKey, members: &[EntityKey]) {
        let mut agg = MessageAggregator::new(aggregator_key);
        agg.set_locally_owned(self.locally_owned);
        agg.add_destination(self.key);
        for m in members {
            agg.add_destination(*m);
        }
        self.group = GroupRole::Master(agg);
    }

    pub fn join_group(&mut self, master: EntityKey) {
        self.group = GroupRole::Member { master };
    }

    pub fn leave_group(&mut self) {
        self.group = GroupRole::Solo;
    }

    pub fn set_locally_owned(&mut self, owned: bool) {
        self.locally_owned = owned;
        for inst in &mut self.instances {
            inst.time_mut().set_locally_owned(owned);
        }
        if let GroupRole::Master(agg) = &mut self.group {
            agg.set_locally_owned(owned);
        }
    }

    // ---- attach / detach ----------------------------------------------

    /// Register an animation owned by this target; attached by [`Self::add_target`].
    pub fn add_private_animation(&mut self, def: Arc<AnimationDefinition>) {
        self.private_anims.push(def);
    }

    pub fn private_animations(&self) -> &[Arc<AnimationDefinition>] {
        &self.private_anims
    }

    fn is_private(&self, def: &Arc<AnimationDefinition>) -> bool {
        self.private_anims.iter().any(|p| Arc::ptr_eq(p, def))
    }

    /// Attach every private animation. The master one (auto-start first,
    /// then one with an initial position, else the earliest start) gets
    /// blend 1, the others 0.
    pub fn add_target(&mut self, now: f64) -> AnimationResult<()> {
        let mut auto_idx = None;
        let mut init_idx = None;
        let mut start_idx = None;
        let mut earliest = f32::INFINITY;
        for (i, def) in self.private_anims.iter().enumerate() {
            if def.auto_start && auto_idx.is_none() {
                auto_idx = Some(i);
            }
            if def.initial.is_some() && init_idx.is_none() {
                init_idx = Some(i);
            }
            if def.start < earliest {
                earliest = def.start;
                start_idx = Some(i);
            }
        }
        let master = auto_idx.or(init_idx).or(start_idx);

        let priority = self.cfg.default_blend_priority;
        for (i, def) in self.private_anims.clone().into_iter().enumerate() {
            let blend = if Some(i) == master { 1.0 } else { 0.0 };
            self.attach_animation_blended(def, blend, priority, now)?;
        }
        Ok(())
    }

    /// Create an instance of `def` and merge its channels at `priority`.
    pub fn attach_animation_blended(
        &mut self,
        def: Arc<AnimationDefinition>,
        blend: f32,
        priority: i32,
        now: f64,
    ) -> AnimationResult<InstanceId> {
        let id = InstanceId(self.next_instance);
        let installed = self.graph.install(id, &def, priority)?;
        self.next_instance = self.next_instance.wrapping_add(1);
        self.record_install(id, &def.name, &installed);

        let mut inst = AnimationInstance::new(id, def, self.key, &self.cfg, now);
        inst.time_mut().set_locally_owned(self.locally_owned);
        inst.set_priority(priority);
        inst.set_blend(blend);
        debug!(
            target: "cadence::blend",
            key = %self.key,
            anim = inst.name(),
            instance = id.0,
            blend,
            priority,
            "animation attached"
        );
        self.instances.push(inst);
        self.graph.set_needs_compile();
        self.drain_instance_messages(now);
        Ok(id)
    }

    pub fn attach_by_name(
        &mut self,
        lib: &AnimationLibrary,
        name: &str,
        blend: f32,
        priority: i32,
        now: f64,
    ) -> AnimationResult<InstanceId> {
        let def = lib.get(name)?;
        self.attach_animation_blended(def, blend, priority, now)
    }

    pub fn detach_animation(&mut self, id: InstanceId) -> AnimationResult<()> {
        let Some(pos) = self.instances.iter().position(|i| i.id() == id) else {
            return Err(AnimationError::InstanceNotFound {
                name: format!("#{}", id.0),
            });
        };
        let inst = self.instances.remove(pos);
        self.graph.uninstall(id);
        self.record_release(id);
        debug!(
            target: "cadence::blend",
            key = %self.key,
            anim = inst.name(),
            instance = id.0,
            private = self.is_private(inst.definition_arc()),
            "animation detached"
        );
        if !self.has_running_anims() {
            self.needs_eval = false;
        }
        Ok(())
    }

    /// Ramp the blend or amplitude of instance `id` toward `goal`.
    ///
    /// A zero `rate` applies the goal at once. With `detach`, the instance is
    /// removed once its blend reaches zero, immediately when that happens here.
    pub fn fade(
        &mut self,
        id: InstanceId,
        goal: f32,
        rate: f32,
        kind: FadeKind,
        detach: bool,
    ) -> AnimationResult<()> {
        let inst = self
            .instance_mut(id)
            .ok_or_else(|| AnimationError::InstanceNotFound {
                name: format!("#{}", id.0),
            })?;
        let outcome = inst.fade(goal, rate, kind, detach);
        if outcome.recompile {
            self.graph.set_needs_compile();
        }
        if outcome.detach {
            self.detach_animation(id)?;
        }
        Ok(())
    }

    pub fn detach_by_name(&mut self, name: &str) -> AnimationResult<()> {
        let id = self
            .find_instance(name)
            .map(|i| i.id())
            .ok_or_else(|| AnimationError::InstanceNotFound {
                name: name.to_string(),
            })?;
        self.detach_animation(id)
    }

    pub fn detach_all(&mut self) {
        let ids: Vec<InstanceId> = self.instances.iter().map(|i| i.id()).collect();
        for id in ids {
            self.graph.uninstall(id);
            self.record_release(id);
        }
        self.instances.clear();
        self.needs_eval = false;
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = lookup_name(name);
        self.instances
            .iter()
            .position(|i| i.name().eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup; an empty name means the whole animation.
    pub fn find_instance(&self, name: &str) -> Option<&AnimationInstance> {
        self.position(name).map(|i| &self.instances[i])
    }

    pub fn find_instance_mut(&mut self, name: &str) -> Option<&mut AnimationInstance> {
        self.position(name).map(|i| &mut self.instances[i])
    }

    pub fn find_or_attach_instance(
        &mut self,
        lib: &AnimationLibrary,
        name: &str,
        blend: f32,
        now: f64,
    ) -> AnimationResult<InstanceId> {
        if let Some(inst) = self.find_instance(name) {
            return Ok(inst.id());
        }
        let priority = self.cfg.default_blend_priority;
        self.attach_by_name(lib, lookup_name(name), blend, priority, now)
    }

    /// Play `name` once over everything else and detach it when it stops.
    pub fn play_simple_anim(
        &mut self,
        lib: &AnimationLibrary,
        name: &str,
        now: f64,
    ) -> AnimationResult<()> {
        if self.find_instance(name).is_some() {
            return Ok(());
        }
        let id = self.attach_by_name(lib, name, 1.0, MAX_BLEND_PRIORITY, now)?;
        let key = self.key;
        if let Some(inst) = self.instance_mut(id) {
            inst.set_loop(false, now);
            inst.time_mut().start(now);
            let cb = EventCallback {
                tag: CallbackTag::DetachOnStop(name.to_string()),
                ..EventCallback::new(CallbackEvent::Stop, 0)
            };
            inst.time_mut().add_callback(Message::callback(key, cb));
        }
        self.drain_instance_messages(now);
        Ok(())
    }

    pub fn has_running_anims(&self) -> bool {
        self.instances.iter().any(|i| !i.time().is_stopped())
    }

    pub fn world_to_anim_time_no_update(&self, name: &str, world: f64) -> Option<f32> {
        self.find_instance(name)
            .map(|i| i.world_to_anim_time_no_update(world))
    }

    /// Apply synchronised playback state to the instance playing `name`.
    /// Returns `false` when no such instance is attached.
    pub fn apply_instance_state(
        &mut self,
        name: &str,
        state: &TimeConvertState,
        blend: f32,
        amplitude: Option<f32>,
        replay: bool,
        now: f64,
    ) -> bool {
        let Some(pos) = self.position(name) else {
            return false;
        };
        let inst = &mut self.instances[pos];
        inst.time_mut().restore_state(state, replay, now);
        if inst.set_blend(blend) {
            self.graph.set_needs_compile();
        }
        match amplitude {
            Some(amp) => inst.set_amplitude(amp),
            None => inst.clear_amplitude(),
        }
        self.drain_instance_messages(now);
        self.needs_eval = self.has_running_anims();
        self.force_eval = true;
        true
    }

    // ---- messages -----------------------------------------------------

    /// Handle a message addressed to this manager or to its aggregator.
    /// Returns `false` when nothing here could act on it.
    pub fn receive(&mut self, msg: &Message, now: f64) -> bool {
        match &msg.body {
            MessageBody::AnimCmd(_) | MessageBody::GroupCmd(_) => {
                if let GroupRole::Master(agg) = &mut self.group {
                    if msg.sender != Some(agg.key()) {
                        let mut copy = msg.clone();
                        copy.sender = Some(agg.key());
                        let mut fanned = Vec::new();
                        agg.forward_with_callbacks(&copy, &mut fanned);
                        for m in fanned {
                            self.deliver_forwarded(m, now);
                        }
                        return true;
                    }
                }
                self.apply_command(msg, now)
            }
            MessageBody::EventCallback(cb) => {
                if let GroupRole::Master(agg) = &mut self.group {
                    if msg.is_addressed_to(agg.key()) {
                        let mut merged = Vec::new();
                        let matched = agg.receive(msg, &mut merged);
                        for m in merged {
                            self.route(m, now);
                        }
                        return matched;
                    }
                }
                self.handle_callback(cb, now)
            }
            _ => false,
        }
    }

    /// Apply our copy of a fanned-out command and pass the rest on.
    fn deliver_forwarded(&mut self, mut msg: Message, now: f64) {
        if msg.is_addressed_to(self.key) {
            self.apply_command(&msg, now);
            let me = self.key;
            msg.receivers.retain(|k| *k != me);
        }
        if !msg.receivers.is_empty() {
            self.outbox.push(msg);
        }
    }

    fn apply_command(&mut self, msg: &Message, now: f64) -> bool {
        let applied = match &msg.body {
            MessageBody::AnimCmd(cmd) => self.apply_anim_cmd(cmd, &msg.flags, now),
            MessageBody::GroupCmd(cmd) => self.apply_group_cmd(cmd, now),
            _ => false,
        };
        self.drain_instance_messages(now);
        if applied {
            self.mark_dirty();
        }
        applied
    }

    fn apply_anim_cmd(&mut self, cmd: &AnimCommand, flags: &BroadcastFlags, now: f64) -> bool {
        let Some(idx) = self.position(&cmd.anim_name) else {
            debug!(
                target: "cadence::blend",
                key = %self.key,
                anim = %cmd.anim_name,
                "command for an animation that is not attached"
            );
            return false;
        };

        let mut cmd = Cow::Borrowed(cmd);
        if !cmd.loop_name.is_empty() {
            match self.instances[idx].definition().loop_segment(&cmd.loop_name) {
                Some(seg) => {
                    let (begin, end) = (seg.begin, seg.end);
                    let c = cmd.to_mut();
                    c.loop_begin = begin;
                    c.loop_end = end;
                    c.set_cmd(AnimCmd::SetLoopBegin, true);
                    c.set_cmd(AnimCmd::SetLoopEnd, true);
                }
                None => warn!(
                    target: "cadence::blend",
                    anim = %cmd.anim_name,
                    segment = %cmd.loop_name,
                    "unknown loop segment"
                ),
            }
        }

        self.instances[idx].time_mut().handle_cmd(&cmd, flags, now);

        if cmd.changes_anim_time() {
            let def = Arc::clone(self.instances[idx].definition_arc());
            let mut recompile = false;
            for (i, other) in self.instances.iter_mut().enumerate() {
                if i != idx && other.definition().shares_channels_with(&def) {
                    recompile |= other.set_blend(0.0);
                }
            }
            recompile |= self.instances[idx].set_blend(1.0);
            if recompile {
                self.graph.set_needs_compile();
            }
        }
        true
    }

    fn apply_group_cmd(&mut self, cmd: &GroupCommand, now: f64) -> bool {
        let mut applied = false;
        if cmd.cmd(GroupCmd::SetAnimTime) {
            for inst in &mut self.instances {
                inst.time_mut().set_current_anim_time(cmd.anim_time, true, now);
            }
            applied = true;
        }
        if cmd.cmd(GroupCmd::SetBlend) || cmd.cmd(GroupCmd::SetAmp) {
            let Some(idx) = self.position(&cmd.anim_name) else {
                debug!(
                    target: "cadence::blend",
                    anim = %cmd.anim_name,
                    "group command for an animation that is not attached"
                );
                return applied;
            };
            let mut outcome = FadeOutcome::default();
            if cmd.cmd(GroupCmd::SetBlend) {
                outcome = self.instances[idx].fade(cmd.blend, cmd.blend_rate, FadeKind::Blend, false);
            }
            if cmd.cmd(GroupCmd::SetAmp) {
                self.instances[idx].fade(cmd.amp, cmd.amp_rate, FadeKind::Amplitude, false);
            }
            if outcome.recompile {
                self.graph.set_needs_compile();
            }
            applied = true;
        }
        applied
    }

    fn handle_callback(&mut self, cb: &EventCallback, _now: f64) -> bool {
        match &cb.tag {
            CallbackTag::InstanceEval(_) => {
                match cb.event {
                    CallbackEvent::Start => self.needs_eval = true,
                    CallbackEvent::Stop => {
                        if !self.has_running_anims() {
                            self.needs_eval = false;
                        }
                    }
                    _ => self.force_eval = true,
                }
                true
            }
            CallbackTag::DetachOnStop(name) => {
                if let Err(err) = self.detach_by_name(name) {
                    warn!(
                        target: "cadence::blend",
                        key = %self.key,
                        error = %err,
                        "detach on stop failed"
                    );
                    return false;
                }
                true
            }
            CallbackTag::User => false,
        }
    }

    /// Deliver `msg` here when it is one of our own bookkeeping callbacks or a
    /// reply for our aggregator; otherwise queue it for the transport.
    fn route(&mut self, msg: Message, now: f64) {
        let internal = msg
            .event_callback()
            .is_some_and(|cb| cb.tag != CallbackTag::User);
        if internal && msg.is_addressed_to(self.key) {
            if let Some(cb) = msg.event_callback() {
                self.handle_callback(cb, now);
            }
            return;
        }
        let for_aggregator = match &self.group {
            GroupRole::Master(agg) => msg.is_addressed_to(agg.key()),
            _ => false,
        };
        if for_aggregator {
            self.receive(&msg, now);
            return;
        }
        self.outbox.push(msg);
    }

    fn drain_instance_messages(&mut self, now: f64) {
        let mut pending = Vec::new();
        for inst in &mut self.instances {
            pending.extend(inst.time_mut().take_outgoing());
        }
        for msg in pending {
            self.route(msg, now);
        }
    }

    fn mark_dirty(&mut self) {
        if !self.is_group_member() {
            self.dirty = true;
        }
    }

    /// Drain messages produced for other entities.
    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether this manager's synchronised state changed. Group members
    /// never report; their master speaks for the group.
    pub fn take_dirty(&mut self) -> bool {
        let mut dirty = std::mem::replace(&mut self.dirty, false);
        for inst in &mut self.instances {
            dirty |= inst.time_mut().take_dirty();
        }
        dirty && !self.is_group_member()
    }

    // ---- evaluation ---------------------------------------------------

    /// Advance every instance to `world`, recompiling the graph first if needed.
    pub fn advance_anims_to_time(&mut self, world: f64) {
        if self.graph.needs_compile() {
            self.graph.compile(&self.instances);
        }
        for inst in &mut self.instances {
            inst.time_mut().world_to_anim_time(world);
        }
        self.drain_instance_messages(world);
    }

    fn apply_fades(&mut self, elapsed: f32) {
        let mut detach = Vec::new();
        for inst in &mut self.instances {
            if !inst.is_fading() {
                continue;
            }
            let out = inst.process_fade(elapsed);
            if out.recompile {
                self.graph.set_needs_compile();
            }
            if out.detach {
                detach.push(inst.id());
            }
        }
        for id in detach {
            if let Err(err) = self.detach_animation(id) {
                warn!(target: "cadence::blend", error = %err, "fade detach failed");
            }
        }
    }

    /// Per-frame entry point. Returns a mask of channels whose value changed;
    /// channels set in `ignore_mask` are skipped. A second call for the same
    /// `frame` does nothing.
    pub fn eval(&mut self, world: f64, frame: u64, ignore_mask: u64) -> u64 {
        if self.last_frame == Some(frame) {
            return 0;
        }
        self.last_frame = Some(frame);
        let elapsed = self
            .last_eval_world
            .map(|t| (world - t).max(0.0) as f32)
            .unwrap_or(0.0);
        self.last_eval_world = Some(world);

        let fading = self.instances.iter().any(|i| i.is_fading());
        if !(self.needs_eval || self.force_eval || fading || self.graph.needs_compile()) {
            return 0;
        }
        self.force_eval = false;

        self.advance_anims_to_time(world);
        self.apply_fades(elapsed);
        self.graph.evaluate(&self.instances, ignore_mask)
    }

    // ---- diagnostics --------------------------------------------------

    #[cfg(feature = "alloc-tracking")]
    pub fn ledger(&self) -> &AllocLedger {
        &self.ledger
    }

    #[cfg(feature = "alloc-tracking")]
    fn record_install(&mut self, id: InstanceId, anim: &str, channels: &[usize]) {
        for &ch in channels {
            let name = self.graph.channels()[ch].name().to_string();
            self.ledger.record(id, ch, anim, &name);
        }
    }

    #[cfg(not(feature = "alloc-tracking"))]
    fn record_install(&mut self, _id: InstanceId, _anim: &str, _channels: &[usize]) {}

    #[cfg(feature = "alloc-tracking")]
    fn record_release(&mut self, id: InstanceId) {
        self.ledger.release_instance(id);
    }

    #[cfg(not(feature = "alloc-tracking"))]
    fn record_release(&mut self, _id: InstanceId) {}
}
