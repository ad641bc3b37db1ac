//! The responder state machine.
//!
//! A responder is idle until a notification triggers it. It then walks the
//! current state's command list, sending each command unless the command waits
//! on a callback that has not arrived yet. Once every command is sent and every
//! callback of the state has completed, it switches to the state's follow-up
//! state and goes idle again.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use cadence_message::{
    AnimCmd, AnimCommand, BroadcastFlags, Dispatcher, EntityKey, Message, MessageBody, NotifyEvent,
    NotifyKind, NotifyMsg, SoundCmd, SoundCommand,
};

use crate::config::ResponderConfig;
use crate::error::{ResponderError, ResponderResult};
use crate::fast_forward::fast_forward_msg;
use crate::state::{CompletedEvents, ResponderDefinition, ResponderFlags, ResponderState};

/// Network-synchronised part of a responder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponderSyncState {
    pub cur_state: u8,
    pub cur_command: Option<u8>,
    /// The trigger that started the current run came from another machine.
    pub net_request: bool,
    pub completed: CompletedEvents,
    pub player: Option<EntityKey>,
    pub triggerer: Option<EntityKey>,
}

#[derive(Clone, Debug)]
pub struct Responder {
    key: EntityKey,
    name: String,
    cfg: ResponderConfig,
    states: Vec<ResponderState>,
    cur_state: usize,
    cur_command: Option<usize>,
    enabled: bool,
    flags: ResponderFlags,
    enter: bool,
    notify_flags: BroadcastFlags,
    triggerer: Option<EntityKey>,
    player: Option<EntityKey>,
    completed: CompletedEvents,
    got_first_load: bool,
    dirty: bool,
}

/// Commands that must never run on behalf of a remote trigger.
fn is_local_only(msg: &Message) -> bool {
    match &msg.body {
        MessageBody::LinkToAge { .. } | MessageBody::Camera { .. } => true,
        MessageBody::Sound(cmd) => cmd.cmd(SoundCmd::IsLocalOnly),
        _ => false,
    }
}

impl Responder {
    pub fn from_definition(
        key: EntityKey,
        def: ResponderDefinition,
        cfg: ResponderConfig,
    ) -> ResponderResult<Self> {
        def.validate()?;
        Ok(Self {
            key,
            name: def.name,
            cfg,
            states: def.states,
            cur_state: def.initial_state as usize,
            cur_command: None,
            enabled: def.enabled,
            flags: def.flags,
            enter: false,
            notify_flags: BroadcastFlags::default(),
            triggerer: None,
            player: None,
            completed: CompletedEvents::default(),
            got_first_load: false,
            dirty: false,
        })
    }

    pub fn from_json(key: EntityKey, json: &str, cfg: ResponderConfig) -> ResponderResult<Self> {
        Self::from_definition(key, ResponderDefinition::from_json(json)?, cfg)
    }

    #[inline]
    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[ResponderState] {
        &self.states
    }

    #[inline]
    pub fn state(&self) -> usize {
        self.cur_state
    }

    /// Index of the next command to send, `None` while idle.
    #[inline]
    pub fn cur_command(&self) -> Option<usize> {
        self.cur_command
    }

    pub fn is_running(&self) -> bool {
        self.cur_command.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.dirty = true;
    }

    pub fn flags(&self) -> ResponderFlags {
        self.flags
    }

    pub fn completed(&self) -> CompletedEvents {
        self.completed
    }

    pub fn triggerer(&self) -> Option<EntityKey> {
        self.triggerer
    }

    pub fn player(&self) -> Option<EntityKey> {
        self.player
    }

    /// Returns whether state changed since the last call, and clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Switch to `state` if it exists; otherwise log and keep the current one.
    pub fn set_state(&mut self, state: i64) -> ResponderResult<()> {
        match usize::try_from(state).ok().filter(|&s| s < self.states.len()) {
            Some(s) => {
                self.cur_state = s;
                Ok(())
            }
            None => {
                warn!(
                    target: "cadence::responder",
                    responder = %self.name,
                    state,
                    "invalid state, keeping current"
                );
                Err(ResponderError::StateOutOfRange {
                    state,
                    count: self.states.len(),
                })
            }
        }
    }

    fn set_state_from_notify(&mut self, notify: &NotifyMsg) {
        if let Some(state) = notify.responder_state() {
            let _ = self.set_state(state as i64);
        }
    }

    /// Handle an incoming message. Returns `true` when it was meant for a responder.
    pub fn receive<D: Dispatcher>(&mut self, msg: &Message, out: &mut D) -> bool {
        match &msg.body {
            MessageBody::Notify(notify) => {
                match notify.kind {
                    NotifyKind::ResponderFastForward => {
                        self.set_state_from_notify(notify);
                        self.fast_forward(true, out);
                    }
                    NotifyKind::ResponderChangeState => {
                        self.set_state_from_notify(notify);
                        self.dirty = true;
                    }
                    NotifyKind::Activate => {
                        let triggered = notify.state != 0.0;
                        if (triggered && self.flags.detect_trigger)
                            || (!triggered && self.flags.detect_untrigger)
                        {
                            self.trigger(msg, out);
                            self.dirty = true;
                        }
                    }
                }
                true
            }
            MessageBody::ResponderEnable { enable } => {
                self.set_enabled(*enable);
                true
            }
            MessageBody::EventCallback(cb) => {
                self.callback_arrived(cb.user, out);
                true
            }
            MessageBody::TimerCallback { id, .. } => {
                self.callback_arrived(*id, out);
                true
            }
            _ => false,
        }
    }

    fn callback_arrived<D: Dispatcher>(&mut self, wait: i32, out: &mut D) {
        let Ok(wait) = usize::try_from(wait) else {
            return;
        };
        if !self.completed.set(wait) {
            warn!(
                target: "cadence::responder",
                responder = %self.name,
                wait,
                "callback id out of range, ignored"
            );
            return;
        }
        debug!(
            target: "cadence::responder",
            responder = %self.name,
            command = ?self.cmd_from_wait(wait),
            wait,
            "got callback"
        );
        self.continue_sending(out);
        self.dirty = true;
    }

    fn cmd_from_wait(&self, wait: usize) -> Option<usize> {
        let wait = u8::try_from(wait).ok()?;
        self.states.get(self.cur_state)?.cmd_from_wait(wait)
    }

    /// Start the current state's command list on behalf of `msg`, a notify
    /// message. Rejected while running or disabled.
    pub fn trigger<D: Dispatcher>(&mut self, msg: &Message, out: &mut D) {
        if self.cur_command.is_some() || !self.enabled {
            let reason = if self.enabled {
                "responder is running"
            } else {
                "responder disabled"
            };
            debug!(target: "cadence::responder", responder = %self.name, reason, "rejected trigger");
            return;
        }
        debug!(target: "cadence::responder", responder = %self.name, "trigger");

        self.notify_flags = msg.flags;
        self.triggerer = msg.sender;
        self.player = None;
        self.enter = false;
        if let MessageBody::Notify(notify) = &msg.body {
            self.player = notify.avatar;
            self.set_state_from_notify(notify);
            self.enter = notify.collision_enter().unwrap_or(false);
        }
        self.completed.clear();
        self.cur_command = Some(0);
        self.dirty = true;

        self.continue_sending(out);
    }

    /// Send commands until one waits on an unfinished callback.
    ///
    /// Returns `true` when the state ran to completion and the responder reset.
    pub fn continue_sending<D: Dispatcher>(&mut self, out: &mut D) -> bool {
        let Some(mut cursor) = self.cur_command else {
            return false;
        };
        let Some(state) = self.states.get(self.cur_state) else {
            return false;
        };

        while cursor < state.cmds.len() {
            let cmd = &state.cmds[cursor];
            if let Some(wait) = cmd.wait_on {
                if !self.completed.is_set(wait as usize) {
                    debug!(
                        target: "cadence::responder",
                        responder = %self.name,
                        command = cursor + 1,
                        waiting_for = ?state.cmd_from_wait(wait).map(|c| c + 1),
                        wait,
                        "command is waiting"
                    );
                    self.cur_command = Some(cursor);
                    return false;
                }
            }

            if !self.notify_flags.net_non_local || !is_local_only(&cmd.msg) {
                let msg = self.customize(&cmd.msg);
                if self.cfg.log_commands {
                    debug!(
                        target: "cadence::responder",
                        responder = %self.name,
                        command = cursor + 1,
                        kind = msg.body.name(),
                        "sending command"
                    );
                }
                out.dispatch(msg);
            }
            cursor += 1;
            self.dirty = true;
        }
        self.cur_command = Some(cursor);

        if let Some(missing) = self.completed.first_missing(state.num_callbacks as usize) {
            debug!(
                target: "cadence::responder",
                responder = %self.name,
                waiting_for = ?self.cmd_from_wait(missing).map(|c| c + 1),
                wait = missing,
                "can't reset, waiting for callback"
            );
            return false;
        }

        let next = state.switch_to_state as i64;
        debug!(target: "cadence::responder", responder = %self.name, "reset");
        self.cur_command = None;
        let _ = self.set_state(next);
        self.dirty = true;
        true
    }

    /// Copy of an authored command adjusted for the current trigger.
    fn customize(&self, authored: &Message) -> Message {
        let mut msg = authored.clone();
        msg.flags.inherit_from(&self.notify_flags);
        match &mut msg.body {
            MessageBody::Notify(notify) => {
                let mut found_collision = false;
                for event in &mut notify.events {
                    if let NotifyEvent::Collision { hitter, .. } = event {
                        *hitter = self.player;
                        found_collision = true;
                    }
                }
                if !found_collision {
                    msg.receivers.clear();
                    msg.receivers.extend(self.triggerer);
                }
                msg.sender = Some(self.key);
            }
            MessageBody::LinkToAge { .. } => {
                if msg.receivers.is_empty() {
                    match self.cfg.net_client_key {
                        Some(net) => msg.receivers.push(net),
                        None => warn!(
                            target: "cadence::responder",
                            responder = %self.name,
                            "link message has no receiver and no net client key is configured"
                        ),
                    }
                }
            }
            MessageBody::ArmatureEffectState { add_surface, .. } => {
                *add_surface = self.enter;
                msg.receivers.clear();
                msg.receivers.extend(self.player);
            }
            MessageBody::SubWorld { .. } => {
                msg.receivers.extend(self.cfg.local_avatar);
            }
            _ => {}
        }
        msg
    }

    /// Send every command of the current state in its fast-forward form and
    /// switch state, as if the whole sequence had already played out.
    pub fn fast_forward<D: Dispatcher>(&mut self, from_script: bool, out: &mut D) {
        debug!(
            target: "cadence::responder",
            responder = %self.name,
            from_script,
            "fast forward"
        );
        let Some(state) = self.states.get(self.cur_state) else {
            return;
        };
        for cmd in &state.cmds {
            if let Some(msg) = fast_forward_msg(&cmd.msg, self.flags.skip_ff_sound) {
                out.dispatch(msg);
            }
        }
        let next = state.switch_to_state as i64;
        debug!(target: "cadence::responder", responder = %self.name, "reset");
        self.cur_command = None;
        let _ = self.set_state(next);
        self.dirty = true;
    }

    /// Bring a freshly loaded responder back in line with its loaded state.
    ///
    /// The first client to join (`join_order == 0`) that finds a run in
    /// progress fast-forwards it. Everyone else re-arms the callbacks a
    /// running sequence is still waiting for.
    pub fn restore<D: Dispatcher>(&mut self, join_order: u32, out: &mut D) {
        if join_order == 0 && self.cur_command.is_some() && !self.got_first_load {
            self.got_first_load = true;
            self.fast_forward(false, out);
            return;
        }
        debug!(target: "cadence::responder", responder = %self.name, "load state");
        self.got_first_load = true;
        if self.cur_command.is_none() {
            return;
        }

        let Some(state) = self.states.get(self.cur_state) else {
            return;
        };
        for wait in 0..state.num_callbacks {
            if self.completed.is_set(wait as usize) {
                continue;
            }
            let Some(cmd) = state.cmd_from_wait(wait).and_then(|c| state.cmds.get(c)) else {
                warn!(
                    target: "cadence::responder",
                    responder = %self.name,
                    wait,
                    "pending callback has no command"
                );
                continue;
            };
            let body = match &cmd.msg.body {
                MessageBody::AnimCmd(anim) => {
                    debug!(target: "cadence::responder", anim = %anim.anim_name, "restoring anim callback");
                    let mut re = AnimCommand::new(anim.anim_name.clone()).with(AnimCmd::AddCallbacks);
                    re.callbacks = anim.callbacks.clone();
                    MessageBody::AnimCmd(re)
                }
                MessageBody::Sound(sound) => {
                    debug!(target: "cadence::responder", index = sound.index, "restoring sound callback");
                    let mut re = SoundCommand {
                        index: sound.index,
                        callbacks: sound.callbacks.clone(),
                        ..SoundCommand::default()
                    };
                    re.set_cmd(SoundCmd::AddCallbacks, true);
                    MessageBody::Sound(re)
                }
                _ => continue,
            };
            out.dispatch(Message {
                sender: cmd.msg.sender,
                receivers: cmd.msg.receivers.clone(),
                flags: BroadcastFlags::default(),
                body,
            });
        }
    }

    pub fn capture_sync_state(&self) -> ResponderSyncState {
        ResponderSyncState {
            cur_state: self.cur_state as u8,
            cur_command: self.cur_command.map(|c| c as u8),
            net_request: self.notify_flags.net_non_local,
            completed: self.completed,
            player: self.player,
            triggerer: self.triggerer,
        }
    }

    /// Apply state received from the network. Out-of-range indices reject the
    /// whole update and leave the responder untouched.
    pub fn apply_sync_state(&mut self, s: &ResponderSyncState) -> ResponderResult<()> {
        let Some(state) = self.states.get(s.cur_state as usize) else {
            return Err(ResponderError::StateOutOfRange {
                state: s.cur_state as i64,
                count: self.states.len(),
            });
        };
        if let Some(cmd) = s.cur_command {
            if cmd as usize > state.cmds.len() {
                return Err(ResponderError::CommandOutOfRange {
                    command: cmd as i64,
                    count: state.cmds.len(),
                });
            }
        }
        self.cur_state = s.cur_state as usize;
        self.cur_command = s.cur_command.map(|c| c as usize);
        self.notify_flags.net_non_local = s.net_request;
        self.completed = s.completed;
        self.player = s.player;
        self.triggerer = s.triggerer;
        Ok(())
    }

    /// Write the authored states followed by current state, enabled and flags.
    pub fn write<W: Write>(&self, w: &mut W) -> ResponderResult<()> {
        w.write_u8(self.states.len() as u8)?;
        for state in &self.states {
            state.write(w)?;
        }
        w.write_u8(self.cur_state as u8)?;
        w.write_u8(self.enabled as u8)?;
        w.write_u8(self.flags.to_bits())?;
        Ok(())
    }

    pub fn read<R: Read>(key: EntityKey, r: &mut R, cfg: ResponderConfig) -> ResponderResult<Self> {
        let num_states = r.read_u8()?;
        let mut states = Vec::with_capacity(num_states as usize);
        for _ in 0..num_states {
            states.push(ResponderState::read(r)?);
        }
        let initial_state = r.read_u8()?;
        let enabled = r.read_u8()? != 0;
        let flags = ResponderFlags::from_bits(r.read_u8()?);
        Self::from_definition(
            key,
            ResponderDefinition {
                name: String::new(),
                states,
                flags,
                enabled,
                initial_state,
            },
            cfg,
        )
    }
}
