//! Message contracts exchanged between keyed entities.
//!
//! Messages are plain values. Anything that forwards or re-targets a message
//! works on its own clone, so no component ever observes another component's
//! edits to a message it already sent.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::flags::BroadcastFlags;
use crate::key::{EntityKey, InstanceId};

/// Animation transport commands. Declaration order is the order in which a
/// time converter applies them when several are set on one message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimCmd {
    AddCallbacks,
    RemoveCallbacks,
    SetBackwards,
    SetForewards,
    Stop,
    SetLooping,
    UnSetLooping,
    SetBegin,
    SetEnd,
    SetLoopEnd,
    SetLoopBegin,
    SetSpeed,
    GoToTime,
    GoToPercent,
    GoToBegin,
    GoToEnd,
    GoToLoopBegin,
    GoToLoopEnd,
    ToggleState,
    Continue,
    IncrementForward,
    IncrementBackward,
    PlayToTime,
    PlayToPercentage,
    FastForward,
}

impl AnimCmd {
    pub const ALL: [AnimCmd; 25] = [
        AnimCmd::AddCallbacks,
        AnimCmd::RemoveCallbacks,
        AnimCmd::SetBackwards,
        AnimCmd::SetForewards,
        AnimCmd::Stop,
        AnimCmd::SetLooping,
        AnimCmd::UnSetLooping,
        AnimCmd::SetBegin,
        AnimCmd::SetEnd,
        AnimCmd::SetLoopEnd,
        AnimCmd::SetLoopBegin,
        AnimCmd::SetSpeed,
        AnimCmd::GoToTime,
        AnimCmd::GoToPercent,
        AnimCmd::GoToBegin,
        AnimCmd::GoToEnd,
        AnimCmd::GoToLoopBegin,
        AnimCmd::GoToLoopEnd,
        AnimCmd::ToggleState,
        AnimCmd::Continue,
        AnimCmd::IncrementForward,
        AnimCmd::IncrementBackward,
        AnimCmd::PlayToTime,
        AnimCmd::PlayToPercentage,
        AnimCmd::FastForward,
    ];

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

/// An animation transport request addressed to a named animation on a target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimCommand {
    pub cmds: BTreeSet<AnimCmd>,
    /// Empty means "the whole animation".
    #[serde(default)]
    pub anim_name: String,
    /// Named loop segment whose bounds replace the loop points.
    #[serde(default)]
    pub loop_name: String,
    #[serde(default)]
    pub begin: f32,
    #[serde(default)]
    pub end: f32,
    #[serde(default)]
    pub loop_begin: f32,
    #[serde(default)]
    pub loop_end: f32,
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub speed_change_rate: f32,
    #[serde(default)]
    pub time: f32,
    /// Completion callbacks; each is a full message whose body is an `EventCallback`.
    #[serde(default)]
    pub callbacks: Vec<Message>,
}

impl AnimCommand {
    pub fn new(anim_name: impl Into<String>) -> Self {
        Self {
            anim_name: anim_name.into(),
            ..Self::default()
        }
    }

    pub fn with(mut self, cmd: AnimCmd) -> Self {
        self.cmds.insert(cmd);
        self
    }

    #[inline]
    pub fn cmd(&self, cmd: AnimCmd) -> bool {
        self.cmds.contains(&cmd)
    }

    pub fn set_cmd(&mut self, cmd: AnimCmd, on: bool) {
        if on {
            self.cmds.insert(cmd);
        } else {
            self.cmds.remove(&cmd);
        }
    }

    /// Whether applying this command moves the animation's position.
    pub fn changes_anim_time(&self) -> bool {
        const MOVERS: [AnimCmd; 16] = [
            AnimCmd::Continue,
            AnimCmd::Stop,
            AnimCmd::SetBackwards,
            AnimCmd::SetForewards,
            AnimCmd::GoToTime,
            AnimCmd::GoToPercent,
            AnimCmd::GoToBegin,
            AnimCmd::GoToEnd,
            AnimCmd::GoToLoopBegin,
            AnimCmd::GoToLoopEnd,
            AnimCmd::ToggleState,
            AnimCmd::IncrementForward,
            AnimCmd::IncrementBackward,
            AnimCmd::PlayToTime,
            AnimCmd::PlayToPercentage,
            AnimCmd::FastForward,
        ];
        MOVERS.iter().any(|c| self.cmd(*c))
    }
}

/// Grouped-animation commands handled by a blend manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCmd {
    SetBlend,
    SetAmp,
    SetAnimTime,
}

impl GroupCmd {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(GroupCmd::SetBlend),
            1 => Some(GroupCmd::SetAmp),
            2 => Some(GroupCmd::SetAnimTime),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCommand {
    pub cmds: BTreeSet<GroupCmd>,
    #[serde(default)]
    pub anim_name: String,
    #[serde(default)]
    pub blend: f32,
    #[serde(default)]
    pub blend_rate: f32,
    #[serde(default)]
    pub amp: f32,
    #[serde(default)]
    pub amp_rate: f32,
    #[serde(default)]
    pub anim_time: f32,
    #[serde(default)]
    pub callbacks: Vec<Message>,
}

impl GroupCommand {
    #[inline]
    pub fn cmd(&self, cmd: GroupCmd) -> bool {
        self.cmds.contains(&cmd)
    }
}

/// Moment at which a time-triggered callback fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackEvent {
    Start,
    Stop,
    Reverse,
    Begin,
    End,
    Time,
    SingleFrameAdjust,
    SingleFrameEval,
}

impl CallbackEvent {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CallbackEvent::Start),
            1 => Some(CallbackEvent::Stop),
            2 => Some(CallbackEvent::Reverse),
            3 => Some(CallbackEvent::Begin),
            4 => Some(CallbackEvent::End),
            5 => Some(CallbackEvent::Time),
            6 => Some(CallbackEvent::SingleFrameAdjust),
            7 => Some(CallbackEvent::SingleFrameEval),
            _ => None,
        }
    }
}

/// What a fired callback means to its receiver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackTag {
    /// Completion signal identified by `EventCallback::user`.
    #[default]
    User,
    /// Standing start/stop/single-frame callback of one animation instance.
    InstanceEval(InstanceId),
    /// Detach the named animation when this fires.
    DetachOnStop(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventCallback {
    /// Identity of this callback while it is in flight; 0 means unassigned.
    #[serde(default)]
    pub token: u64,
    pub event: CallbackEvent,
    #[serde(default)]
    pub event_time: f32,
    /// Remaining repeats after the next firing; negative repeats forever.
    #[serde(default)]
    pub repeats: i32,
    /// Wait index / user id reported back to the requester.
    #[serde(default)]
    pub user: i32,
    #[serde(default)]
    pub tag: CallbackTag,
}

impl EventCallback {
    pub fn new(event: CallbackEvent, user: i32) -> Self {
        Self {
            token: 0,
            event,
            event_time: 0.0,
            repeats: 0,
            user,
            tag: CallbackTag::User,
        }
    }

    pub fn at_time(mut self, t: f32) -> Self {
        self.event = CallbackEvent::Time;
        self.event_time = t;
        self
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = token;
        self
    }

    pub fn with_repeats(mut self, repeats: i32) -> Self {
        self.repeats = repeats;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Activate,
    ResponderFastForward,
    ResponderChangeState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    Collision {
        enter: bool,
        #[serde(default)]
        hitter: Option<EntityKey>,
    },
    ResponderState {
        state: i32,
    },
    Activate {
        active: bool,
    },
}

/// Trigger/untrigger notification, also used to drive responders directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotifyMsg {
    pub kind: NotifyKind,
    /// Non-zero means triggered, zero means untriggered.
    #[serde(default)]
    pub state: f32,
    #[serde(default)]
    pub avatar: Option<EntityKey>,
    #[serde(default)]
    pub events: Vec<NotifyEvent>,
}

impl NotifyMsg {
    pub fn activate(state: f32) -> Self {
        Self {
            kind: NotifyKind::Activate,
            state,
            avatar: None,
            events: Vec::new(),
        }
    }

    pub fn responder_state(&self) -> Option<i32> {
        self.events.iter().find_map(|e| match e {
            NotifyEvent::ResponderState { state } => Some(*state),
            _ => None,
        })
    }

    pub fn collision_enter(&self) -> Option<bool> {
        self.events.iter().find_map(|e| match e {
            NotifyEvent::Collision { enter, .. } => Some(*enter),
            _ => None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCmd {
    Play,
    Stop,
    ToggleState,
    AddCallbacks,
    RemoveCallbacks,
    GoToTime,
    FastForwardPlay,
    FastForwardToggle,
    IsLocalOnly,
}

impl SoundCmd {
    pub const ALL: [SoundCmd; 9] = [
        SoundCmd::Play,
        SoundCmd::Stop,
        SoundCmd::ToggleState,
        SoundCmd::AddCallbacks,
        SoundCmd::RemoveCallbacks,
        SoundCmd::GoToTime,
        SoundCmd::FastForwardPlay,
        SoundCmd::FastForwardToggle,
        SoundCmd::IsLocalOnly,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SoundCommand {
    pub cmds: BTreeSet<SoundCmd>,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub time: f32,
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub volume: f32,
    #[serde(default)]
    pub looping: bool,
    #[serde(default)]
    pub callbacks: Vec<Message>,
}

impl SoundCommand {
    #[inline]
    pub fn cmd(&self, cmd: SoundCmd) -> bool {
        self.cmds.contains(&cmd)
    }

    pub fn set_cmd(&mut self, cmd: SoundCmd, on: bool) {
        if on {
            self.cmds.insert(cmd);
        } else {
            self.cmds.remove(&cmd);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    AnimCmd(AnimCommand),
    GroupCmd(GroupCommand),
    EventCallback(EventCallback),
    TimerCallback { id: i32, time: f32 },
    Notify(NotifyMsg),
    ResponderEnable { enable: bool },
    Sound(SoundCommand),
    Camera { cmd: String },
    LinkToAge { age: String },
    Enable { enable: bool },
    ExcludeRegion { clear: bool },
    SimSuppress { suppress: bool },
    SubWorld { world: Option<EntityKey> },
    ArmatureEffectState { surface: u8, add_surface: bool },
}

impl MessageBody {
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::AnimCmd(_) => "anim_cmd",
            MessageBody::GroupCmd(_) => "group_cmd",
            MessageBody::EventCallback(_) => "event_callback",
            MessageBody::TimerCallback { .. } => "timer_callback",
            MessageBody::Notify(_) => "notify",
            MessageBody::ResponderEnable { .. } => "responder_enable",
            MessageBody::Sound(_) => "sound",
            MessageBody::Camera { .. } => "camera",
            MessageBody::LinkToAge { .. } => "link_to_age",
            MessageBody::Enable { .. } => "enable",
            MessageBody::ExcludeRegion { .. } => "exclude_region",
            MessageBody::SimSuppress { .. } => "sim_suppress",
            MessageBody::SubWorld { .. } => "sub_world",
            MessageBody::ArmatureEffectState { .. } => "armature_effect_state",
        }
    }
}

/// A routed message: who sent it, who receives it, how it propagates, and what it says.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub sender: Option<EntityKey>,
    #[serde(default)]
    pub receivers: Vec<EntityKey>,
    #[serde(default)]
    pub flags: BroadcastFlags,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            sender: None,
            receivers: Vec::new(),
            flags: BroadcastFlags::default(),
            body,
        }
    }

    /// A callback message addressed to `receiver`.
    pub fn callback(receiver: EntityKey, cb: EventCallback) -> Self {
        Self::new(MessageBody::EventCallback(cb)).to(receiver)
    }

    pub fn to(mut self, receiver: EntityKey) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn from(mut self, sender: EntityKey) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_flags(mut self, flags: BroadcastFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn is_addressed_to(&self, key: EntityKey) -> bool {
        self.receivers.contains(&key)
    }

    pub fn event_callback(&self) -> Option<&EventCallback> {
        match &self.body {
            MessageBody::EventCallback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn event_callback_mut(&mut self) -> Option<&mut EventCallback> {
        match &mut self.body {
            MessageBody::EventCallback(cb) => Some(cb),
            _ => None,
        }
    }

    /// Embedded completion callbacks, for bodies that carry them.
    pub fn callbacks(&self) -> Option<&[Message]> {
        match &self.body {
            MessageBody::AnimCmd(c) => Some(&c.callbacks),
            MessageBody::GroupCmd(c) => Some(&c.callbacks),
            MessageBody::Sound(c) => Some(&c.callbacks),
            _ => None,
        }
    }

    pub fn callbacks_mut(&mut self) -> Option<&mut Vec<Message>> {
        match &mut self.body {
            MessageBody::AnimCmd(c) => Some(&mut c.callbacks),
            MessageBody::GroupCmd(c) => Some(&mut c.callbacks),
            MessageBody::Sound(c) => Some(&mut c.callbacks),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anim_cmd_u8_mapping_is_dense() {
        for (i, c) in AnimCmd::ALL.iter().enumerate() {
            assert_eq!(c.to_u8() as usize, i);
            assert_eq!(AnimCmd::from_u8(i as u8), Some(*c));
        }
        assert_eq!(AnimCmd::from_u8(200), None);
    }

    #[test]
    fn changes_anim_time_ignores_pure_config() {
        let cfg = AnimCommand::new("door").with(AnimCmd::SetSpeed);
        assert!(!cfg.changes_anim_time());
        let play = AnimCommand::new("door").with(AnimCmd::Continue);
        assert!(play.changes_anim_time());
    }

    #[test]
    fn message_json_shape() {
        let msg = Message::new(MessageBody::ResponderEnable { enable: true }).to(EntityKey(3));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["body"]["type"], "responder_enable");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
