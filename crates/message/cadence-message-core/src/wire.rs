//! Little-endian binary codec for messages and callbacks.
//!
//! Used by the persisted forms of time converters (registered callbacks) and
//! responders (command lists). Every variable-length section is preceded by a
//! count that is range-checked before anything is allocated.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::WireError;
use crate::flags::BroadcastFlags;
use crate::key::{EntityKey, InstanceId};
use crate::message::{
    AnimCmd, AnimCommand, CallbackEvent, CallbackTag, EventCallback, GroupCmd, GroupCommand,
    Message, MessageBody, NotifyEvent, NotifyKind, NotifyMsg, SoundCmd, SoundCommand,
};

pub const MAX_RECEIVERS: usize = 1024;
pub const MAX_CALLBACKS: usize = 256;
pub const MAX_STRING: usize = 4096;
pub const MAX_EVENTS: usize = 64;

const NO_KEY: u32 = u32::MAX;

pub type WireResult<T> = Result<T, WireError>;

pub fn write_key<W: Write>(w: &mut W, key: Option<EntityKey>) -> WireResult<()> {
    w.write_u32::<LittleEndian>(key.map(|k| k.0).unwrap_or(NO_KEY))?;
    Ok(())
}

pub fn read_key<R: Read>(r: &mut R) -> WireResult<Option<EntityKey>> {
    let raw = r.read_u32::<LittleEndian>()?;
    Ok((raw != NO_KEY).then_some(EntityKey(raw)))
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> WireResult<()> {
    write_count(w, "string", s.len(), MAX_STRING)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_string<R: Read>(r: &mut R) -> WireResult<String> {
    let len = read_count(r, "string", MAX_STRING)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| WireError::invalid(e.to_string()))
}

/// Count prefix as `u16`, rejected when above `max`.
pub fn write_count<W: Write>(
    w: &mut W,
    what: &'static str,
    count: usize,
    max: usize,
) -> WireResult<()> {
    if count > max {
        return Err(WireError::CountOutOfRange { what, count, max });
    }
    w.write_u16::<LittleEndian>(count as u16)?;
    Ok(())
}

pub fn read_count<R: Read>(r: &mut R, what: &'static str, max: usize) -> WireResult<usize> {
    let count = r.read_u16::<LittleEndian>()? as usize;
    if count > max {
        return Err(WireError::CountOutOfRange { what, count, max });
    }
    Ok(count)
}

pub fn write_event_callback<W: Write>(w: &mut W, cb: &EventCallback) -> WireResult<()> {
    w.write_u64::<LittleEndian>(cb.token)?;
    w.write_u8(cb.event.to_u8())?;
    w.write_f32::<LittleEndian>(cb.event_time)?;
    w.write_i32::<LittleEndian>(cb.repeats)?;
    w.write_i32::<LittleEndian>(cb.user)?;
    match &cb.tag {
        CallbackTag::User => w.write_u8(0)?,
        CallbackTag::InstanceEval(id) => {
            w.write_u8(1)?;
            w.write_u32::<LittleEndian>(id.0)?;
        }
        CallbackTag::DetachOnStop(anim) => {
            w.write_u8(2)?;
            write_string(w, anim)?;
        }
    }
    Ok(())
}

pub fn read_event_callback<R: Read>(r: &mut R) -> WireResult<EventCallback> {
    let token = r.read_u64::<LittleEndian>()?;
    let raw_event = r.read_u8()?;
    let event = CallbackEvent::from_u8(raw_event).ok_or(WireError::UnknownTag {
        kind: "callback event",
        tag: raw_event as u32,
    })?;
    let event_time = r.read_f32::<LittleEndian>()?;
    let repeats = r.read_i32::<LittleEndian>()?;
    let user = r.read_i32::<LittleEndian>()?;
    let tag = match r.read_u8()? {
        0 => CallbackTag::User,
        1 => CallbackTag::InstanceEval(InstanceId(r.read_u32::<LittleEndian>()?)),
        2 => CallbackTag::DetachOnStop(read_string(r)?),
        other => {
            return Err(WireError::UnknownTag {
                kind: "callback tag",
                tag: other as u32,
            })
        }
    };
    Ok(EventCallback {
        token,
        event,
        event_time,
        repeats,
        user,
        tag,
    })
}

fn write_callbacks<W: Write>(w: &mut W, cbs: &[Message]) -> WireResult<()> {
    write_count(w, "callbacks", cbs.len(), MAX_CALLBACKS)?;
    for cb in cbs {
        write_message(w, cb)?;
    }
    Ok(())
}

fn read_callbacks<R: Read>(r: &mut R) -> WireResult<Vec<Message>> {
    let n = read_count(r, "callbacks", MAX_CALLBACKS)?;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_message(r)?);
    }
    Ok(out)
}

fn write_anim_command<W: Write>(w: &mut W, c: &AnimCommand) -> WireResult<()> {
    w.write_u8(c.cmds.len() as u8)?;
    for cmd in &c.cmds {
        w.write_u8(cmd.to_u8())?;
    }
    write_string(w, &c.anim_name)?;
    write_string(w, &c.loop_name)?;
    for v in [
        c.begin,
        c.end,
        c.loop_begin,
        c.loop_end,
        c.speed,
        c.speed_change_rate,
        c.time,
    ] {
        w.write_f32::<LittleEndian>(v)?;
    }
    write_callbacks(w, &c.callbacks)
}

fn read_anim_command<R: Read>(r: &mut R) -> WireResult<AnimCommand> {
    let mut c = AnimCommand::default();
    let n = r.read_u8()?;
    for _ in 0..n {
        let raw = r.read_u8()?;
        let cmd = AnimCmd::from_u8(raw).ok_or(WireError::UnknownTag {
            kind: "anim cmd",
            tag: raw as u32,
        })?;
        c.cmds.insert(cmd);
    }
    c.anim_name = read_string(r)?;
    c.loop_name = read_string(r)?;
    c.begin = r.read_f32::<LittleEndian>()?;
    c.end = r.read_f32::<LittleEndian>()?;
    c.loop_begin = r.read_f32::<LittleEndian>()?;
    c.loop_end = r.read_f32::<LittleEndian>()?;
    c.speed = r.read_f32::<LittleEndian>()?;
    c.speed_change_rate = r.read_f32::<LittleEndian>()?;
    c.time = r.read_f32::<LittleEndian>()?;
    c.callbacks = read_callbacks(r)?;
    Ok(c)
}

fn write_group_command<W: Write>(w: &mut W, c: &GroupCommand) -> WireResult<()> {
    w.write_u8(c.cmds.len() as u8)?;
    for cmd in &c.cmds {
        w.write_u8(*cmd as u8)?;
    }
    write_string(w, &c.anim_name)?;
    for v in [c.blend, c.blend_rate, c.amp, c.amp_rate, c.anim_time] {
        w.write_f32::<LittleEndian>(v)?;
    }
    write_callbacks(w, &c.callbacks)
}

fn read_group_command<R: Read>(r: &mut R) -> WireResult<GroupCommand> {
    let mut c = GroupCommand::default();
    let n = r.read_u8()?;
    for _ in 0..n {
        let raw = r.read_u8()?;
        let cmd = GroupCmd::from_u8(raw).ok_or(WireError::UnknownTag {
            kind: "group cmd",
            tag: raw as u32,
        })?;
        c.cmds.insert(cmd);
    }
    c.anim_name = read_string(r)?;
    c.blend = r.read_f32::<LittleEndian>()?;
    c.blend_rate = r.read_f32::<LittleEndian>()?;
    c.amp = r.read_f32::<LittleEndian>()?;
    c.amp_rate = r.read_f32::<LittleEndian>()?;
    c.anim_time = r.read_f32::<LittleEndian>()?;
    c.callbacks = read_callbacks(r)?;
    Ok(c)
}

fn write_sound_command<W: Write>(w: &mut W, c: &SoundCommand) -> WireResult<()> {
    w.write_u8(c.cmds.len() as u8)?;
    for cmd in &c.cmds {
        w.write_u8(*cmd as u8)?;
    }
    w.write_i32::<LittleEndian>(c.index)?;
    w.write_f32::<LittleEndian>(c.time)?;
    w.write_f32::<LittleEndian>(c.speed)?;
    w.write_f32::<LittleEndian>(c.volume)?;
    w.write_u8(c.looping as u8)?;
    write_callbacks(w, &c.callbacks)
}

fn read_sound_command<R: Read>(r: &mut R) -> WireResult<SoundCommand> {
    let mut c = SoundCommand::default();
    let n = r.read_u8()?;
    for _ in 0..n {
        let raw = r.read_u8()?;
        let cmd = SoundCmd::from_u8(raw).ok_or(WireError::UnknownTag {
            kind: "sound cmd",
            tag: raw as u32,
        })?;
        c.cmds.insert(cmd);
    }
    c.index = r.read_i32::<LittleEndian>()?;
    c.time = r.read_f32::<LittleEndian>()?;
    c.speed = r.read_f32::<LittleEndian>()?;
    c.volume = r.read_f32::<LittleEndian>()?;
    c.looping = r.read_u8()? != 0;
    c.callbacks = read_callbacks(r)?;
    Ok(c)
}

fn write_notify<W: Write>(w: &mut W, n: &NotifyMsg) -> WireResult<()> {
    w.write_u8(match n.kind {
        NotifyKind::Activate => 0,
        NotifyKind::ResponderFastForward => 1,
        NotifyKind::ResponderChangeState => 2,
    })?;
    w.write_f32::<LittleEndian>(n.state)?;
    write_key(w, n.avatar)?;
    write_count(w, "notify events", n.events.len(), MAX_EVENTS)?;
    for ev in &n.events {
        match ev {
            NotifyEvent::Collision { enter, hitter } => {
                w.write_u8(0)?;
                w.write_u8(*enter as u8)?;
                write_key(w, *hitter)?;
            }
            NotifyEvent::ResponderState { state } => {
                w.write_u8(1)?;
                w.write_i32::<LittleEndian>(*state)?;
            }
            NotifyEvent::Activate { active } => {
                w.write_u8(2)?;
                w.write_u8(*active as u8)?;
            }
        }
    }
    Ok(())
}

fn read_notify<R: Read>(r: &mut R) -> WireResult<NotifyMsg> {
    let kind = match r.read_u8()? {
        0 => NotifyKind::Activate,
        1 => NotifyKind::ResponderFastForward,
        2 => NotifyKind::ResponderChangeState,
        other => {
            return Err(WireError::UnknownTag {
                kind: "notify kind",
                tag: other as u32,
            })
        }
    };
    let state = r.read_f32::<LittleEndian>()?;
    let avatar = read_key(r)?;
    let n = read_count(r, "notify events", MAX_EVENTS)?;
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        let ev = match r.read_u8()? {
            0 => NotifyEvent::Collision {
                enter: r.read_u8()? != 0,
                hitter: read_key(r)?,
            },
            1 => NotifyEvent::ResponderState {
                state: r.read_i32::<LittleEndian>()?,
            },
            2 => NotifyEvent::Activate {
                active: r.read_u8()? != 0,
            },
            other => {
                return Err(WireError::UnknownTag {
                    kind: "notify event",
                    tag: other as u32,
                })
            }
        };
        events.push(ev);
    }
    Ok(NotifyMsg {
        kind,
        state,
        avatar,
        events,
    })
}

fn body_tag(body: &MessageBody) -> u8 {
    match body {
        MessageBody::AnimCmd(_) => 0,
        MessageBody::GroupCmd(_) => 1,
        MessageBody::EventCallback(_) => 2,
        MessageBody::TimerCallback { .. } => 3,
        MessageBody::Notify(_) => 4,
        MessageBody::ResponderEnable { .. } => 5,
        MessageBody::Sound(_) => 6,
        MessageBody::Camera { .. } => 7,
        MessageBody::LinkToAge { .. } => 8,
        MessageBody::Enable { .. } => 9,
        MessageBody::ExcludeRegion { .. } => 10,
        MessageBody::SimSuppress { .. } => 11,
        MessageBody::SubWorld { .. } => 12,
        MessageBody::ArmatureEffectState { .. } => 13,
    }
}

/// `[sender][receiverCount u16][receivers...][flags u32][bodyTag u8][body...]`
pub fn write_message<W: Write>(w: &mut W, msg: &Message) -> WireResult<()> {
    write_key(w, msg.sender)?;
    write_count(w, "receivers", msg.receivers.len(), MAX_RECEIVERS)?;
    for k in &msg.receivers {
        write_key(w, Some(*k))?;
    }
    w.write_u32::<LittleEndian>(msg.flags.to_bits())?;
    w.write_u8(body_tag(&msg.body))?;
    match &msg.body {
        MessageBody::AnimCmd(c) => write_anim_command(w, c)?,
        MessageBody::GroupCmd(c) => write_group_command(w, c)?,
        MessageBody::EventCallback(cb) => write_event_callback(w, cb)?,
        MessageBody::TimerCallback { id, time } => {
            w.write_i32::<LittleEndian>(*id)?;
            w.write_f32::<LittleEndian>(*time)?;
        }
        MessageBody::Notify(n) => write_notify(w, n)?,
        MessageBody::ResponderEnable { enable } => w.write_u8(*enable as u8)?,
        MessageBody::Sound(c) => write_sound_command(w, c)?,
        MessageBody::Camera { cmd } => write_string(w, cmd)?,
        MessageBody::LinkToAge { age } => write_string(w, age)?,
        MessageBody::Enable { enable } => w.write_u8(*enable as u8)?,
        MessageBody::ExcludeRegion { clear } => w.write_u8(*clear as u8)?,
        MessageBody::SimSuppress { suppress } => w.write_u8(*suppress as u8)?,
        MessageBody::SubWorld { world } => write_key(w, *world)?,
        MessageBody::ArmatureEffectState {
            surface,
            add_surface,
        } => {
            w.write_u8(*surface)?;
            w.write_u8(*add_surface as u8)?;
        }
    }
    Ok(())
}

pub fn read_message<R: Read>(r: &mut R) -> WireResult<Message> {
    let sender = read_key(r)?;
    let n = read_count(r, "receivers", MAX_RECEIVERS)?;
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        match read_key(r)? {
            Some(k) => receivers.push(k),
            None => return Err(WireError::invalid("null receiver key")),
        }
    }
    let flags = BroadcastFlags::from_bits(r.read_u32::<LittleEndian>()?);
    let tag = r.read_u8()?;
    let body = match tag {
        0 => MessageBody::AnimCmd(read_anim_command(r)?),
        1 => MessageBody::GroupCmd(read_group_command(r)?),
        2 => MessageBody::EventCallback(read_event_callback(r)?),
        3 => MessageBody::TimerCallback {
            id: r.read_i32::<LittleEndian>()?,
            time: r.read_f32::<LittleEndian>()?,
        },
        4 => MessageBody::Notify(read_notify(r)?),
        5 => MessageBody::ResponderEnable {
            enable: r.read_u8()? != 0,
        },
        6 => MessageBody::Sound(read_sound_command(r)?),
        7 => MessageBody::Camera {
            cmd: read_string(r)?,
        },
        8 => MessageBody::LinkToAge {
            age: read_string(r)?,
        },
        9 => MessageBody::Enable {
            enable: r.read_u8()? != 0,
        },
        10 => MessageBody::ExcludeRegion {
            clear: r.read_u8()? != 0,
        },
        11 => MessageBody::SimSuppress {
            suppress: r.read_u8()? != 0,
        },
        12 => MessageBody::SubWorld {
            world: read_key(r)?,
        },
        13 => MessageBody::ArmatureEffectState {
            surface: r.read_u8()?,
            add_surface: r.read_u8()? != 0,
        },
        other => {
            return Err(WireError::UnknownTag {
                kind: "message body",
                tag: other as u32,
            })
        }
    };
    Ok(Message {
        sender,
        receivers,
        flags,
        body,
    })
}
