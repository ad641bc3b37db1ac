//! Authored responder data: states, their commands and wait tables.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use cadence_message::wire::{read_message, write_message};
use cadence_message::Message;

use crate::error::{ResponderError, ResponderResult};

/// Upper bound on distinct wait ids in one state.
pub const MAX_WAIT: usize = 128;

/// One command of a state: the message to send and the callback it waits on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponderCmd {
    pub msg: Message,
    #[serde(default)]
    pub wait_on: Option<u8>,
}

impl ResponderCmd {
    pub fn new(msg: Message) -> Self {
        Self { msg, wait_on: None }
    }

    pub fn waiting_on(mut self, wait: u8) -> Self {
        self.wait_on = Some(wait);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponderState {
    pub cmds: Vec<ResponderCmd>,
    /// Callbacks that must all complete before the state may switch.
    #[serde(default)]
    pub num_callbacks: u8,
    #[serde(default)]
    pub switch_to_state: u8,
    /// Wait id → index of the command whose callback carries it.
    #[serde(default)]
    pub wait_to_cmd: BTreeMap<u8, u8>,
}

impl ResponderState {
    /// Command that produces callback `wait`, if known.
    pub fn cmd_from_wait(&self, wait: u8) -> Option<usize> {
        self.wait_to_cmd.get(&wait).map(|&c| c as usize)
    }

    fn validate(&self, index: usize, num_states: usize) -> ResponderResult<()> {
        if self.switch_to_state as usize >= num_states {
            return Err(ResponderError::StateOutOfRange {
                state: self.switch_to_state as i64,
                count: num_states,
            });
        }
        if self.num_callbacks as usize > MAX_WAIT {
            return Err(ResponderError::WaitOutOfRange {
                wait: self.num_callbacks as i64,
                max: MAX_WAIT,
            });
        }
        if self.cmds.len() > u8::MAX as usize {
            return Err(ResponderError::invalid(format!(
                "state {index} has {} commands",
                self.cmds.len()
            )));
        }
        for cmd in &self.cmds {
            if let Some(wait) = cmd.wait_on {
                // a wait past num_callbacks is never counted toward completion
                if wait >= self.num_callbacks {
                    return Err(ResponderError::WaitOutOfRange {
                        wait: wait as i64,
                        max: self.num_callbacks as usize,
                    });
                }
            }
        }
        for (&wait, &cmd) in &self.wait_to_cmd {
            if wait as usize >= MAX_WAIT {
                return Err(ResponderError::WaitOutOfRange {
                    wait: wait as i64,
                    max: MAX_WAIT,
                });
            }
            if cmd as usize >= self.cmds.len() {
                return Err(ResponderError::CommandOutOfRange {
                    command: cmd as i64,
                    count: self.cmds.len(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn write<W: Write>(&self, w: &mut W) -> ResponderResult<()> {
        w.write_u8(self.num_callbacks)?;
        w.write_u8(self.switch_to_state)?;
        w.write_u8(self.cmds.len() as u8)?;
        for cmd in &self.cmds {
            write_message(w, &cmd.msg)?;
            w.write_i8(cmd.wait_on.map_or(-1, |v| v as i8))?;
        }
        w.write_u8(self.wait_to_cmd.len() as u8)?;
        for (&wait, &cmd) in &self.wait_to_cmd {
            w.write_u8(wait)?;
            w.write_u8(cmd)?;
        }
        Ok(())
    }

    pub(crate) fn read<R: Read>(r: &mut R) -> ResponderResult<Self> {
        let num_callbacks = r.read_u8()?;
        let switch_to_state = r.read_u8()?;
        let num_cmds = r.read_u8()?;
        let mut cmds = Vec::with_capacity(num_cmds as usize);
        for _ in 0..num_cmds {
            let msg = read_message(r)?;
            let wait = r.read_i8()?;
            cmds.push(ResponderCmd {
                msg,
                wait_on: u8::try_from(wait).ok(),
            });
        }
        let map_size = r.read_u8()?;
        let mut wait_to_cmd = BTreeMap::new();
        for _ in 0..map_size {
            let wait = r.read_u8()?;
            let cmd = r.read_u8()?;
            wait_to_cmd.insert(wait, cmd);
        }
        Ok(Self {
            cmds,
            num_callbacks,
            switch_to_state,
            wait_to_cmd,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderFlags {
    /// React to notifications with a non-zero state.
    pub detect_trigger: bool,
    /// React to notifications with a zero state.
    pub detect_untrigger: bool,
    /// Drop sound commands when fast-forwarding.
    pub skip_ff_sound: bool,
}

const DETECT_TRIGGER: u8 = 1 << 0;
const DETECT_UNTRIGGER: u8 = 1 << 1;
const SKIP_FF_SOUND: u8 = 1 << 2;

impl ResponderFlags {
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.detect_trigger {
            bits |= DETECT_TRIGGER;
        }
        if self.detect_untrigger {
            bits |= DETECT_UNTRIGGER;
        }
        if self.skip_ff_sound {
            bits |= SKIP_FF_SOUND;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            detect_trigger: bits & DETECT_TRIGGER != 0,
            detect_untrigger: bits & DETECT_UNTRIGGER != 0,
            skip_ff_sound: bits & SKIP_FF_SOUND != 0,
        }
    }
}

/// Set of wait ids whose callbacks have arrived.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompletedEvents(u128);

impl CompletedEvents {
    /// Mark `wait` complete. Returns `false` for ids past [`MAX_WAIT`].
    pub fn set(&mut self, wait: usize) -> bool {
        if wait >= MAX_WAIT {
            return false;
        }
        self.0 |= 1u128 << wait;
        true
    }

    #[inline]
    pub fn is_set(&self, wait: usize) -> bool {
        wait < MAX_WAIT && self.0 & (1u128 << wait) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// First id below `count` that has not completed.
    pub fn first_missing(&self, count: usize) -> Option<usize> {
        (0..count.min(MAX_WAIT)).find(|&i| !self.is_set(i))
    }

    pub fn to_bits(self) -> u128 {
        self.0
    }

    pub fn from_bits(bits: u128) -> Self {
        Self(bits)
    }
}

/// Serialized form of an authored responder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponderDefinition {
    #[serde(default)]
    pub name: String,
    pub states: Vec<ResponderState>,
    #[serde(default)]
    pub flags: ResponderFlags,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub initial_state: u8,
}

fn default_enabled() -> bool {
    true
}

impl ResponderDefinition {
    pub fn from_json(json: &str) -> ResponderResult<Self> {
        let def: ResponderDefinition = serde_json::from_str(json)?;
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> ResponderResult<()> {
        if self.states.is_empty() {
            return Err(ResponderError::invalid("responder has no states"));
        }
        if self.states.len() > u8::MAX as usize {
            return Err(ResponderError::invalid(format!(
                "{} states exceed the stream limit",
                self.states.len()
            )));
        }
        if self.initial_state as usize >= self.states.len() {
            return Err(ResponderError::StateOutOfRange {
                state: self.initial_state as i64,
                count: self.states.len(),
            });
        }
        for (i, state) in self.states.iter().enumerate() {
            state.validate(i, self.states.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_message::{EntityKey, MessageBody};

    fn enable_cmd() -> ResponderCmd {
        ResponderCmd::new(Message::new(MessageBody::Enable { enable: true }).to(EntityKey(3)))
    }

    #[test]
    fn completed_events_track_bits() {
        let mut c = CompletedEvents::default();
        assert!(c.set(0));
        assert!(c.set(127));
        assert!(!c.set(128));
        assert!(c.is_set(127));
        assert_eq!(c.first_missing(3), Some(1));
        c.set(1);
        c.set(2);
        assert_eq!(c.first_missing(3), None);
        c.clear();
        assert_eq!(c.to_bits(), 0);
    }

    #[test]
    fn flags_bits_are_stable() {
        let f = ResponderFlags {
            detect_trigger: true,
            detect_untrigger: false,
            skip_ff_sound: true,
        };
        assert_eq!(f.to_bits(), 0b101);
        assert_eq!(ResponderFlags::from_bits(0b101), f);
    }

    #[test]
    fn validate_rejects_bad_switch_and_map() {
        let mut def = ResponderDefinition {
            name: "gate".into(),
            states: vec![ResponderState {
                cmds: vec![enable_cmd()],
                switch_to_state: 1,
                ..Default::default()
            }],
            flags: ResponderFlags::default(),
            enabled: true,
            initial_state: 0,
        };
        assert!(matches!(
            def.validate(),
            Err(ResponderError::StateOutOfRange { state: 1, count: 1 })
        ));
        def.states[0].switch_to_state = 0;
        def.states[0].wait_to_cmd.insert(0, 4);
        assert!(matches!(
            def.validate(),
            Err(ResponderError::CommandOutOfRange { command: 4, .. })
        ));
    }

    #[test]
    fn validate_rejects_wait_past_callback_count() {
        let mut def = ResponderDefinition {
            name: "gate".into(),
            states: vec![ResponderState {
                cmds: vec![enable_cmd(), enable_cmd().waiting_on(1)],
                num_callbacks: 1,
                wait_to_cmd: BTreeMap::from([(0, 0)]),
                ..Default::default()
            }],
            flags: ResponderFlags::default(),
            enabled: true,
            initial_state: 0,
        };
        assert!(matches!(
            def.validate(),
            Err(ResponderError::WaitOutOfRange { wait: 1, max: 1 })
        ));
        def.states[0].cmds[1].wait_on = Some(0);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn state_stream_keeps_waits() {
        let state = ResponderState {
            cmds: vec![enable_cmd(), enable_cmd().waiting_on(0)],
            num_callbacks: 1,
            switch_to_state: 0,
            wait_to_cmd: BTreeMap::from([(0, 0)]),
        };
        let mut buf = Vec::new();
        state.write(&mut buf).unwrap();
        let back = ResponderState::read(&mut buf.as_slice()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn definition_json_defaults() {
        let def = ResponderDefinition::from_json(
            r#"{ "states": [ { "cmds": [ { "msg": { "body": { "type": "enable", "enable": false } } } ] } ] }"#,
        )
        .unwrap();
        assert!(def.enabled);
        assert_eq!(def.states[0].cmds[0].wait_on, None);
    }
}
