//! Translation of commands into their fast-forward form.
//!
//! Play-style commands become "jump to the resting position" commands with
//! their completion callbacks stripped. Structural commands pass through and
//! everything with one-time side effects is dropped.

use tracing::debug;

use cadence_message::{AnimCmd, AnimCommand, Message, MessageBody, SoundCmd, SoundCommand};

fn fast_forward_anim(cmd: &AnimCommand) -> AnimCommand {
    let mut ff = AnimCommand {
        callbacks: Vec::new(),
        ..cmd.clone()
    };
    ff.set_cmd(AnimCmd::AddCallbacks, false);
    if ff.cmd(AnimCmd::Continue) {
        ff.set_cmd(AnimCmd::Continue, false);
        ff.set_cmd(AnimCmd::FastForward, true);
    }
    ff
}

fn fast_forward_sound(cmd: &SoundCommand) -> SoundCommand {
    let mut ff = SoundCommand {
        callbacks: Vec::new(),
        ..cmd.clone()
    };
    ff.set_cmd(SoundCmd::AddCallbacks, false);
    if ff.cmd(SoundCmd::Play) {
        ff.set_cmd(SoundCmd::Play, false);
        ff.set_cmd(SoundCmd::FastForwardPlay, true);
    } else if ff.cmd(SoundCmd::ToggleState) {
        ff.set_cmd(SoundCmd::ToggleState, false);
        ff.set_cmd(SoundCmd::FastForwardToggle, true);
    }
    ff
}

/// The message to send in place of `msg` when fast-forwarding, or `None`
/// when it must not be sent at all.
pub fn fast_forward_msg(msg: &Message, skip_sound: bool) -> Option<Message> {
    match &msg.body {
        MessageBody::AnimCmd(cmd) => {
            if cmd.cmd(AnimCmd::Continue) || cmd.cmd(AnimCmd::AddCallbacks) {
                debug!(target: "cadence::responder", anim = %cmd.anim_name, "FF animation play");
                Some(Message {
                    body: MessageBody::AnimCmd(fast_forward_anim(cmd)),
                    ..msg.clone()
                })
            } else {
                debug!(target: "cadence::responder", anim = %cmd.anim_name, "FF animation non-play");
                Some(msg.clone())
            }
        }
        MessageBody::Sound(cmd) => {
            if skip_sound {
                return None;
            }
            if cmd.cmd(SoundCmd::Play)
                || cmd.cmd(SoundCmd::ToggleState)
                || cmd.cmd(SoundCmd::AddCallbacks)
            {
                debug!(target: "cadence::responder", index = cmd.index, "FF sound play/toggle");
                Some(Message {
                    body: MessageBody::Sound(fast_forward_sound(cmd)),
                    ..msg.clone()
                })
            } else {
                debug!(target: "cadence::responder", index = cmd.index, "FF sound non-play");
                Some(msg.clone())
            }
        }
        MessageBody::ExcludeRegion { .. }
        | MessageBody::Enable { .. }
        | MessageBody::ResponderEnable { .. }
        | MessageBody::SimSuppress { .. }
        | MessageBody::SubWorld { .. } => {
            debug!(target: "cadence::responder", kind = msg.body.name(), "FF pass-through");
            Some(msg.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_message::{CallbackEvent, EntityKey, EventCallback};

    fn with_callback(mut cmd: AnimCommand) -> Message {
        cmd.callbacks
            .push(Message::callback(EntityKey(1), EventCallback::new(CallbackEvent::Stop, 0)));
        Message::new(MessageBody::AnimCmd(cmd)).to(EntityKey(7))
    }

    #[test]
    fn anim_continue_becomes_fast_forward() {
        let msg = with_callback(
            AnimCommand::new("door")
                .with(AnimCmd::Continue)
                .with(AnimCmd::AddCallbacks),
        );
        let ff = fast_forward_msg(&msg, false).unwrap();
        let MessageBody::AnimCmd(cmd) = &ff.body else {
            panic!("expected anim cmd");
        };
        assert!(cmd.cmd(AnimCmd::FastForward));
        assert!(!cmd.cmd(AnimCmd::Continue));
        assert!(!cmd.cmd(AnimCmd::AddCallbacks));
        assert!(cmd.callbacks.is_empty());
        assert_eq!(cmd.anim_name, "door");
        assert_eq!(ff.receivers, vec![EntityKey(7)]);
    }

    #[test]
    fn anim_non_play_passes_unchanged() {
        let msg = Message::new(MessageBody::AnimCmd(
            AnimCommand::new("door").with(AnimCmd::GoToEnd),
        ));
        assert_eq!(fast_forward_msg(&msg, false), Some(msg));
    }

    #[test]
    fn sound_play_and_toggle_translate() {
        let mut play = SoundCommand::default();
        play.set_cmd(SoundCmd::Play, true);
        let msg = Message::new(MessageBody::Sound(play));
        let MessageBody::Sound(ff) = fast_forward_msg(&msg, false).unwrap().body else {
            panic!("expected sound");
        };
        assert!(ff.cmd(SoundCmd::FastForwardPlay) && !ff.cmd(SoundCmd::Play));

        let mut toggle = SoundCommand::default();
        toggle.set_cmd(SoundCmd::ToggleState, true);
        let msg = Message::new(MessageBody::Sound(toggle));
        let MessageBody::Sound(ff) = fast_forward_msg(&msg, false).unwrap().body else {
            panic!("expected sound");
        };
        assert!(ff.cmd(SoundCmd::FastForwardToggle));
        assert_eq!(fast_forward_msg(&msg, true), None);
    }

    #[test]
    fn one_time_effects_are_dropped() {
        let cam = Message::new(MessageBody::Camera { cmd: "pan".into() });
        assert_eq!(fast_forward_msg(&cam, false), None);
        let sim = Message::new(MessageBody::SimSuppress { suppress: true });
        assert!(fast_forward_msg(&sim, false).is_some());
    }
}
