use std::sync::Arc;

use approx::assert_abs_diff_eq;

use cadence_animation::{AnimationDefinition, AnimationLibrary, BlendManager, Config, FadeKind, Value};
use cadence_message::{
    AnimCmd, AnimCommand, CallbackEvent, EntityKey, EventCallback, Message, MessageBody,
};
use cadence_test_fixtures::animations;

const MASTER: EntityKey = EntityKey(1);
const MEMBER: EntityKey = EntityKey(2);
const REQUESTER: EntityKey = EntityKey(50);
const AGGREGATOR: EntityKey = EntityKey(60);

fn definition(name: &str) -> Arc<AnimationDefinition> {
    Arc::new(AnimationDefinition::from_json(&animations::json(name).unwrap()).unwrap())
}

fn manager_with(key: EntityKey, anim: &str) -> BlendManager {
    let mut m = BlendManager::new(key, Config::default());
    m.attach_animation_blended(definition(anim), 1.0, 0, 0.0).unwrap();
    m
}

fn play_with_completion(to: EntityKey) -> Message {
    let mut cmd = AnimCommand::new("wave")
        .with(AnimCmd::Continue)
        .with(AnimCmd::AddCallbacks);
    cmd.callbacks.push(Message::callback(
        REQUESTER,
        EventCallback::new(CallbackEvent::Stop, 7),
    ));
    Message::new(MessageBody::AnimCmd(cmd)).to(to)
}

#[test]
fn group_reports_one_completion_after_every_member_stops() {
    let mut master = manager_with(MASTER, "wave");
    master.make_group_master(AGGREGATOR, &[MEMBER]);
    let mut member = manager_with(MEMBER, "wave");
    member.join_group(MASTER);

    assert!(master.receive(&play_with_completion(MASTER), 0.0));
    let fanned = master.take_outgoing();
    assert_eq!(fanned.len(), 1);
    assert_eq!(fanned[0].receivers, vec![MEMBER]);
    assert_eq!(master.aggregator().map(|a| a.pending()), Some(1));

    assert!(member.receive(&fanned[0], 0.0));
    assert!(!member.take_dirty());
    assert!(master.take_dirty());

    // the master's own copy finishes first; the barrier keeps waiting
    master.advance_anims_to_time(2.0);
    assert!(master.take_outgoing().is_empty());

    member.advance_anims_to_time(2.0);
    let replies = member.take_outgoing();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].receivers, vec![AGGREGATOR]);

    assert!(master.receive(&replies[0], 2.0));
    let done = master.take_outgoing();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].receivers, vec![REQUESTER]);
    let cb = done[0].event_callback().unwrap();
    assert_eq!((cb.event, cb.user), (CallbackEvent::Stop, 7));
    assert_eq!(master.aggregator().map(|a| a.pending()), Some(0));
}

#[test]
fn solo_manager_sends_completion_straight_to_requester() {
    let mut m = manager_with(MASTER, "wave");
    assert!(m.receive(&play_with_completion(MASTER), 0.0));
    assert!(m.take_outgoing().is_empty());
    m.advance_anims_to_time(1.5);
    let out = m.take_outgoing();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].receivers, vec![REQUESTER]);
    assert_eq!(out[0].sender, Some(MASTER));
}

#[test]
fn blend_fade_to_zero_detaches_instance() {
    let mut m = manager_with(MASTER, "wave");
    let id = m.find_instance("wave").unwrap().id();
    m.fade(id, 0.0, 2.0, FadeKind::Blend, true).unwrap();

    m.eval(0.0, 1, 0);
    m.eval(0.25, 2, 0);
    assert_abs_diff_eq!(m.find_instance("wave").unwrap().blend(), 0.5, epsilon = 1e-5);

    m.eval(1.0, 3, 0);
    assert!(m.find_instance("wave").is_none());
    assert!(m.instances().is_empty());
}

#[test]
fn immediate_fade_out_detaches_at_once() {
    let mut m = manager_with(MASTER, "wave");
    m.attach_animation_blended(definition("door-swing"), 1.0, 1, 0.0)
        .unwrap();
    let id = m.find_instance("wave").unwrap().id();

    m.fade(id, 0.0, 0.0, FadeKind::Blend, true).unwrap();
    assert!(m.find_instance("wave").is_none());
    assert_eq!(m.instances().len(), 1);

    for frame in 1..=4 {
        m.eval(frame as f64 * 0.25, frame, 0);
    }
    assert_eq!(m.instances().len(), 1);
    assert!(m.fade(id, 1.0, 0.0, FadeKind::Blend, false).is_err());
}

#[test]
fn immediate_fade_without_detach_keeps_instance() {
    let mut m = manager_with(MASTER, "wave");
    let id = m.find_instance("wave").unwrap().id();
    m.fade(id, 0.0, 0.0, FadeKind::Blend, false).unwrap();
    m.eval(0.5, 1, 0);
    let inst = m.find_instance("wave").unwrap();
    assert_eq!(inst.blend(), 0.0);
}

#[test]
fn simple_anim_plays_once_then_detaches() {
    let mut lib = AnimationLibrary::new();
    lib.insert(AnimationDefinition::from_json(&animations::json("wave").unwrap()).unwrap());
    let mut m = BlendManager::new(MASTER, Config::default());

    m.play_simple_anim(&lib, "wave", 0.0).unwrap();
    assert!(m.needs_eval());
    m.eval(0.5, 1, 0);
    assert_eq!(m.value("hinge"), Some(&Value::Scalar(22.5)));

    m.eval(2.0, 2, 0);
    assert!(m.find_instance("wave").is_none());
    assert!(!m.needs_eval());
    assert!(m.take_outgoing().is_empty());
}

#[test]
fn needs_eval_follows_playback() {
    let mut m = manager_with(MASTER, "door-swing");
    assert!(!m.needs_eval());
    let cmd = AnimCommand::new("door-swing").with(AnimCmd::Continue);
    m.receive(&Message::new(MessageBody::AnimCmd(cmd)).to(MASTER), 0.0);
    assert!(m.needs_eval());

    let jump = AnimCommand::new("door-swing").with(AnimCmd::GoToEnd);
    m.receive(&Message::new(MessageBody::AnimCmd(jump)).to(MASTER), 0.1);
    m.eval(5.0, 1, 0);
    assert!(!m.needs_eval());
}
