use std::sync::Arc;

use approx::assert_abs_diff_eq;

use cadence_animation::{AnimationDefinition, BlendManager, Config, TimeConvert};
use cadence_message::{AnimCmd, EntityKey, InstanceId, Message, MessageBody, NotifyMsg};
use cadence_responder::{Responder, ResponderConfig, ResponderError};
use cadence_sync::{StateRecord, StateSynchronizer, SyncConfig, SyncError, SyncValue};
use cadence_test_fixtures::{animations, responders};

const ME: EntityKey = EntityKey(100);

fn definition(name: &str) -> AnimationDefinition {
    AnimationDefinition::from_json(&animations::json(name).unwrap()).unwrap()
}

fn responder(name: &str) -> Responder {
    Responder::from_json(ME, &responders::json(name).unwrap(), ResponderConfig::default()).unwrap()
}

fn converter(def: &AnimationDefinition) -> TimeConvert {
    let mut tc = TimeConvert::new(&Config::default());
    tc.init(def, InstanceId(0), EntityKey(1), 0.0);
    tc
}

fn triggered(name: &str) -> Responder {
    let mut r = responder(name);
    let mut out = Vec::new();
    let notify = Message::new(MessageBody::Notify(NotifyMsg::activate(1.0))).from(EntityKey(5));
    r.receive(&notify, &mut out);
    r
}

#[test]
fn time_convert_resumes_with_elapsed_replay() {
    let def = definition("loop-window");
    let mut src = converter(&def);
    src.start(0.0);
    src.world_to_anim_time(1.0);

    let mut sync = StateSynchronizer::new(SyncConfig::default());
    let rec = sync.capture(&src);
    assert_eq!(rec.name(), "time_convert");

    let mut dst = converter(&def);
    assert!(dst.is_stopped());
    let mut out: Vec<Message> = Vec::new();
    sync.apply(&mut dst, &rec, 3.0, &mut out).unwrap();
    assert!(!dst.is_stopped());
    assert_abs_diff_eq!(dst.current_anim_time(), 3.0, epsilon = 1e-4);
    assert!(!dst.take_dirty());
}

#[test]
fn time_record_survives_json() {
    let def = definition("loop-window");
    let mut src = converter(&def);
    src.start(0.0);
    let sync = StateSynchronizer::default();
    let rec = sync.capture(&src);
    let back = StateRecord::from_json(&rec.to_json().unwrap()).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn blend_manager_applies_per_instance_state() {
    let wave = Arc::new(definition("wave"));
    let mut src = BlendManager::new(EntityKey(1), Config::default());
    src.attach_animation_blended(Arc::clone(&wave), 0.5, 0, 0.0).unwrap();

    let mut dst = BlendManager::new(EntityKey(2), Config::default());
    dst.attach_animation_blended(Arc::clone(&wave), 1.0, 0, 0.0).unwrap();
    dst.find_instance_mut("wave").unwrap().time_mut().stop(0.0);

    let mut sync = StateSynchronizer::default();
    let rec = sync.capture(&src);
    let mut out: Vec<Message> = Vec::new();
    sync.apply(&mut dst, &rec, 0.5, &mut out).unwrap();

    let inst = dst.find_instance("wave").unwrap();
    assert_eq!(inst.blend(), 0.5);
    assert!(!inst.time().is_stopped());
    assert_abs_diff_eq!(inst.time().current_anim_time(), 0.5, epsilon = 1e-4);
    assert!(dst.needs_eval());
}

#[test]
fn unknown_instances_are_skipped() {
    let mut rec = StateRecord::new("blend_manager");
    rec.set("instances", SyncValue::List(vec![]));
    let mut dst = BlendManager::new(EntityKey(2), Config::default());
    let mut sync = StateSynchronizer::default();
    let mut out: Vec<Message> = Vec::new();
    sync.apply(&mut dst, &rec, 0.0, &mut out).unwrap();

    let wave = Arc::new(definition("wave"));
    let mut src = BlendManager::new(EntityKey(1), Config::default());
    src.attach_animation_blended(wave, 1.0, 0, 0.0).unwrap();
    let rec = sync.capture(&src);
    sync.apply(&mut dst, &rec, 0.0, &mut out).unwrap();
    assert!(dst.instances().is_empty());
    assert_eq!(sync.rejections(), 0);
}

#[test]
fn late_joiner_rearms_pending_callbacks() {
    let src = triggered("wait-chain");
    let mut sync = StateSynchronizer::new(SyncConfig::default());
    sync.set_join_order(3);
    let rec = sync.capture(&src);

    let mut dst = responder("wait-chain");
    let mut out: Vec<Message> = Vec::new();
    sync.apply(&mut dst, &rec, 0.0, &mut out).unwrap();
    assert_eq!(dst.cur_command(), Some(2));
    assert_eq!(out.len(), 1);
    let MessageBody::AnimCmd(cmd) = &out[0].body else {
        panic!("expected re-armed anim callbacks");
    };
    assert!(cmd.cmd(AnimCmd::AddCallbacks));
    assert!(!cmd.cmd(AnimCmd::Continue));
}

#[test]
fn first_joiner_fast_forwards() {
    let src = triggered("wait-chain");
    let mut sync = StateSynchronizer::default();
    let rec = sync.capture(&src);

    let mut dst = responder("wait-chain");
    let mut out: Vec<Message> = Vec::new();
    sync.apply(&mut dst, &rec, 0.0, &mut out).unwrap();
    assert!(!dst.is_running());
    assert_eq!(out.len(), 2);
    assert!(dst.take_dirty());
}

#[test]
fn rejected_records_leave_state_and_count() {
    let src = triggered("wait-chain");
    let mut sync = StateSynchronizer::new(SyncConfig {
        max_rejections_before_warn: 2,
        ..SyncConfig::default()
    });
    let mut rec = sync.capture(&src);
    rec.set("cur_state", SyncValue::Int(9));

    let mut dst = responder("wait-chain");
    let mut out: Vec<Message> = Vec::new();
    let err = sync.apply(&mut dst, &rec, 0.0, &mut out).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Responder(ResponderError::StateOutOfRange { state: 9, .. })
    ));
    assert_eq!(dst.cur_command(), None);
    assert!(out.is_empty());

    let wrong = StateRecord::new("time_convert");
    assert!(sync.apply(&mut dst, &wrong, 0.0, &mut out).is_err());
    assert!(sync.apply_json(&mut dst, "not json", 0.0, &mut out).is_err());
    assert_eq!(sync.rejections(), 3);
}
