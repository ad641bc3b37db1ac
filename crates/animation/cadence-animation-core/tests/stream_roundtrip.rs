use cadence_animation::{
    AnimationDefinition, AnimationError, Config, EaseKind, EaseSlot, TimeConvert,
};
use cadence_message::{CallbackEvent, EntityKey, EventCallback, InstanceId, Message};
use cadence_test_fixtures::animations;

fn converter(name: &str) -> TimeConvert {
    let def = AnimationDefinition::from_json(&animations::json(name).unwrap()).unwrap();
    let mut tc = TimeConvert::new(&Config::default());
    tc.init(&def, InstanceId(0), EntityKey(1), 0.0);
    tc.take_outgoing();
    tc
}

#[test]
fn converter_survives_the_stream() {
    let mut tc = converter("door-swing");
    tc.add_callback(Message::callback(
        EntityKey(9),
        EventCallback::new(CallbackEvent::Time, 3).at_time(1.5),
    ));
    tc.start(0.0);
    tc.world_to_anim_time(1.0);

    let mut buf = Vec::new();
    tc.write(&mut buf).unwrap();
    let mut back = TimeConvert::read(&mut buf.as_slice(), &Config::default()).unwrap();

    assert_eq!((back.begin(), back.end()), (tc.begin(), tc.end()));
    assert_eq!(
        (back.loop_begin(), back.loop_end()),
        (tc.loop_begin(), tc.loop_end())
    );
    assert_eq!(back.speed(), tc.speed());
    assert_eq!(back.current_anim_time(), tc.current_anim_time());
    assert_eq!(back.flags(), tc.flags());
    assert_eq!(back.callbacks(), tc.callbacks());
    assert_eq!(back.stop_points(), &[0.0, 1.0, 2.0]);
    assert_eq!(
        back.ease_curve(EaseSlot::Out).map(|c| c.kind()),
        Some(EaseKind::Spline)
    );
    assert!(!back.take_dirty());
}

#[test]
fn looped_converter_keeps_loop_window() {
    let tc = converter("loop-window");
    let mut buf = Vec::new();
    tc.write(&mut buf).unwrap();
    let back = TimeConvert::read(&mut buf.as_slice(), &Config::default()).unwrap();
    assert!(back.is_looped());
    assert_eq!((back.loop_begin(), back.loop_end()), (2.0, 8.0));
    assert!(back.ease_curve(EaseSlot::In).is_none());
}

#[test]
fn truncated_stream_is_an_error() {
    let tc = converter("wave");
    let mut buf = Vec::new();
    tc.write(&mut buf).unwrap();
    buf.truncate(buf.len() - 3);
    let err = TimeConvert::read(&mut buf.as_slice(), &Config::default()).unwrap_err();
    assert!(matches!(err, AnimationError::Wire(_)), "{err:?}");
}
