use approx::assert_abs_diff_eq;

use cadence_animation::{AnimationDefinition, Config, EaseSlot, TimeConvert};
use cadence_message::{CallbackEvent, EntityKey, EventCallback, InstanceId, Message};
use cadence_test_fixtures::animations;

fn definition(name: &str) -> AnimationDefinition {
    AnimationDefinition::from_json(&animations::json(name).unwrap()).unwrap()
}

fn converter(def: &AnimationDefinition) -> TimeConvert {
    let mut tc = TimeConvert::new(&Config::default());
    tc.init(def, InstanceId(0), EntityKey(1), 0.0);
    tc.take_outgoing();
    tc
}

#[test]
fn repeated_query_at_same_world_time_is_stable() {
    let mut tc = converter(&definition("loop-window"));
    tc.start(0.0);
    for world in [0.5, 3.25, 9.0, 27.75] {
        let first = tc.world_to_anim_time(world);
        let second = tc.world_to_anim_time(world);
        assert_eq!(first, second, "world {world}");
    }
}

#[test]
fn looped_time_stays_inside_loop_window() {
    let mut tc = converter(&definition("loop-window"));
    assert!(tc.is_looped());
    tc.start(0.0);
    for world in [2.5, 3.1, 7.9, 8.3, 15.0, 100.7, 1000.25] {
        let t = tc.world_to_anim_time(world);
        assert!((2.0..=8.0).contains(&t), "world {world} gave {t}");
    }
    assert!(!tc.is_stopped());
}

#[test]
fn looped_scenario_wraps_back_into_window() {
    let mut tc = converter(&definition("loop-window"));
    tc.start(0.0);
    let t = tc.world_to_anim_time(9.0);
    assert_abs_diff_eq!(t, 3.0, epsilon = 1e-4);
}

#[test]
fn unlooped_scenario_runs_to_end_and_stops() {
    let mut tc = converter(&definition("loop-window"));
    tc.set_loop(false, 0.0);
    tc.start(0.0);
    assert_abs_diff_eq!(tc.world_to_anim_time(9.0), 9.0, epsilon = 1e-4);
    assert!(!tc.is_stopped());
    assert_eq!(tc.world_to_anim_time(11.0), 10.0);
    assert!(tc.is_stopped());
}

#[test]
fn unlooped_playback_never_leaves_bounds() {
    let mut tc = converter(&AnimationDefinition::new("lever", 0.0, 10.0));
    tc.start(0.0);
    let mut last = 0.0;
    for world in [0.1, 3.0, 7.5, 9.99, 12.0, 20.0, 50.0] {
        let t = tc.world_to_anim_time(world);
        assert!((0.0..=10.0).contains(&t), "world {world} gave {t}");
        assert!(t >= last);
        last = t;
    }
    assert_eq!(last, 10.0);
    assert!(tc.is_stopped());
}

#[test]
fn backwards_playback_stops_at_begin() {
    let mut tc = converter(&AnimationDefinition::new("lever", 0.0, 4.0));
    tc.start(0.0);
    tc.world_to_anim_time(3.0);
    tc.backwards(3.0);
    assert!(tc.is_backwards());
    assert_abs_diff_eq!(tc.world_to_anim_time(4.0), 2.0, epsilon = 1e-4);
    assert_eq!(tc.world_to_anim_time(10.0), 0.0);
    assert!(tc.is_stopped());
}

#[test]
fn ease_in_reaches_target_speed_without_a_jump() {
    let mut tc = converter(&definition("door-swing"));
    tc.start(0.0);
    assert_eq!(tc.current_ease_slot(), EaseSlot::In);
    let curve = *tc.current_ease_curve().unwrap();
    let length = curve.params().length;
    assert_abs_diff_eq!(length, 0.4, epsilon = 1e-5);
    assert_abs_diff_eq!(curve.velocity_given_time(length), tc.speed(), epsilon = 1e-5);
    assert_abs_diff_eq!(curve.velocity_given_time(0.0), 0.0, epsilon = 1e-6);

    // half the ease length is covered at mean speed, the rest at full speed
    assert_abs_diff_eq!(tc.world_to_anim_time(1.0), 0.8, epsilon = 1e-4);
    assert_eq!(tc.current_ease_slot(), EaseSlot::None);
}

fn time_events(tc: &mut TimeConvert) -> usize {
    tc.take_outgoing()
        .iter()
        .filter_map(|m| m.event_callback())
        .filter(|cb| cb.event == CallbackEvent::Time)
        .count()
}

#[test]
fn marker_on_frame_boundary_fires_once_per_crossing() {
    let mut def = AnimationDefinition::new("lever", 0.0, 10.0);
    def.auto_start = true;
    let mut tc = converter(&def);
    tc.add_callback(Message::callback(
        EntityKey(9),
        EventCallback::new(CallbackEvent::Time, 4)
            .at_time(3.0)
            .with_repeats(-1),
    ));

    let mut fired = 0;
    for world in [1.0, 2.0, 3.0, 4.0, 5.0] {
        tc.world_to_anim_time(world);
        fired += time_events(&mut tc);
    }
    assert_eq!(fired, 1);

    // and once more on the way back
    tc.backwards(5.0);
    for world in [6.0, 7.0, 8.0] {
        tc.world_to_anim_time(world);
        fired += time_events(&mut tc);
    }
    assert_eq!(tc.current_anim_time(), 2.0);
    assert_eq!(fired, 2);
}

#[test]
fn stop_eases_out_onto_stop_point() {
    let mut tc = converter(&definition("door-swing"));
    tc.start(0.0);
    assert_abs_diff_eq!(tc.world_to_anim_time(1.0), 0.8, epsilon = 1e-4);

    tc.stop(1.0);
    assert_eq!(tc.current_ease_slot(), EaseSlot::Out);
    assert!(!tc.is_stopped());

    let mid = tc.world_to_anim_time(1.1);
    assert!(!tc.is_stopped());
    assert!(mid > 0.8 && mid < 1.0, "mid-curve position {mid}");

    let end = tc.world_to_anim_time(3.0);
    assert!(tc.is_stopped());
    assert_abs_diff_eq!(end, 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(tc.world_to_anim_time(4.0), end);
}

#[test]
fn past_world_times_map_through_earlier_state() {
    let mut tc = converter(&AnimationDefinition::new("lever", 0.0, 10.0));
    tc.start(0.0);
    assert_eq!(tc.world_to_anim_time(2.0), 2.0);
    tc.set_speed(2.0, 0.0, 2.0);
    assert_abs_diff_eq!(tc.world_to_anim_time(3.0), 4.0, epsilon = 1e-5);

    assert_abs_diff_eq!(tc.world_to_anim_time_no_update(1.0), 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(tc.world_to_anim_time_no_update(2.5), 3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(tc.current_anim_time(), 4.0, epsilon = 1e-5);
}
