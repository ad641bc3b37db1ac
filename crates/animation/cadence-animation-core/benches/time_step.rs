use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use cadence_animation::{AnimationDefinition, BlendManager, Config, TimeConvert};
use cadence_message::{EntityKey, InstanceId};
use cadence_test_fixtures::animations;

fn definition(name: &str) -> AnimationDefinition {
    AnimationDefinition::from_json(&animations::json(name).expect("fixture")).expect("definition")
}

fn bench_time_step(c: &mut Criterion) {
    let def = definition("loop-window");
    c.bench_function("world_to_anim_time looped 60hz", |b| {
        let mut tc = TimeConvert::new(&Config::default());
        tc.init(&def, InstanceId(0), EntityKey(1), 0.0);
        tc.start(0.0);
        let mut world = 0.0;
        b.iter(|| {
            world += 1.0 / 60.0;
            black_box(tc.world_to_anim_time(black_box(world)));
            tc.take_outgoing();
        });
    });

    let door = Arc::new(definition("door-swing"));
    let wave = Arc::new(definition("wave"));
    c.bench_function("blend manager eval two instances", |b| {
        let mut m = BlendManager::new(EntityKey(1), Config::default());
        m.attach_animation_blended(Arc::clone(&door), 0.5, 0, 0.0)
            .expect("attach door");
        m.attach_animation_blended(Arc::clone(&wave), 0.5, 1, 0.0)
            .expect("attach wave");
        let mut frame = 0u64;
        b.iter(|| {
            frame += 1;
            black_box(m.eval(frame as f64 / 60.0, frame, 0));
            m.take_outgoing();
        });
    });
}

criterion_group!(benches, bench_time_step);
criterion_main!(benches);
