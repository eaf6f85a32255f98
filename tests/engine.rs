use std::sync::Arc;
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use fleetwatch::{
    Engine, EngineConfig, EngineError, EntityKey, MemoryStore, ModelParams, Reading, RecordSink,
    SignalBounds, summarize,
};

const COOLANT: &str = "Coolant temperature";

fn reading(entity: &str, signal: &str, value: f64, i: i64) -> Reading {
    let t0 = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
    Reading::new(entity, signal, value, t0 + Duration::seconds(i))
}

fn coolant_scenario_engine() -> Engine {
    Engine::new(EngineConfig::with_bounds(
        [(COOLANT, SignalBounds::new(70.0, 105.0))],
        ModelParams {
            tree_count: 1,
            tree_height: 2,
            window_size: 4,
            random_seed: 42,
            feature_range: None,
        },
    ))
    .unwrap()
}

fn coolant_stream(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(88.0, 4.0).unwrap();
    (0..n)
        .map(|i| {
            if i % 97 == 96 {
                140.0
            } else {
                normal.sample(&mut rng)
            }
        })
        .collect()
}

fn scores_for(engine: &Engine, entity: &str, values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            engine
                .process(&reading(entity, COOLANT, *v, i as i64))
                .unwrap()
                .anomaly_score
        })
        .collect()
}

#[test]
fn test_coolant_scenario() {
    let engine = coolant_scenario_engine();
    let values = [90.0, 92.0, 150.0, 91.0];

    let mut records = Vec::new();
    for (i, v) in values.iter().enumerate() {
        records.push(engine.process(&reading("CAR001", COOLANT, *v, i as i64)).unwrap());

        let model = engine
            .registry()
            .get(&EntityKey::new("CAR001", COOLANT))
            .unwrap();
        let rotations = model.lock().ensemble().rotations();
        if i < 3 {
            assert_eq!(rotations, 0, "no rotation before reading {}", i + 1);
        } else {
            assert_eq!(rotations, 1, "exactly one rotation after the 4th reading");
        }
    }

    let alerts: Vec<bool> = records.iter().map(|r| r.static_alert).collect();
    assert_eq!(alerts, vec![false, false, true, false]);
    for r in &records {
        assert!(r.anomaly_score.is_finite());
        assert!((0.0..=1.0).contains(&r.anomaly_score));
    }

    let model = engine
        .registry()
        .get(&EntityKey::new("CAR001", COOLANT))
        .unwrap();
    let model = model.lock();
    assert_eq!(model.ensemble().trees().len(), 1);
    assert_eq!(model.ensemble().trees()[0].root().mass_reference, 4);
    assert_eq!(model.ensemble().trees()[0].root().mass_current, 0);
}

#[test]
fn test_scenario_aggregation() {
    let engine = coolant_scenario_engine();
    let store = MemoryStore::new();

    for (i, v) in [90.0, 92.0, 150.0, 91.0].iter().enumerate() {
        let record = engine.process(&reading("CAR001", COOLANT, *v, i as i64)).unwrap();
        store.append(record);
    }

    let stats = summarize(&store.records(Some("CAR001"), None), COOLANT).unwrap();
    assert_eq!(stats.min, 90.0);
    assert_eq!(stats.max, 150.0);
    assert_eq!(stats.average, 105.75);
    assert_eq!(stats.alert_count, 1);
    assert!(stats.average_anomaly_score.is_some());

    assert!(summarize(&store.records(Some("CAR001"), None), "Fuel trim").is_none());
}

#[test]
fn test_deterministic_scores() {
    let values = coolant_stream(7, 800);

    let a = Engine::new(EngineConfig::default()).unwrap();
    let b = Engine::new(EngineConfig::default()).unwrap();

    let sa = scores_for(&a, "CAR001", &values);
    let sb = scores_for(&b, "CAR001", &values);

    let bits_a: Vec<u64> = sa.iter().map(|s| s.to_bits()).collect();
    let bits_b: Vec<u64> = sb.iter().map(|s| s.to_bits()).collect();
    assert_eq!(bits_a, bits_b);

    // Past the bootstrap window the model produces real scores
    assert!(sa[250..].iter().any(|s| *s > 0.0));
}

#[test]
fn test_key_isolation() {
    let a_values = coolant_stream(1, 600);
    let b_values = coolant_stream(2, 600);

    let alone = Engine::new(EngineConfig::default()).unwrap();
    let expected = scores_for(&alone, "CAR001", &a_values);

    let mixed = Engine::new(EngineConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let (mut ia, mut ib) = (0usize, 0usize);
    let mut observed = Vec::new();

    while ia < a_values.len() || ib < b_values.len() {
        let take_a = ib >= b_values.len() || (ia < a_values.len() && rng.random_bool(0.5));
        if take_a {
            let r = mixed
                .process(&reading("CAR001", COOLANT, a_values[ia], ia as i64))
                .unwrap();
            observed.push(r.anomaly_score);
            ia += 1;
        } else {
            // Same signal on another vehicle, and another signal on the same vehicle
            let entity = if ib % 2 == 0 { "CAR002" } else { "CAR001" };
            let signal = if ib % 2 == 0 { COOLANT } else { "Engine oil temperature" };
            mixed
                .process(&reading(entity, signal, b_values[ib], ib as i64))
                .unwrap();
            ib += 1;
        }
    }

    assert_eq!(observed, expected);
    assert_eq!(mixed.registry().len(), 3);
}

#[test]
fn test_constant_stream_standardizes_to_zero() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let key = EntityKey::new("CAR001", "Battery voltage");

    for i in 0..20 {
        if i >= 2 {
            let model = engine.registry().get(&key).unwrap();
            assert_eq!(model.lock().moments().standardize(13.1), 0.0);
        }
        engine
            .process(&reading("CAR001", "Battery voltage", 13.1, i))
            .unwrap();
    }
}

#[test]
fn test_window_rotation_promotes_masses() {
    let window = 8u64;
    let engine = Engine::new(EngineConfig::with_bounds(
        [(COOLANT, SignalBounds::new(70.0, 105.0))],
        ModelParams {
            tree_count: 3,
            tree_height: 4,
            window_size: window,
            random_seed: 42,
            feature_range: Some([-4.0, 4.0]),
        },
    ))
    .unwrap();
    let key = EntityKey::new("CAR001", COOLANT);
    let values = coolant_stream(11, window as usize);

    for (i, v) in values[..window as usize - 1].iter().enumerate() {
        engine.process(&reading("CAR001", COOLANT, *v, i as i64)).unwrap();
    }
    let before = engine.registry().get(&key).unwrap().lock().clone();
    assert_eq!(before.ensemble().rotations(), 0);

    engine
        .process(&reading("CAR001", COOLANT, values[window as usize - 1], 99))
        .unwrap();
    let model = engine.registry().get(&key).unwrap();
    let after = model.lock();
    assert_eq!(after.ensemble().rotations(), 1);
    assert_eq!(after.ensemble().points_seen_in_window(), 0);

    for (tree, prev) in after.ensemble().trees().iter().zip(before.ensemble().trees()) {
        // The last point adds exactly one unit along one root-to-leaf path
        let mut bumped_per_depth = vec![0; tree.height() as usize + 1];
        for (node, old) in tree.nodes().iter().zip(prev.nodes()) {
            assert_eq!(node.mass_current, 0);
            let diff = node.mass_reference - old.mass_current;
            assert!(diff <= 1);
            bumped_per_depth[node.depth as usize] += diff;
        }
        assert!(bumped_per_depth.iter().all(|&n| n == 1));
        assert_eq!(tree.root().mass_reference, window);
    }
}

#[test]
fn test_scores_bounded_for_random_input() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let signals: Vec<String> = engine.config().allowed_signals.iter().cloned().collect();
    let mut rng = StdRng::seed_from_u64(2024);

    for i in 0..10_000 {
        let signal = &signals[rng.random_range(0..signals.len())];
        let entity = format!("CAR{:03}", rng.random_range(0..4));
        let value = match i % 4 {
            0 => rng.random_range(-1e6..1e6),
            1 => rng.random_range(0.0..200.0),
            2 => 1e300 * if rng.random_bool(0.5) { 1.0 } else { -1.0 },
            _ => 42.0,
        };

        let record = engine.process(&reading(&entity, signal, value, i)).unwrap();
        assert!(record.anomaly_score.is_finite(), "score not finite at {}", i);
        assert!(
            (0.0..=1.0).contains(&record.anomaly_score),
            "score {} out of range at {}",
            record.anomaly_score,
            i
        );
    }
}

#[test]
fn test_unknown_signal_rejected() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let err = engine
        .process(&reading("CAR001", "Unknown Sensor", 3.0, 0))
        .unwrap_err();

    assert!(matches!(err, EngineError::UnsupportedSignal(_)));
    assert!(!engine
        .registry()
        .contains(&EntityKey::new("CAR001", "Unknown Sensor")));
    assert_eq!(engine.registry().stats().creations, 0);
}

#[test]
fn test_concurrent_same_key_counts_every_reading() {
    let engine = Arc::new(Engine::new(EngineConfig::default()).unwrap());
    let threads = 8;
    let per_thread = 500;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let v = 80.0 + ((t * per_thread + i) % 20) as f64;
                    let r = engine
                        .process(&reading("CAR001", COOLANT, v, i as i64))
                        .unwrap();
                    assert!((0.0..=1.0).contains(&r.anomaly_score));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.registry().stats().creations, 1);
    let model = engine
        .registry()
        .get(&EntityKey::new("CAR001", COOLANT))
        .unwrap();
    let model = model.lock();
    let total = (threads * per_thread) as u64;
    assert_eq!(model.observations(), total);

    let window = engine.config().model.window_size;
    assert_eq!(model.ensemble().rotations(), total / window);
    for tree in model.ensemble().trees() {
        assert_eq!(tree.root().mass_current, total % window);
    }
}

#[test]
fn test_parallel_keys_match_sequential_scores() {
    let vehicles = ["CAR001", "CAR002", "CAR003", "CAR004"];
    let streams: Vec<Vec<f64>> = (0..vehicles.len())
        .map(|i| coolant_stream(100 + i as u64, 400))
        .collect();

    let sequential = Engine::new(EngineConfig::default()).unwrap();
    let expected: Vec<Vec<f64>> = vehicles
        .iter()
        .zip(&streams)
        .map(|(v, s)| scores_for(&sequential, v, s))
        .collect();

    let shared = Arc::new(Engine::new(EngineConfig::default()).unwrap());
    let handles: Vec<_> = vehicles
        .iter()
        .zip(streams)
        .map(|(vehicle, stream)| {
            let engine = Arc::clone(&shared);
            let vehicle = vehicle.to_string();
            thread::spawn(move || scores_for(&engine, &vehicle, &stream))
        })
        .collect();

    let observed: Vec<Vec<f64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(observed, expected);
}

#[test]
fn test_constant_start_does_not_blind_the_model() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let key = EntityKey::new("CAR001", "Misfire count");

    for i in 0..250 {
        engine
            .process(&reading("CAR001", "Misfire count", 0.0, i))
            .unwrap();
    }
    {
        let model = engine.registry().get(&key).unwrap();
        assert!(model.lock().ensemble().is_bootstrapping());
    }

    let mut rng = StdRng::seed_from_u64(8);
    let normal = Normal::new(2.0, 1.0).unwrap();
    for i in 0..750 {
        let v: f64 = normal.sample(&mut rng);
        engine
            .process(&reading("CAR001", "Misfire count", v, 250 + i))
            .unwrap();
    }

    let model = engine.registry().get(&key).unwrap();
    let model = model.lock();
    assert!(!model.ensemble().is_bootstrapping());
    assert!(model.ensemble().rotations() >= 1);

    let typical = model.ensemble().score(&[model.moments().standardize(2.0)]);
    let spike = model.ensemble().score(&[model.moments().standardize(500.0)]);
    assert!(spike > typical, "spike {} should exceed typical {}", spike, typical);
}
