//! Integration Tests for the Reactive System
//!
//! These tests verify that wrappers, refs, computed values and effects work
//! together through the public API only.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::{
    Composite, EffectOptions, ReactiveError, Runtime, RuntimeConfig, Slot, Value, ValueKind,
};

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

/// The counter scenario: the first run logs 0, writing the same value is
/// silent, and a new value logs exactly once.
#[test]
fn counter_scenario() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([("count", Value::from(0))]));
    let log = Rc::new(RefCell::new(Vec::new()));

    let _effect = {
        let (state, log) = (state.clone(), log.clone());
        rt.effect(move || {
            let count = state.get("count").unwrap();
            log.borrow_mut().push(count.as_f64().unwrap());
        })
    };

    state.set("count", 0).unwrap();
    state.set("count", 1).unwrap();
    assert_eq!(*log.borrow(), vec![0.0, 1.0]);
}

/// Wrapping is idempotent and identity-stable.
#[test]
fn wrapping_is_identity_stable() {
    let rt = Runtime::new();
    let raw = Composite::object([("a", Value::from(1))]);

    let wrapped = rt.reactive(&raw);
    assert!(rt.reactive(&raw).ptr_eq(&wrapped));
    assert!(rt.reactive(&wrapped).ptr_eq(&wrapped));

    let view = rt.readonly(&wrapped);
    assert!(rt.readonly(&view).ptr_eq(&view));
    assert!(rt.reactive(&view).ptr_eq(&view));
    assert!(Value::from(view.clone()).is_readonly());
    assert!(Value::from(wrapped.clone()).is_reactive());
    assert!(Value::from(wrapped).to_raw().as_composite().unwrap().ptr_eq(&raw));
}

/// A write that does not change the value notifies nobody.
#[test]
fn writes_are_change_gated() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([
        ("nan", Value::from(f64::NAN)),
        ("zero", Value::from(0.0)),
    ]));
    let runs = counter();
    let _effect = {
        let (state, runs) = (state.clone(), runs.clone());
        rt.effect(move || {
            runs.set(runs.get() + 1);
            state.get("nan").unwrap();
            state.get("zero").unwrap();
        })
    };

    state.set("nan", f64::NAN).unwrap();
    state.set("zero", 0.0).unwrap();
    assert_eq!(runs.get(), 1);

    state.set("zero", -0.0).unwrap();
    assert_eq!(runs.get(), 2);
}

/// An effect stops depending on slots its latest run did not read.
#[test]
fn dependencies_are_pruned_between_runs() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([
        ("use_a", Value::from(true)),
        ("a", Value::from("a")),
        ("b", Value::from("b")),
    ]));
    let runs = counter();
    let effect = {
        let (state, runs) = (state.clone(), runs.clone());
        rt.effect(move || {
            runs.set(runs.get() + 1);
            let use_a = state.get("use_a").unwrap().as_bool().unwrap();
            state.get(if use_a { "a" } else { "b" }).unwrap()
        })
    };

    state.set("use_a", false).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(effect.dependency_count(), 2);
    assert_eq!(rt.subscriber_count(&state.raw(), "a"), 0);

    state.set("a", "changed").unwrap();
    assert_eq!(runs.get(), 2);
    state.set("b", "changed").unwrap();
    assert_eq!(runs.get(), 3);
}

/// A computed value evaluates once per change, and only when read.
#[test]
fn computed_values_cache() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([("n", Value::from(2))]));
    let evaluations = counter();
    let squared = {
        let (state, evaluations) = (state.clone(), evaluations.clone());
        rt.computed(move || {
            evaluations.set(evaluations.get() + 1);
            let n = state.get("n").unwrap().as_f64().unwrap();
            n * n
        })
    };

    assert_eq!(squared.get(), 4.0);
    assert_eq!(squared.get(), 4.0);
    assert_eq!(evaluations.get(), 1);

    state.set("n", 3).unwrap();
    state.set("n", 4).unwrap();
    assert_eq!(evaluations.get(), 1);
    assert_eq!(squared.get(), 16.0);
    assert_eq!(evaluations.get(), 2);
}

/// Several writes before a flush run a scheduled effect once.
#[test]
fn scheduled_effects_coalesce() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([("n", Value::from(0))]));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let queue = rt.clone();
    let _effect = {
        let (state, seen) = (state.clone(), seen.clone());
        rt.effect_with(
            move || seen.borrow_mut().push(state.get("n").unwrap()),
            EffectOptions::new().scheduler(move |job| queue.queue_job(job.clone())),
        )
    };

    for n in 1..=5 {
        state.set("n", n).unwrap();
    }
    assert_eq!(seen.borrow().len(), 1);
    assert!(rt.flush_pending());
    assert_eq!(*seen.borrow(), vec![Value::from(0), Value::from(5)]);
}

/// Scheduled effects flush in creation order, whatever order they were
/// triggered in.
#[test]
fn scheduled_effects_run_in_creation_order() {
    let rt = Runtime::new();
    let first = rt.create_ref(0);
    let second = rt.create_ref(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let make = |name: &'static str, source: &trellis_core::Ref<i32>| {
        let (source, order, queue) = (source.clone(), order.clone(), rt.clone());
        rt.effect_with(
            move || {
                source.get();
                order.borrow_mut().push(name);
            },
            EffectOptions::new().scheduler(move |job| queue.queue_job(job.clone())),
        )
    };
    let _a = make("a", &first);
    let _b = make("b", &second);
    order.borrow_mut().clear();

    second.set(1);
    first.set(1);
    rt.flush_pending();
    assert_eq!(*order.borrow(), vec!["a", "b"]);
}

/// A stopped effect leaves every subscriber set and never re-runs.
#[test]
fn stopped_effects_stay_stopped() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([("n", Value::from(0))]));
    let runs = counter();
    let effect = {
        let (state, runs) = (state.clone(), runs.clone());
        rt.effect(move || {
            runs.set(runs.get() + 1);
            state.get("n").unwrap();
        })
    };

    effect.stop();
    assert_eq!(rt.dep_count(), 0);
    state.set("n", 1).unwrap();
    assert_eq!(runs.get(), 1);
}

/// Values flow between refs, wrappers and the dynamic value model.
#[test]
fn refs_hold_reactive_composites() {
    let rt = Runtime::new();
    let list = rt.create_ref(Value::array([Value::from(1), Value::from(2)]));
    let total = {
        let list = list.clone();
        rt.computed(move || {
            let items = list.get();
            let items = items.as_reactive().unwrap();
            (0..items.len())
                .map(|index| items.get(index).unwrap().as_f64().unwrap())
                .sum::<f64>()
        })
    };
    assert_eq!(total.get(), 3.0);

    let items = list.get_untracked();
    assert_eq!(items.kind(), ValueKind::Wrapper);
    items.as_reactive().unwrap().push(4).unwrap();
    assert_eq!(total.get(), 7.0);

    list.set(Value::array([Value::from(10)]));
    assert_eq!(total.get(), 10.0);
}

/// Enumeration re-runs when keys are added or removed, not on overwrites.
#[test]
fn enumeration_tracks_shape() {
    let rt = Runtime::new();
    let state = rt.reactive(&Composite::object([("a", Value::from(1))]));
    let snapshots = Rc::new(RefCell::new(Vec::new()));
    let _effect = {
        let (state, snapshots) = (state.clone(), snapshots.clone());
        rt.effect(move || {
            let keys: Vec<String> = state.keys().iter().map(Slot::to_string).collect();
            snapshots.borrow_mut().push(keys.join(","));
        })
    };

    state.set("a", 2).unwrap();
    state.set("b", 3).unwrap();
    state.remove("a").unwrap();
    assert_eq!(*snapshots.borrow(), vec!["a", "a,b", "b"]);
}

/// Errors inside effects are reported and isolated; with panic catching
/// turned off they propagate.
#[test]
fn effect_panics_are_reported() {
    let rt = Runtime::with_config(RuntimeConfig::default());
    let errors = Rc::new(RefCell::new(Vec::new()));
    {
        let errors = errors.clone();
        rt.set_error_handler(move |err| {
            if let ReactiveError::EffectPanicked { message, .. } = err {
                errors.borrow_mut().push(message.clone());
            }
        });
    }
    let state = rt.reactive(&Composite::object([("n", Value::from(0))]));
    let _effect = {
        let state = state.clone();
        rt.effect(move || {
            if state.get("n").unwrap() == Value::from(1) {
                panic!("n must not be 1");
            }
        })
    };

    state.set("n", 1).unwrap();
    assert_eq!(*errors.borrow(), vec!["n must not be 1".to_string()]);
    assert!(rt.current_effect().is_none());
}

/// Independent runtimes never observe each other.
#[test]
fn runtimes_are_isolated() {
    let left = Runtime::new();
    let right = Runtime::new();
    let raw = Composite::object([("n", Value::from(0))]);
    let runs = counter();

    let _effect = {
        let (state, runs) = (left.reactive(&raw), runs.clone());
        left.effect(move || {
            runs.set(runs.get() + 1);
            state.get("n").unwrap();
        })
    };

    right.reactive(&raw).set("n", 1).unwrap();
    assert_eq!(runs.get(), 1);
    left.reactive(&raw).set("n", 2).unwrap();
    assert_eq!(runs.get(), 2);
}
