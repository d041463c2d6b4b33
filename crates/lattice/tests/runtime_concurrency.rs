//! Lazy memoization under concurrent access.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use lattice::{
    GraphBuilder, InstantiationMode, Key, Producer, Registration, ResolveError, ServiceGraph,
};

fn key<T: Send + Sync + 'static>() -> Key {
    Key::of::<T>().expect("key")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
struct Cache {
    generation: usize,
}

#[test]
fn concurrent_first_access_constructs_exactly_once() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_producer = calls.clone();

    let graph = GraphBuilder::new()
        .register(Registration::factory(
            key::<Cache>(),
            InstantiationMode::Lazy,
            vec![],
            Producer::new(move |_| {
                // Widen the race window so waiters really block.
                thread::sleep(Duration::from_millis(20));
                let generation = calls_in_producer.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Cache { generation }) as Arc<dyn Any + Send + Sync>)
            }),
        ))
        .build()
        .expect("graph");

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let graph = graph.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                graph.require::<Cache>(&key::<Cache>()).expect("cache")
            })
        })
        .collect();

    let values: Vec<Arc<Cache>> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for value in &values[1..] {
        assert!(Arc::ptr_eq(&values[0], value));
    }
    assert_eq!(values[0].generation, 0);
}

#[test]
fn failed_construction_is_replayed_to_every_caller() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_producer = calls.clone();

    let graph = GraphBuilder::new()
        .register(Registration::factory(
            key::<Cache>(),
            InstantiationMode::Lazy,
            vec![],
            Producer::new(move |_| {
                thread::sleep(Duration::from_millis(20));
                calls_in_producer.fetch_add(1, Ordering::SeqCst);
                Err("warmup timed out".into())
            }),
        ))
        .build()
        .expect("graph");

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let graph = graph.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                graph
                    .require::<Cache>(&key::<Cache>())
                    .expect_err("construction fails")
                    .to_string()
            })
        })
        .collect();

    for handle in handles {
        let message = handle.join().expect("thread");
        assert!(message.contains("warmup timed out"), "got: {message}");
    }

    // The failure is terminal: later callers see the same error without a
    // second producer invocation.
    let late = graph
        .require::<Cache>(&key::<Cache>())
        .expect_err("still failed");
    assert!(late.to_string().contains("warmup timed out"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn re_entrant_construction_is_a_cycle_not_a_deadlock() {
    init_tracing();
    static HANDLE: OnceLock<Weak<ServiceGraph>> = OnceLock::new();

    let graph = GraphBuilder::new()
        .register(Registration::factory(
            key::<Cache>(),
            InstantiationMode::Lazy,
            vec![],
            Producer::new(|_| {
                let graph = HANDLE
                    .get()
                    .and_then(Weak::upgrade)
                    .expect("graph installed before first access");
                // Dynamic self-request through the public API.
                let value = graph.require::<Cache>(&key::<Cache>())?;
                Ok(value as Arc<dyn Any + Send + Sync>)
            }),
        ))
        .build()
        .expect("graph");

    HANDLE
        .set(Arc::downgrade(&graph))
        .expect("handle set once");

    let err = graph
        .require::<Cache>(&key::<Cache>())
        .expect_err("self-request fails");
    let ResolveError::Construction(construction) = err else {
        panic!("expected construction failure, got {err:?}");
    };
    assert!(construction.to_string().contains("requested itself"));
}

#[test]
fn prototypes_are_distinct_across_threads() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_producer = calls.clone();

    let graph = GraphBuilder::new()
        .register(Registration::factory(
            key::<Cache>(),
            InstantiationMode::Prototype,
            vec![],
            Producer::new(move |_| {
                let generation = calls_in_producer.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Cache { generation }) as Arc<dyn Any + Send + Sync>)
            }),
        ))
        .build()
        .expect("graph");

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let graph = graph.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                graph.require::<Cache>(&key::<Cache>()).expect("cache")
            })
        })
        .collect();

    let mut generations: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().expect("thread").generation)
        .collect();
    generations.sort_unstable();
    generations.dedup();

    assert_eq!(calls.load(Ordering::SeqCst), threads);
    assert_eq!(generations.len(), threads);
}
