use super::*;
use crate::context::{SCHEDULER, ServiceKey, ServiceRegistry, THREAD_SPAWNER};
use crate::execution::ThreadSpawner;
use crate::graph::Graph;
use crate::time::{ErrorHook, ManualScheduler, SchedulerHooks};
use crate::types::VertexId;
use crate::window::{Window, WindowConfig, WindowPolicy};
use std::time::Instant;

type Seen<T> = Arc<Mutex<Vec<T>>>;

/// A graph wired to a manual scheduler and a real thread spawner.
struct Harness {
    graph: Graph,
    scheduler: Arc<ManualScheduler>,
    services: Arc<ServiceRegistry>,
    faults: Seen<String>,
}

impl Harness {
    fn new() -> Self {
        let harness = Self::without_services();
        let hooks = harness.hooks();
        harness
            .services
            .add(&SCHEDULER, Arc::clone(&harness.scheduler) as Arc<dyn Scheduler>)
            .unwrap();
        harness
            .services
            .add(&THREAD_SPAWNER, Arc::new(ThreadSpawner::new("oplet-test", hooks)))
            .unwrap();
        harness
    }

    fn without_services() -> Self {
        let faults: Seen<String> = Arc::new(Mutex::new(Vec::new()));
        let hook = fault_hook(&faults);
        Self {
            graph: Graph::new(),
            scheduler: Arc::new(ManualScheduler::with_hooks(SchedulerHooks {
                on_error: Some(hook),
                activity: None,
            })),
            services: Arc::new(ServiceRegistry::new()),
            faults,
        }
    }

    fn hooks(&self) -> SchedulerHooks {
        SchedulerHooks {
            on_error: Some(fault_hook(&self.faults)),
            activity: None,
        }
    }

    fn collect<T: Tuple>(&mut self, from: VertexId, port: usize) -> Seen<T> {
        let seen: Seen<T> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            Sink::new(move |t: T| -> Result<()> {
                seen.lock().unwrap().push(t);
                Ok(())
            })
        };
        let sink = self.graph.insert(sink, 1, 0).unwrap();
        self.graph.connect(from, port, sink, 0).unwrap();
        seen
    }

    fn initialize(&self) -> Result<()> {
        for id in self.graph.topo_order() {
            let vertex = self.graph.vertex(id)?;
            let cell = vertex.cell();
            cell.set_fault_hook(fault_hook(&self.faults));
            cell.initialize(ContextParts {
                vertex: id,
                job_id: "job-test".to_string(),
                job_name: "oplets".to_string(),
                services: Arc::clone(&self.services),
                inputs: cell.input_count(),
                outputs: cell.outputs.clone(),
            })?;
        }
        Ok(())
    }

    fn run(&self) {
        self.initialize().unwrap();
        for id in self.graph.topo_order().into_iter().rev() {
            self.graph.vertex(id).unwrap().cell().start().unwrap();
        }
    }

    fn deliver<T: Tuple>(&self, vertex: VertexId, port: usize, tuple: T) {
        self.graph
            .vertex(vertex)
            .unwrap()
            .cell()
            .deliver(port, BoxedValue::new(tuple));
    }

    fn close(&self) {
        for id in self.graph.topo_order() {
            self.graph.vertex(id).unwrap().cell().close().unwrap();
        }
    }

    fn faults(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }
}

fn fault_hook(faults: &Seen<String>) -> ErrorHook {
    let faults = Arc::clone(faults);
    Arc::new(move |err: &anyhow::Error| faults.lock().unwrap().push(format!("{:#}", err)))
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn snapshot<T: Clone>(seen: &Seen<T>) -> Vec<T> {
    seen.lock().unwrap().clone()
}

// --- kind tests ---

#[test]
fn test_kind_shapes() {
    assert!(OpletKind::Source.accepts_shape(0, 1));
    assert!(!OpletKind::Source.accepts_shape(1, 1));
    assert!(OpletKind::Sink.accepts_shape(1, 0));
    assert!(!OpletKind::Sink.accepts_shape(1, 1));
    assert!(OpletKind::Pipe.accepts_shape(1, 1));
    assert!(!OpletKind::Pipe.accepts_shape(1, 2));
    assert!(OpletKind::Split.accepts_shape(1, 4));
    assert!(!OpletKind::Split.accepts_shape(1, 0));
    assert!(OpletKind::Union.accepts_shape(3, 1));
    assert!(!OpletKind::Union.accepts_shape(0, 1));
}

// --- Pipe tests ---

#[test]
fn test_functional_pipes_chain() {
    let mut h = Harness::new();
    let map = h.graph.insert(Pipe::map(|x: i32| x * 10), 1, 1).unwrap();
    let filter = h.graph.insert(Pipe::filter(|x: &i32| *x != 20), 1, 1).unwrap();
    let flat = h
        .graph
        .insert(Pipe::flat_map(|x: i32| vec![x, x + 1]), 1, 1)
        .unwrap();
    h.graph.connect(map, 0, filter, 0).unwrap();
    h.graph.connect(filter, 0, flat, 0).unwrap();
    let seen = h.collect::<i32>(flat, 0);
    h.run();

    for x in 1..=3 {
        h.deliver(map, 0, x);
    }
    assert_eq!(snapshot(&seen), vec![10, 11, 30, 31]);
}

#[test]
fn test_peek_observes_without_changing() {
    let mut h = Harness::new();
    let observed = Arc::new(AtomicU64::new(0));
    let peek = {
        let observed = Arc::clone(&observed);
        Pipe::peek(move |x: &u64| {
            observed.fetch_add(*x, Ordering::SeqCst);
        })
    };
    assert_eq!(peek.kind(), OpletKind::Peek);
    let peek = h.graph.insert(peek, 1, 1).unwrap();
    let seen = h.collect::<u64>(peek, 0);
    h.run();

    h.deliver(peek, 0, 4u64);
    h.deliver(peek, 0, 5u64);
    assert_eq!(snapshot(&seen), vec![4, 5]);
    assert_eq!(observed.load(Ordering::SeqCst), 9);
}

#[test]
fn test_failed_accept_is_reported_and_not_retried() {
    let mut h = Harness::new();
    let parse = h
        .graph
        .insert(
            Pipe::try_map(|s: String| s.parse::<i32>().context("not a number")),
            1,
            1,
        )
        .unwrap();
    let seen = h.collect::<i32>(parse, 0);
    h.run();

    h.deliver(parse, 0, "1".to_string());
    h.deliver(parse, 0, "x".to_string());
    h.deliver(parse, 0, "3".to_string());

    assert_eq!(snapshot(&seen), vec![1, 3]);
    let faults = h.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("not a number"), "{}", faults[0]);
}

#[test]
fn test_panicking_pipe_is_reported() {
    let mut h = Harness::new();
    let pipe = h
        .graph
        .insert(
            Pipe::map(|x: i32| {
                if x == 2 {
                    panic!("bad tuple");
                }
                x
            }),
            1,
            1,
        )
        .unwrap();
    let seen = h.collect::<i32>(pipe, 0);
    h.run();

    h.deliver(pipe, 0, 1);
    h.deliver(pipe, 0, 2);
    h.deliver(pipe, 0, 3);
    assert_eq!(snapshot(&seen), vec![1, 3]);
    assert_eq!(h.faults().len(), 1);
}

// --- Sink tests ---

const SINK_TARGET: ServiceKey<Seen<i32>> = ServiceKey::new("test.sink_target");

#[test]
fn test_deferred_sink_resolves_from_service() {
    let mut h = Harness::new();
    let target: Seen<i32> = Arc::new(Mutex::new(Vec::new()));
    h.services.add(&SINK_TARGET, Arc::clone(&target)).unwrap();

    let sink = Sink::deferred(|ctx: &OpletContext<Infallible>| {
        ctx.service(&SINK_TARGET).map(|seen| {
            Box::new(move |t: i32| -> Result<()> {
                seen.lock().unwrap().push(t);
                Ok(())
            }) as Box<dyn Sinker<i32>>
        })
    });
    let sink = h.graph.insert(sink, 1, 0).unwrap();
    h.run();

    h.deliver(sink, 0, 7);
    assert_eq!(snapshot(&target), vec![7]);
}

#[test]
fn test_unresolved_sink_drops_tuples() {
    let mut h = Harness::new();
    let sink = Sink::<i32>::deferred(|_ctx: &OpletContext<Infallible>| None);
    let sink = h.graph.insert(sink, 1, 0).unwrap();
    h.run();

    h.deliver(sink, 0, 1);
    assert!(h.faults().is_empty());
}

struct Closing {
    seen: Seen<String>,
}

impl Sinker<String> for Closing {
    fn sink(&mut self, tuple: String) -> Result<()> {
        self.seen.lock().unwrap().push(tuple);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.seen.lock().unwrap().push("closed".to_string());
        Ok(())
    }
}

#[test]
fn test_sinker_closed_once() {
    let mut h = Harness::new();
    let seen: Seen<String> = Arc::new(Mutex::new(Vec::new()));
    let sink = h
        .graph
        .insert(Sink::new(Closing { seen: Arc::clone(&seen) }), 1, 0)
        .unwrap();
    h.run();

    h.deliver(sink, 0, "a".to_string());
    h.close();
    h.close();
    h.deliver(sink, 0, "b".to_string());
    assert_eq!(snapshot(&seen), vec!["a", "closed"]);
}

// --- Split / Union tests ---

#[test]
fn test_split_routes_modulo_and_drops_negative() {
    let mut h = Harness::new();
    let split = h
        .graph
        .insert(Split::new(|x: &i32| i64::from(*x)), 1, 3)
        .unwrap();
    let outs: Vec<Seen<i32>> = (0..3).map(|port| h.collect::<i32>(split, port)).collect();
    h.run();

    for x in [0, 1, 2, 3, 4, -1, 5] {
        h.deliver(split, 0, x);
    }
    assert_eq!(snapshot(&outs[0]), vec![0, 3]);
    assert_eq!(snapshot(&outs[1]), vec![1, 4]);
    assert_eq!(snapshot(&outs[2]), vec![2, 5]);
}

#[test]
fn test_union_merges_inputs() {
    let mut h = Harness::new();
    let union = h.graph.insert(Union::<&'static str>::new(), 2, 1).unwrap();
    let seen = h.collect::<&'static str>(union, 0);
    h.run();

    h.deliver(union, 0, "left");
    h.deliver(union, 1, "right");
    h.deliver(union, 0, "left again");
    assert_eq!(snapshot(&seen), vec!["left", "right", "left again"]);
}

// --- Source tests ---

#[test]
fn test_periodic_source_polls_at_fixed_rate() {
    let mut h = Harness::new();
    let mut next = 0;
    let source = PeriodicSource::new(Duration::from_millis(10), move || {
        next += 1;
        Some(next)
    });
    let control = source.control();
    let source = h.graph.insert(source, 0, 1).unwrap();
    let seen = h.collect::<i32>(source, 0);
    h.run();

    // First poll is due immediately.
    h.scheduler.run_pending();
    assert_eq!(snapshot(&seen), vec![1]);
    h.scheduler.advance(Duration::from_millis(30));
    assert_eq!(snapshot(&seen), vec![1, 2, 3, 4]);

    control.set_period(Duration::from_millis(50)).unwrap();
    h.scheduler.advance(Duration::from_millis(49));
    assert_eq!(snapshot(&seen).len(), 4);
    h.scheduler.advance(Duration::from_millis(1));
    assert_eq!(snapshot(&seen).len(), 5);

    h.close();
    h.scheduler.advance(Duration::from_secs(1));
    assert_eq!(snapshot(&seen).len(), 5);
}

#[test]
fn test_periodic_source_skips_none() {
    let mut h = Harness::new();
    let mut calls = 0;
    let source = PeriodicSource::new(Duration::from_millis(1), move || {
        calls += 1;
        (calls % 2 == 0).then_some(calls)
    });
    let source = h.graph.insert(source, 0, 1).unwrap();
    let seen = h.collect::<i32>(source, 0);
    h.run();

    h.scheduler.advance(Duration::from_millis(5));
    assert_eq!(snapshot(&seen), vec![2, 4, 6]);
}

#[test]
fn test_periodic_control_rejects_zero() {
    let source = PeriodicSource::new(Duration::from_millis(10), || Some(1));
    assert!(source.control().set_period(Duration::ZERO).is_err());
    assert_eq!(source.control().period(), Duration::from_millis(10));
}

#[test]
fn test_process_source_runs_on_its_own_thread() {
    let mut h = Harness::new();
    let source = h
        .graph
        .insert(ProcessSource::from_iter(|| vec!["a", "b", "c"]), 0, 1)
        .unwrap();
    let seen = h.collect::<&'static str>(source, 0);
    h.run();

    assert!(wait_for(|| snapshot(&seen).len() == 3));
    assert_eq!(snapshot(&seen), vec!["a", "b", "c"]);
}

#[test]
fn test_process_source_error_is_reported() {
    let mut h = Harness::new();
    let source = h
        .graph
        .insert(
            ProcessSource::new(|out: &Output<i32>, _cancel: &Cancellation| {
                out.submit(1);
                Err(anyhow!("device gone"))
            }),
            0,
            1,
        )
        .unwrap();
    let seen = h.collect::<i32>(source, 0);
    h.run();

    assert!(wait_for(|| !h.faults().is_empty()));
    assert!(h.faults()[0].contains("device gone"));
    assert_eq!(snapshot(&seen), vec![1]);
}

#[test]
fn test_process_source_needs_thread_spawner() {
    let mut h = Harness::without_services();
    let source = h
        .graph
        .insert(ProcessSource::from_iter(|| vec![1]), 0, 1)
        .unwrap();
    h.collect::<i32>(source, 0);

    let err = h.initialize().unwrap_err();
    assert!(format!("{:#}", err).contains("thread spawner"), "{:#}", err);
}

#[test]
fn test_events_source_setup_runs_on_scheduler() {
    let mut h = Harness::new();
    let events = h
        .graph
        .insert(
            Events::new(|out: Output<String>| {
                out.submit("connected".to_string());
                out.submit("reading".to_string());
                Ok(())
            }),
            0,
            1,
        )
        .unwrap();
    let seen = h.collect::<String>(events, 0);
    h.run();

    assert!(snapshot(&seen).is_empty());
    h.scheduler.run_pending();
    assert_eq!(snapshot(&seen), vec!["connected", "reading"]);
}

// --- Isolate / Counter tests ---

#[test]
fn test_isolate_preserves_order() {
    let mut h = Harness::new();
    let isolate = h.graph.insert(Isolate::<u32>::new(), 1, 1).unwrap();
    let seen = h.collect::<u32>(isolate, 0);
    h.run();

    for x in 0..100u32 {
        h.deliver(isolate, 0, x);
    }
    assert!(wait_for(|| snapshot(&seen).len() == 100));
    assert_eq!(snapshot(&seen), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_counter_counts() {
    let mut h = Harness::new();
    let counter = Counter::<char>::new();
    let count = counter.count();
    let counter = h.graph.insert(counter, 1, 1).unwrap();
    let seen = h.collect::<char>(counter, 0);
    h.run();

    for c in "abc".chars() {
        h.deliver(counter, 0, c);
    }
    assert_eq!(count.get(), 3);
    assert_eq!(snapshot(&seen), vec!['a', 'b', 'c']);
}

// --- Aggregate tests ---

#[test]
fn test_aggregate_emits_only_some() {
    let mut h = Harness::new();
    let window = Window::unpartitioned(WindowConfig::new(WindowPolicy::last_count(2), false)).unwrap();
    let aggregate = Aggregate::new(window, |tuples: &[i32], _: &()| {
        (tuples.len() == 2).then(|| tuples.iter().sum::<i32>())
    });
    let aggregate = h.graph.insert(aggregate, 1, 1).unwrap();
    let seen = h.collect::<i32>(aggregate, 0);
    h.run();

    for x in 1..=4 {
        h.deliver(aggregate, 0, x);
    }
    // Processing is queued on the scheduler.
    assert!(snapshot(&seen).is_empty());
    h.scheduler.run_pending();
    assert_eq!(snapshot(&seen), vec![3, 5, 7]);
}

#[test]
fn test_aggregate_time_batch() {
    let mut h = Harness::new();
    let window =
        Window::unpartitioned(WindowConfig::new(WindowPolicy::batch_time(Duration::from_millis(100)), false))
            .unwrap();
    let aggregate = Aggregate::new(window, |tuples: &[i32], _: &()| Some(tuples.to_vec()));
    let aggregate = h.graph.insert(aggregate, 1, 1).unwrap();
    let seen = h.collect::<Vec<i32>>(aggregate, 0);
    h.run();

    h.deliver(aggregate, 0, 1);
    h.deliver(aggregate, 0, 2);
    h.scheduler.advance(Duration::from_millis(99));
    assert!(snapshot(&seen).is_empty());
    h.scheduler.advance(Duration::from_millis(1));
    assert_eq!(snapshot(&seen), vec![vec![1, 2]]);

    h.deliver(aggregate, 0, 3);
    h.scheduler.advance(Duration::from_millis(100));
    h.scheduler.advance(Duration::from_millis(500));
    assert_eq!(snapshot(&seen), vec![vec![1, 2], vec![3]]);
}

#[test]
fn test_time_window_requires_scheduler() {
    let mut h = Harness::without_services();
    let window =
        Window::unpartitioned(WindowConfig::new(WindowPolicy::last_time(Duration::from_secs(1)), false))
            .unwrap();
    let aggregate = Aggregate::new(window, |tuples: &[i32], _: &()| tuples.first().copied());
    let aggregate = h.graph.insert(aggregate, 1, 1).unwrap();
    h.collect::<i32>(aggregate, 0);

    let err = h.initialize().unwrap_err();
    assert!(format!("{:#}", err).contains("requires a scheduler"), "{:#}", err);
}

#[test]
fn test_count_window_requires_scheduler() {
    let mut h = Harness::without_services();
    let window = Window::unpartitioned(WindowConfig::new(WindowPolicy::batch_count(2), false)).unwrap();
    let aggregate = Aggregate::new(window, |tuples: &[i32], _: &()| Some(tuples.len()));
    let aggregate = h.graph.insert(aggregate, 1, 1).unwrap();
    h.collect::<usize>(aggregate, 0);

    let err = h.initialize().unwrap_err();
    assert!(format!("{:#}", err).contains("requires a scheduler"), "{:#}", err);
}

#[test]
fn test_aggregate_close_releases_window() {
    let mut h = Harness::new();
    let window = Window::unpartitioned(WindowConfig::new(WindowPolicy::last_count(3), false)).unwrap();
    let handle = window.clone();
    let aggregate = Aggregate::new(window, |tuples: &[i32], _: &()| tuples.last().copied());
    let aggregate = h.graph.insert(aggregate, 1, 1).unwrap();
    h.collect::<i32>(aggregate, 0);
    h.run();

    h.deliver(aggregate, 0, 1);
    assert_eq!(handle.partition_count(), 1);
    h.close();
    assert_eq!(handle.partition_count(), 0);
    handle.insert(2).unwrap();
    assert_eq!(handle.partition_count(), 0);
}
