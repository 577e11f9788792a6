use super::*;
use crate::context::OpletContext;
use crate::graph::Output;
use crate::oplet::{Oplet, Pipe, ProcessSource, Sink};

const WAIT: Duration = Duration::from_secs(5);

type Log = Arc<Mutex<Vec<String>>>;

/// Forwards tuples and records its lifecycle calls.
struct Lifecycle {
    name: &'static str,
    kind: OpletKind,
    log: Log,
    fail_initialize: bool,
    output: Option<Output<i32>>,
}

impl Lifecycle {
    fn new(name: &'static str, kind: OpletKind, log: &Log) -> Self {
        Self {
            name,
            kind,
            log: Arc::clone(log),
            fail_initialize: false,
            output: None,
        }
    }

    fn record(&self, phase: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", phase, self.name));
    }
}

impl Oplet for Lifecycle {
    type In = i32;
    type Out = i32;

    fn kind(&self) -> OpletKind {
        self.kind
    }

    fn initialize(&mut self, ctx: &OpletContext<i32>) -> Result<()> {
        self.record("initialize");
        if self.fail_initialize {
            bail!("{} refused to initialize", self.name);
        }
        if ctx.output_count() > 0 {
            self.output = Some(ctx.output(0)?);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.record("start");
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: i32) -> Result<()> {
        if let Some(output) = &self.output {
            output.submit(tuple);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

fn lifecycle_graph(log: &Log) -> Graph {
    let mut graph = Graph::new();
    // Inserted out of flow order.
    let sink = graph
        .insert(Lifecycle::new("sink", OpletKind::Sink, log), 1, 0)
        .unwrap();
    let source = graph
        .insert(Lifecycle::new("source", OpletKind::Source, log), 0, 1)
        .unwrap();
    let pipe = graph
        .insert(Lifecycle::new("pipe", OpletKind::Pipe, log), 1, 1)
        .unwrap();
    graph.connect(source, 0, pipe, 0).unwrap();
    graph.connect(pipe, 0, sink, 0).unwrap();
    graph
}

fn submit(provider: &DirectProvider, graph: Graph, config: &JobConfig) -> Arc<DirectJob> {
    provider
        .submit(graph, "test", config)
        .unwrap()
        .wait(WAIT)
        .unwrap()
}

fn close(job: &DirectJob) {
    job.state_change(Action::Close).unwrap();
    assert!(job.wait_for_state(State::Closed, WAIT));
}

/// Poll `f` until it holds or the wait runs out.
fn eventually(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// --- DirectJob lifecycle tests ---

#[test]
fn test_submit_runs_lifecycle_in_order() {
    let log = Log::default();
    let provider = DirectProvider::new();
    let job = submit(&provider, lifecycle_graph(&log), &JobConfig::default());

    assert_eq!(job.current_state(), State::Running);
    assert_eq!(job.next_state(), State::Running);
    assert_eq!(job.health(), Health::Healthy);
    assert_eq!(
        entries(&log),
        vec![
            "initialize:source",
            "initialize:pipe",
            "initialize:sink",
            "start:sink",
            "start:pipe",
            "start:source",
        ]
    );

    close(&job);
    assert_eq!(
        entries(&log)[6..],
        ["close:source", "close:pipe", "close:sink"]
    );
    assert!(job.executable().is_closed());
}

#[test]
fn test_job_name_defaults_to_topology_and_id() {
    let provider = DirectProvider::new();
    let job = submit(&provider, Graph::new(), &JobConfig::default());
    assert!(job.id().starts_with("job-"));
    assert_eq!(job.name(), format!("test_{}", job.id()));

    let named = submit(
        &provider,
        Graph::new(),
        &JobConfig::default().with_job_name("nightly"),
    );
    assert_eq!(named.name(), "nightly");
    assert_ne!(named.id(), job.id());
}

#[test]
fn test_close_twice_is_accepted() {
    let provider = DirectProvider::new();
    let log = Log::default();
    let job = submit(&provider, lifecycle_graph(&log), &JobConfig::default());
    close(&job);
    close(&job);

    let closes = entries(&log)
        .iter()
        .filter(|e| e.starts_with("close:"))
        .count();
    assert_eq!(closes, 3);
}

#[test]
fn test_pause_and_resume_are_unsupported() {
    let provider = DirectProvider::new();
    let job = submit(&provider, Graph::new(), &JobConfig::default());

    assert!(matches!(
        job.state_change(Action::Pause),
        Err(JobError::Unsupported(Action::Pause))
    ));
    assert!(matches!(
        job.state_change(Action::Resume),
        Err(JobError::Unsupported(Action::Resume))
    ));
    assert!(matches!(
        job.state_change(Action::Start),
        Err(JobError::Unreachable { .. })
    ));
    assert_eq!(job.current_state(), State::Running);
}

#[test]
fn test_initialize_failure_marks_job_unhealthy() {
    let log = Log::default();
    let mut graph = Graph::new();
    let mut failing = Lifecycle::new("source", OpletKind::Source, &log);
    failing.fail_initialize = true;
    let source = graph.insert(failing, 0, 1).unwrap();
    let sink = graph
        .insert(Lifecycle::new("sink", OpletKind::Sink, &log), 1, 0)
        .unwrap();
    graph.connect(source, 0, sink, 0).unwrap();

    let provider = DirectProvider::new();
    let job = submit(&provider, graph, &JobConfig::default());

    // The other vertices still run.
    assert_eq!(job.current_state(), State::Running);
    assert!(entries(&log).contains(&"start:sink".to_string()));
    assert_eq!(job.health(), Health::Unhealthy);
    let err = job.last_error().unwrap();
    assert!(err.contains("failed to initialize"), "{}", err);
    assert!(err.contains("source refused"), "{}", err);
}

#[test]
fn test_dropping_job_closes_oplets() {
    let log = Log::default();
    let provider = DirectProvider::new();
    let job = submit(&provider, lifecycle_graph(&log), &JobConfig::default());
    drop(job);

    assert_eq!(
        entries(&log)[6..],
        ["close:source", "close:pipe", "close:sink"]
    );
}

#[test]
fn test_faults_while_closing_leave_job_healthy() {
    let mut graph = Graph::new();
    let source = graph
        .insert(
            ProcessSource::new(|out: &Output<i32>, cancel: &Cancellation| {
                while !cancel.is_cancelled() {
                    out.submit(1);
                    thread::sleep(Duration::from_millis(1));
                }
                bail!("interrupted while reading")
            }),
            0,
            1,
        )
        .unwrap();
    let sink = graph.insert(Sink::<i32>::discard(), 1, 0).unwrap();
    graph.connect(source, 0, sink, 0).unwrap();

    let provider = DirectProvider::new();
    let job = submit(&provider, graph, &JobConfig::default());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(job.health(), Health::Healthy);

    close(&job);
    assert!(job.executable().activity().wait_idle(WAIT));
    assert_eq!(job.health(), Health::Healthy);
    assert_eq!(job.last_error(), None);
}

// --- complete tests ---

#[test]
fn test_complete_returns_when_work_is_done() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut graph = Graph::new();
    let source = graph
        .insert(ProcessSource::from_iter(|| 1..=4), 0, 1)
        .unwrap();
    let sink = {
        let seen = Arc::clone(&seen);
        graph
            .insert(
                Sink::new(move |x: i32| -> Result<()> {
                    seen.lock().unwrap().push(x);
                    Ok(())
                }),
                1,
                0,
            )
            .unwrap()
    };
    graph.connect(source, 0, sink, 0).unwrap();

    let provider = DirectProvider::new();
    let job = submit(&provider, graph, &JobConfig::default());
    job.complete(WAIT).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    assert!(!job.executable().has_active_work());
    close(&job);
}

#[test]
fn test_complete_fails_on_recorded_error() {
    let mut graph = Graph::new();
    let source = graph
        .insert(
            ProcessSource::new(|_out: &Output<i32>, _cancel: &Cancellation| bail!("boom")),
            0,
            1,
        )
        .unwrap();
    let sink = graph.insert(Sink::<i32>::discard(), 1, 0).unwrap();
    graph.connect(source, 0, sink, 0).unwrap();

    let provider = DirectProvider::new();
    let job = submit(&provider, graph, &JobConfig::default());
    match job.complete(WAIT) {
        Err(JobError::Failed(err)) => assert!(err.contains("boom"), "{}", err),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(job.health(), Health::Unhealthy);
    close(&job);
}

#[test]
fn test_complete_on_closed_job() {
    let provider = DirectProvider::new();
    let job = submit(&provider, Graph::new(), &JobConfig::default());
    close(&job);
    job.complete(Duration::ZERO).unwrap();
}

// --- registry tests ---

#[test]
fn test_registry_tracks_job_status() {
    let provider = DirectProvider::new();
    assert!(provider.services().get(&JOB_REGISTRY).is_some());

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        provider
            .job_registry()
            .add_listener(Arc::new(move |event: JobEvent, entry: &JobEntry| {
                events.lock().unwrap().push((event, entry.status.current));
            }));
    }

    let job = submit(&provider, Graph::new(), &JobConfig::default());
    let registry = Arc::clone(provider.job_registry());
    let id = job.id().clone();
    assert!(eventually(|| {
        registry.get(&id).map(|e| e.status.current) == Some(State::Running)
    }));

    close(&job);
    assert!(eventually(|| {
        registry.get(&id).map(|e| e.status.current) == Some(State::Closed)
    }));

    let events = events.lock().unwrap();
    assert_eq!(events[0], (JobEvent::Added, State::Constructed));
    assert!(events[1..].iter().all(|(event, _)| *event == JobEvent::Updated));

    let removed = registry.remove(&id).unwrap();
    assert_eq!(removed.name, job.name());
    assert!(registry.get(&id).is_none());
}

#[test]
fn test_registry_ignores_unknown_updates() {
    let registry = JobRegistry::new();
    registry.update("job-0", JobState::new().snapshot());
    assert!(registry.jobs().is_empty());
    assert!(registry.remove("job-0").is_none());
}

// --- instrumentation tests ---

#[test]
fn test_instrumented_counters() {
    let mut graph = Graph::new();
    let source = graph
        .insert(ProcessSource::from_iter(|| 1..=5), 0, 1)
        .unwrap();
    let evens = graph.insert(Pipe::filter(|x: &i32| x % 2 == 0), 1, 1).unwrap();
    let sink = graph.insert(Sink::<i32>::discard(), 1, 0).unwrap();
    graph.connect(source, 0, evens, 0).unwrap();
    graph.connect(evens, 0, sink, 0).unwrap();

    let config = JobConfig {
        instrument_counters: true,
        ..JobConfig::default()
    };
    let provider = DirectProvider::new();
    let job = submit(&provider, graph, &config);
    job.complete(WAIT).unwrap();

    let count_of = |vertex: VertexId| {
        job.tuple_counts()
            .iter()
            .find(|c| c.vertex == vertex && c.port == 0)
            .map(|c| c.count.get())
    };
    assert_eq!(job.tuple_counts().len(), 2);
    assert_eq!(count_of(source), Some(5));
    assert_eq!(count_of(evens), Some(2));
    assert_eq!(count_of(sink), None);
    close(&job);
}

#[test]
fn test_instrument_skips_unconnected_ports() {
    let mut graph = Graph::new();
    let pipe = graph.insert(Pipe::map(|x: i32| x), 1, 1).unwrap();
    let counts = instrument_counters(&mut graph).unwrap();
    assert!(counts.is_empty());
    assert_eq!(graph.downstream(pipe), vec![]);
}

// --- ThreadSpawner tests ---

#[test]
fn test_spawner_cancels_threads() {
    let activity = Arc::new(ActivityTracker::new());
    let spawner = ThreadSpawner::new(
        "job-test",
        SchedulerHooks {
            on_error: None,
            activity: Some(Arc::clone(&activity)),
        },
    );
    spawner
        .spawn("loop", |cancel| {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(spawner.live_threads(), 1);
    assert_eq!(activity.active(), 1);

    spawner.cancel_all();
    assert!(spawner.is_cancelled());
    assert!(activity.wait_idle(WAIT));
    assert!(spawner.spawn("late", |_| Ok(())).is_err());
}

#[test]
fn test_spawner_reports_errors() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let on_error: ErrorHook = {
        let errors = Arc::clone(&errors);
        Arc::new(move |err: &anyhow::Error| errors.lock().unwrap().push(err.to_string()))
    };
    let activity = Arc::new(ActivityTracker::new());
    let spawner = ThreadSpawner::new(
        "job-test",
        SchedulerHooks {
            on_error: Some(on_error),
            activity: Some(Arc::clone(&activity)),
        },
    );
    spawner.spawn("fails", |_| bail!("no data")).unwrap();
    spawner.spawn("panics", |_| panic!("bad sensor")).unwrap();
    assert!(activity.wait_idle(WAIT));

    let mut errors = errors.lock().unwrap().clone();
    errors.sort();
    assert_eq!(errors, vec!["no data", "task panicked: bad sensor"]);
}

#[test]
fn test_job_ids_are_sequential() {
    let a = next_job_id();
    let b = next_job_id();
    let n = |id: &str| id.trim_start_matches("job-").parse::<u64>().unwrap();
    assert!(a.starts_with("job-"));
    assert!(n(&b) > n(&a));
}
