//! The runloop: a single-threaded cooperative scheduler.
//!
//! Every component in the runtime (the app, each engine) owns exactly one
//! runloop, and the runloop's dedicated worker thread is the *only*
//! legitimate executor of that component's logic. Concurrency between
//! components is message passing: any thread may submit work with
//! [`RunloopHandle::post_task`], and the worker runs submissions to
//! completion, one at a time, in per-producer FIFO order.
//!
//! ```text
//! producer threads                 worker thread
//! ──────────────────┐
//!  post_task(..)  ──┤   bounded    ┌──────────────────────────┐
//!  post_task(..)  ──┼──► MPSC ───► │ drain batch → run tasks  │
//!  post_delayed(..)─┤   queue      │ fire due timers          │
//! ──────────────────┘              │ poll work source         │
//!                                  │ idle: spin→yield→park    │
//!                                  └──────────────────────────┘
//! ```
//!
//! `post_task` never blocks: it either enqueues in O(1) or returns
//! `false` (queue full, loop not running, or shutting down). `false` is a
//! delivery failure the caller must handle — the task has been dropped.
//!
//! [`Runloop::shutdown`] is the one deliberately blocking operation: it
//! stops intake, lets the worker drain and *run* everything still queued
//! (pending effects are not silently lost), then joins the worker with a
//! bounded timeout.

mod backoff;

pub use backoff::{IdleStrategy, Step};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default task queue capacity (rounded up to a power of two at build).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of tasks drained per loop iteration.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// How long `shutdown` waits for the worker to finish draining.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A unit of work executed on the worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An external work source polled once per loop iteration.
///
/// The reported work count feeds the idle strategy: a source that did
/// nothing lets the loop back off toward a timed park, a busy source
/// keeps it hot.
pub trait WorkSource: Send {
    /// Performs one polling step and returns how much work was done.
    fn poll_once(&mut self) -> usize;
}

enum Control {
    Shutdown,
    Timer { fire_at: Instant, task: Task },
}

struct Shared {
    name: String,
    running: AtomicBool,
    shutting_down: AtomicBool,
    worker: parking_lot::Mutex<Option<ThreadId>>,
}

thread_local! {
    static CURRENT: RefCell<Option<RunloopHandle>> = const { RefCell::new(None) };
}

/// Builder for a [`Runloop`].
pub struct RunloopBuilder {
    name: String,
    capacity: usize,
    batch: usize,
    work_source: Option<Box<dyn WorkSource>>,
}

impl RunloopBuilder {
    /// Queue capacity; rounded up to the next power of two.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Tasks drained per iteration.
    #[must_use]
    pub fn batch_size(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Attaches a work source polled once per iteration.
    #[must_use]
    pub fn work_source(mut self, source: Box<dyn WorkSource>) -> Self {
        self.work_source = Some(source);
        self
    }

    /// Spawns the dedicated worker thread and starts the loop.
    pub fn spawn(self) -> Result<Runloop, crate::RuntimeError> {
        let capacity = self.capacity.next_power_of_two();
        let (task_tx, task_rx) = bounded::<Task>(capacity);
        let (control_tx, control_rx) = bounded::<Control>(capacity);
        let (done_tx, done_rx) = bounded::<()>(1);

        let shared = Arc::new(Shared {
            name: self.name.clone(),
            running: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            worker: parking_lot::Mutex::new(None),
        });

        let handle = RunloopHandle {
            tasks: task_tx,
            control: control_tx,
            shared: Arc::clone(&shared),
        };

        let worker_handle = handle.clone();
        let batch = self.batch;
        let work_source = self.work_source;
        let join = thread::Builder::new()
            .name(format!("weft-loop-{}", self.name))
            .spawn(move || {
                *worker_handle.shared.worker.lock() = Some(thread::current().id());
                CURRENT.with(|c| *c.borrow_mut() = Some(worker_handle.clone()));

                let body = catch_unwind(AssertUnwindSafe(|| {
                    run_worker(&worker_handle, &task_rx, &control_rx, batch, work_source);
                }));
                if body.is_err() {
                    // A panic escaping the loop itself (not a task) is fatal
                    // for the component; tasks still queued are lost.
                    error!(
                        runloop = %worker_handle.shared.name,
                        "runloop worker died from an uncaught panic"
                    );
                }

                CURRENT.with(|c| *c.borrow_mut() = None);
                worker_handle.shared.running.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .map_err(|e| crate::RuntimeError::SpawnFailed(e.to_string()))?;

        Ok(Runloop {
            handle,
            join: Some(join),
            done_rx,
        })
    }
}

/// Owner side of a runloop: holds the worker thread and the right to shut
/// it down. Cheap submission handles are obtained via [`Runloop::handle`].
pub struct Runloop {
    handle: RunloopHandle,
    join: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Runloop {
    /// Starts building a runloop with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RunloopBuilder {
        RunloopBuilder {
            name: name.into(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            batch: DEFAULT_BATCH_SIZE,
            work_source: None,
        }
    }

    /// Spawns a runloop with default settings.
    pub fn spawn(name: impl Into<String>) -> Result<Self, crate::RuntimeError> {
        Self::builder(name).spawn()
    }

    /// Returns a cheap, cloneable submission handle.
    #[must_use]
    pub fn handle(&self) -> RunloopHandle {
        self.handle.clone()
    }

    /// The handle of the runloop whose worker thread is the caller, if
    /// the calling thread is a runloop worker at all.
    #[must_use]
    pub fn current() -> Option<RunloopHandle> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Stops the loop: rejects new submissions immediately, runs every
    /// task still queued at this instant to completion, then joins the
    /// worker with a bounded timeout (logging if it fails to terminate).
    pub fn shutdown(mut self) {
        self.handle.shared.shutting_down.store(true, Ordering::SeqCst);
        // Wake the worker if it is parked; a full control queue is fine,
        // the park timeout bounds the latency either way.
        let _ = self.handle.control.try_send(Control::Shutdown);

        match self.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
                debug!(runloop = %self.handle.shared.name, "runloop shut down");
            }
            Err(_) => {
                error!(
                    runloop = %self.handle.shared.name,
                    "runloop worker did not terminate within {:?}",
                    JOIN_TIMEOUT
                );
            }
        }
    }
}

/// Cloneable submission handle to a runloop.
pub struct RunloopHandle {
    tasks: Sender<Task>,
    control: Sender<Control>,
    shared: Arc<Shared>,
}

impl Clone for RunloopHandle {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            control: self.control.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for RunloopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunloopHandle")
            .field("name", &self.shared.name)
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RunloopHandle {
    /// The loop's name, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueues a task for the worker thread.
    ///
    /// Returns `false` — and drops the task — when the queue is full, the
    /// loop is not running, or shutdown has begun. `false` is a delivery
    /// failure, not a fire-and-forget success; callers must handle it.
    pub fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.accepting() {
            debug!(runloop = %self.shared.name, "task rejected: loop unavailable");
            return false;
        }
        match self.tasks.try_send(Box::new(task)) {
            Ok(()) => true,
            Err(_) => {
                debug!(runloop = %self.shared.name, "task rejected: queue full");
                false
            }
        }
    }

    /// Schedules a task to run on the worker thread after `delay`.
    ///
    /// Same rejection semantics as [`post_task`](Self::post_task).
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.accepting() {
            debug!(runloop = %self.shared.name, "delayed task rejected: loop unavailable");
            return false;
        }
        let entry = Control::Timer {
            fire_at: Instant::now() + delay,
            task: Box::new(task),
        };
        match self.control.try_send(entry) {
            Ok(()) => true,
            Err(_) => {
                debug!(runloop = %self.shared.name, "delayed task rejected: queue full");
                false
            }
        }
    }

    /// `true` when the calling thread is this loop's worker thread.
    ///
    /// Higher layers use this predicate to decide whether a call may
    /// execute inline or must be marshalled.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.shared
            .worker
            .lock()
            .is_some_and(|id| id == thread::current().id())
    }

    /// `true` while the loop accepts new submissions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.accepting()
    }

    fn accepting(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
            && !self.shared.shutting_down.load(Ordering::SeqCst)
    }
}

struct TimerEntry {
    fire_at: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

fn run_worker(
    handle: &RunloopHandle,
    tasks: &Receiver<Task>,
    control: &Receiver<Control>,
    batch: usize,
    mut work_source: Option<Box<dyn WorkSource>>,
) {
    let name = handle.shared.name.clone();
    let mut timers: BinaryHeap<Reverse<TimerEntry>> = BinaryHeap::new();
    let mut timer_seq: u64 = 0;
    let mut idle = IdleStrategy::default();

    loop {
        if handle.shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }

        let mut work = 0usize;

        // Control first: shutdown beats everything, timers register.
        loop {
            match control.try_recv() {
                Ok(Control::Shutdown) => {
                    drain_remaining(&name, tasks);
                    return;
                }
                Ok(Control::Timer { fire_at, task }) => {
                    timers.push(Reverse(TimerEntry {
                        fire_at,
                        seq: timer_seq,
                        task,
                    }));
                    timer_seq += 1;
                }
                Err(_) => break,
            }
        }

        // One batch of queued tasks.
        for _ in 0..batch {
            match tasks.try_recv() {
                Ok(task) => {
                    run_task(&name, task);
                    work += 1;
                }
                Err(_) => break,
            }
        }

        // Due timers.
        let now = Instant::now();
        while timers.peek().is_some_and(|Reverse(t)| t.fire_at <= now) {
            if let Some(Reverse(entry)) = timers.pop() {
                run_task(&name, entry.task);
                work += 1;
            }
        }

        // One polling step of the attached work source.
        if let Some(source) = work_source.as_mut() {
            match catch_unwind(AssertUnwindSafe(|| source.poll_once())) {
                Ok(n) => work += n,
                Err(_) => error!(runloop = %name, "work source panicked; continuing"),
            }
        }

        if work > 0 {
            idle.reset();
            continue;
        }

        // Nothing to do: escalate spin → yield → timed park. The park is
        // cut short by any submission (the select wakes on send) and is
        // bounded by the next timer deadline.
        match idle.next_step() {
            backoff::Step::Spin => std::hint::spin_loop(),
            backoff::Step::Yield => thread::yield_now(),
            backoff::Step::Park(max) => {
                let wait = timers
                    .peek()
                    .map(|Reverse(t)| {
                        t.fire_at
                            .saturating_duration_since(Instant::now())
                            .min(max)
                    })
                    .unwrap_or(max);
                select! {
                    recv(tasks) -> task => {
                        if let Ok(task) = task {
                            run_task(&name, task);
                            idle.reset();
                        }
                    }
                    recv(control) -> msg => {
                        match msg {
                            Ok(Control::Shutdown) => {
                                drain_remaining(&name, tasks);
                                return;
                            }
                            Ok(Control::Timer { fire_at, task }) => {
                                timers.push(Reverse(TimerEntry { fire_at, seq: timer_seq, task }));
                                timer_seq += 1;
                                idle.reset();
                            }
                            Err(_) => {}
                        }
                    }
                    default(wait) => {}
                }
            }
        }
    }

    // Shutdown observed via the flag rather than the control message.
    drain_remaining(&handle.shared.name, tasks);
}

/// Runs every task still queued. Called exactly once, on the worker, as
/// the final act before the loop exits — this is what makes `shutdown`
/// drain instead of cancel.
fn drain_remaining(name: &str, tasks: &Receiver<Task>) {
    let mut drained = 0usize;
    while let Ok(task) = tasks.try_recv() {
        run_task(name, task);
        drained += 1;
    }
    if drained > 0 {
        debug!(runloop = %name, drained, "ran queued tasks during shutdown");
    }
}

fn run_task(name: &str, task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!(runloop = %name, "task panicked; loop continues");
    }
}
