use crate::{
    engine::coroutine::{wait_for, wait_ready, Action, Coroutine, Wake},
    limits::WaitStrategy,
};
use crossbeam::queue::SegQueue;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{task::yield_now, time::sleep as tokio_sleep};
use tracing::{error, trace};

struct Task {
    machine: Box<dyn Coroutine>,
    wake: Wake,
}

struct Shared {
    ready: SegQueue<Task>,
    wait_strategy: WaitStrategy,
    live: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn requeue(&self, task: Task) {
        match self.closed.load(Ordering::Acquire) {
            true => self.discard(task),
            false => self.ready.push(task),
        }
    }

    fn discard(&self, task: Task) {
        trace!(machine = task.machine.name(), "Scheduler stopped, dropping machine");
        self.live.fetch_sub(1, Ordering::AcqRel);
        drop(task);
    }
}

/// Runs many [`Coroutine`]s on a small set of worker loops.
///
/// Workers pop ready machines from a shared queue and resume them until they
/// suspend. A suspended machine is parked in its own lightweight task that waits
/// for the event and then puts the machine back on the queue, so between two
/// suspension points a machine runs on exactly one worker without interleaving.
///
/// # Examples
/// ```no_run
/// use maker_h1::{limits::WaitStrategy, Scheduler};
///
/// #[tokio::main]
/// async fn main() {
///     let scheduler = Scheduler::new(WaitStrategy::Yield);
///     scheduler.start(4);
///     // scheduler.submit(machine);
/// }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(wait_strategy: WaitStrategy) -> Self {
        Self {
            shared: Arc::new(Shared {
                ready: SegQueue::new(),
                wait_strategy,
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns `workers` worker loops on the current tokio runtime.
    pub fn start(&self, workers: usize) {
        for _ in 0..workers.max(1) {
            let shared = self.shared.clone();
            tokio::spawn(Self::worker(shared));
        }
    }

    /// Queues `machine`; after [`shutdown`](Self::shutdown) it is dropped instead.
    pub fn submit<M: Coroutine>(&self, machine: M) {
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        self.shared.requeue(Task {
            machine: Box::new(machine),
            wake: Wake::Start,
        });
    }

    /// Machines waiting for a worker right now.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.ready.len()
    }

    /// Machines submitted and not finished yet, suspended ones included.
    #[inline]
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Stops the workers after their current step and drops queued machines.
    /// Suspended machines are dropped when their wait completes.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);

        while let Some(task) = self.shared.ready.pop() {
            self.shared.discard(task);
        }
    }

    async fn worker(shared: Arc<Shared>) {
        while !shared.closed.load(Ordering::Acquire) {
            let Some(task) = shared.ready.pop() else {
                match shared.wait_strategy {
                    WaitStrategy::Yield => yield_now().await,
                    WaitStrategy::Sleep(time) => tokio_sleep(time).await,
                }
                continue;
            };

            let name = task.machine.name();
            if panic::catch_unwind(AssertUnwindSafe(|| Self::step(&shared, task))).is_err() {
                error!(machine = name, "Machine panicked outside a handler, dropping it");
                shared.live.fetch_sub(1, Ordering::AcqRel);
            }

            yield_now().await;
        }
    }

    fn step(shared: &Arc<Shared>, task: Task) {
        let Task { mut machine, mut wake } = task;

        if machine.abort_handle().is_aborted() {
            wake = Wake::Aborted;
        }

        let action = match machine.resume(wake) {
            Ok(action) => action,
            Err(fault) => machine.recover(fault),
        };
        trace!(machine = machine.name(), ?action, "Machine suspended");

        match action {
            Action::Done => {
                shared.live.fetch_sub(1, Ordering::AcqRel);
            }
            Action::Yield => shared.requeue(Task {
                machine,
                wake: Wake::Ready,
            }),
            Action::Wait(interest) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let wake = wait_ready(&mut *machine, interest).await;
                    shared.requeue(Task { machine, wake });
                });
            }
            Action::WaitFor(future) => {
                let shared = shared.clone();
                let abort = machine.abort_handle().clone();
                tokio::spawn(async move {
                    let wake = wait_for(abort, future).await;
                    shared.requeue(Task { machine, wake });
                });
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}
