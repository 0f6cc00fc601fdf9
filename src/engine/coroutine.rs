//! The resumption protocol shared by every cooperative machine.
//!
//! A machine never awaits anything itself. Each call to [`Coroutine::resume`]
//! runs until the machine either finishes or needs an event, and the returned
//! [`Action`] names that event. Whoever drives the machine (the [`Scheduler`] or
//! the inline [`run`] driver) waits for it and resumes the machine with the
//! matching [`Wake`].
//!
//! [`Scheduler`]: crate::Scheduler

use crate::{errors::Fault, BoxFuture, Interest};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

/// Why a machine is being resumed.
#[derive(Debug)]
pub enum Wake {
    /// First resumption.
    Start,
    /// The awaited event happened.
    Ready,
    /// Waiting for the event failed.
    Failed(io::Error),
    /// The event did not happen within [`Coroutine::timeout`].
    TimedOut,
    /// Someone called [`AbortHandle::abort`].
    Aborted,
}

/// What a machine waits for before it may be resumed.
pub enum Action {
    /// Readiness of the machine's own transport.
    Wait(Interest),
    /// Completion of a detached future, e.g. connection acquisition or an async handler.
    ///
    /// The future's output is the wake the machine is resumed with.
    WaitFor(BoxFuture<'static, Wake>),
    /// Nothing; give other machines a turn first.
    Yield,
    /// The machine is finished and can be dropped.
    Done,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wait(interest) => f.debug_tuple("Wait").field(interest).finish(),
            Self::WaitFor(_) => f.write_str("WaitFor(..)"),
            Self::Yield => f.write_str("Yield"),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// An exchange expressed as an explicit state machine.
pub trait Coroutine: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs until the next suspension point.
    fn resume(&mut self, wake: Wake) -> Result<Action, Fault>;

    /// Called with every failure [`resume`](Self::resume) returns.
    ///
    /// Must decide how to go on without failing itself; returning
    /// [`Action::Done`] drops the machine.
    fn recover(&mut self, fault: Fault) -> Action;

    /// Readiness of the transport the machine is working on.
    fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>>;

    /// How long [`Action::Wait`] may take before the machine is resumed with
    /// [`Wake::TimedOut`]. `None` waits forever.
    fn timeout(&self, interest: Interest) -> Option<Duration> {
        let _ = interest;
        None
    }

    fn abort_handle(&self) -> &AbortHandle;
}

/// Forces a machine into its abort path from outside.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AbortInner>);

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the machine at its current or next suspension point.
    pub fn abort(&self) {
        self.0.aborted.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::Acquire)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        loop {
            // Registered before the flag is checked, so a concurrent abort is not missed.
            let notified = self.0.notify.notified();

            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Waits for `interest` on the machine's transport, bounded by its timeout.
pub(crate) async fn wait_ready<M: Coroutine + ?Sized>(machine: &mut M, interest: Interest) -> Wake {
    let abort = machine.abort_handle().clone();
    let limit = machine.timeout(interest);
    let ready = machine.ready(interest);

    let bounded = async move {
        match limit {
            Some(limit) => tokio::time::timeout(limit, ready).await.ok(),
            None => Some(ready.await),
        }
    };

    tokio::select! {
        _ = abort.aborted() => Wake::Aborted,
        result = bounded => match result {
            Some(Ok(())) => Wake::Ready,
            Some(Err(err)) => Wake::Failed(err),
            None => Wake::TimedOut,
        },
    }
}

/// Runs `future` as its own task so a panic inside it stays contained.
pub(crate) async fn wait_for(abort: AbortHandle, future: BoxFuture<'static, Wake>) -> Wake {
    let mut task = tokio::spawn(future);

    tokio::select! {
        _ = abort.aborted() => {
            task.abort();
            Wake::Aborted
        }
        joined = &mut task => match joined {
            Ok(wake) => wake,
            Err(err) => Wake::Failed(io::Error::other(err.to_string())),
        },
    }
}

/// Drives one machine to completion on the current task.
///
/// The [`Scheduler`](crate::Scheduler) does the same for many machines at once;
/// this is the single-machine version.
pub async fn run<M: Coroutine + ?Sized>(machine: &mut M) {
    let mut wake = Wake::Start;

    loop {
        if machine.abort_handle().is_aborted() {
            wake = Wake::Aborted;
        }

        let action = match machine.resume(wake) {
            Ok(action) => action,
            Err(fault) => machine.recover(fault),
        };

        wake = match action {
            Action::Done => return,
            Action::Yield => {
                tokio::task::yield_now().await;
                Wake::Ready
            }
            Action::Wait(interest) => wait_ready(machine, interest).await,
            Action::WaitFor(future) => wait_for(machine.abort_handle().clone(), future).await,
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::future::{pending, ready};

    /// Yields `steps` times, then finishes, recording every wake it got.
    pub(crate) struct Stepper {
        pub(crate) steps: usize,
        pub(crate) wakes: Vec<String>,
        pub(crate) next: fn(usize) -> Action,
        pub(crate) stalled: bool,
        pub(crate) abort: AbortHandle,
        pub(crate) done: Option<tokio::sync::oneshot::Sender<Vec<String>>>,
    }

    impl Stepper {
        pub(crate) fn new(steps: usize, next: fn(usize) -> Action) -> Self {
            Self {
                steps,
                wakes: Vec::new(),
                next,
                stalled: false,
                abort: AbortHandle::new(),
                done: None,
            }
        }

        fn finish(&mut self) -> Action {
            if let Some(done) = self.done.take() {
                let _ = done.send(std::mem::take(&mut self.wakes));
            }
            Action::Done
        }
    }

    impl Coroutine for Stepper {
        fn name(&self) -> &'static str {
            "stepper"
        }

        fn resume(&mut self, wake: Wake) -> Result<Action, Fault> {
            let label = match &wake {
                Wake::Failed(err) => format!("failed:{err}"),
                other => format!("{other:?}"),
            };
            self.wakes.push(label);

            match wake {
                Wake::Aborted | Wake::TimedOut => return Ok(self.finish()),
                Wake::Failed(err) => return Err(err.into()),
                Wake::Start | Wake::Ready => {}
            }

            if self.steps == 0 {
                return Ok(self.finish());
            }
            self.steps -= 1;
            Ok((self.next)(self.steps))
        }

        fn recover(&mut self, fault: Fault) -> Action {
            self.wakes.push(format!("recovered:{fault}"));
            self.finish()
        }

        fn ready(&mut self, _: Interest) -> BoxFuture<'_, io::Result<()>> {
            match self.stalled {
                true => Box::pin(pending::<io::Result<()>>()),
                false => Box::pin(ready(Ok::<(), io::Error>(()))),
            }
        }

        fn timeout(&self, _: Interest) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        fn abort_handle(&self) -> &AbortHandle {
            &self.abort
        }
    }

    #[tokio::test]
    async fn run_follows_actions() {
        let mut machine = Stepper::new(3, |left| match left {
            2 => Action::Yield,
            1 => Action::Wait(Interest::Readable),
            _ => Action::WaitFor(Box::pin(async { Wake::Ready })),
        });

        run(&mut machine).await;
        assert_eq!(machine.wakes, ["Start", "Ready", "Ready", "Ready"]);
    }

    #[tokio::test]
    async fn stalled_wait_times_out() {
        let mut machine = Stepper::new(1, |_| Action::Wait(Interest::Writable));
        machine.stalled = true;

        run(&mut machine).await;
        assert_eq!(machine.wakes, ["Start", "TimedOut"]);
    }

    #[tokio::test]
    async fn panicking_future_fails_the_wait() {
        let mut machine = Stepper::new(1, |_| {
            Action::WaitFor(Box::pin(async {
                if true {
                    panic!("handler blew up");
                }
                Wake::Ready
            }))
        });

        run(&mut machine).await;
        assert_eq!(machine.wakes.len(), 3);
        assert!(machine.wakes[1].starts_with("failed:"));
        assert!(machine.wakes[2].starts_with("recovered:"));
    }

    #[tokio::test]
    async fn abort_interrupts_a_wait() {
        let mut machine = Stepper::new(1, |_| Action::WaitFor(Box::pin(pending::<Wake>())));
        let abort = machine.abort_handle().clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            abort.abort();
        });

        run(&mut machine).await;
        assert_eq!(machine.wakes, ["Start", "Aborted"]);
    }

    #[tokio::test]
    async fn aborted_before_start() {
        let mut machine = Stepper::new(5, |_| Action::Yield);
        machine.abort_handle().abort();

        run(&mut machine).await;
        assert_eq!(machine.wakes, ["Aborted"]);
        // Resolves immediately once set.
        machine.abort_handle().aborted().await;
    }
}
