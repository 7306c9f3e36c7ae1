//! Fixed-size event loop pools.
//!
//! Each member of a pool is one OS thread driving a single-threaded Tokio
//! runtime with a `LocalSet`. A task submitted to a member runs on that
//! member's thread until it finishes, so work placed on a member never
//! migrates. The same type backs the acceptor pool and the worker pool.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet, LocalSet};
use tokio::time::Instant;

use crate::error::BootstrapError;
use crate::logger;

/// Future produced on the member thread; it never leaves that thread.
pub type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// Unit of work handed to a pool member.
pub type Task = Box<dyn FnOnce() -> LocalTask + Send + 'static>;

/// Identifies one member of a pool. Lookup only, it owns nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberHandle {
    pool: Arc<str>,
    index: usize,
}

impl MemberHandle {
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    /// Name of the member's thread, e.g. `worker-3`
    pub fn thread_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MemberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pool, self.index)
    }
}

pub type WorkerHandle = MemberHandle;
pub type AcceptorHandle = MemberHandle;

/// Outcome of [`EventLoopPool::shutdown_gracefully`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that finished on their own during the drain
    pub completed: usize,
    /// Tasks still running at the deadline
    pub aborted: usize,
}

impl ShutdownReport {
    fn merge(&mut self, other: Self) {
        self.completed += other.completed;
        self.aborted += other.aborted;
    }
}

enum Command {
    Run(Task),
    Shutdown {
        timeout: Duration,
        done: oneshot::Sender<ShutdownReport>,
    },
}

struct Member {
    handle: MemberHandle,
    commands: mpsc::UnboundedSender<Command>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// A fixed set of single-threaded event loops.
pub struct EventLoopPool {
    name: Arc<str>,
    members: Vec<Member>,
    next: AtomicUsize,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl EventLoopPool {
    /// Start `size` member threads. Fails if any member cannot come up.
    pub fn start(name: &str, size: usize) -> Result<Self, BootstrapError> {
        if size == 0 {
            return Err(BootstrapError::PoolStartup {
                pool: name.to_string(),
                reason: "pool size must be at least 1".to_string(),
            });
        }

        let name: Arc<str> = Arc::from(name);
        let mut members = Vec::with_capacity(size);
        for index in 0..size {
            // Members already started exit once their command sender drops.
            members.push(spawn_member(&name, index)?);
        }

        let (shutdown_tx, _) = watch::channel(false);
        logger::log_pool_started(&name, size);

        Ok(Self {
            name,
            members,
            next: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Round-robin choice of the member for the next piece of work
    pub fn next_member(&self) -> MemberHandle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.members.len();
        self.members[index].handle.clone()
    }

    /// Receiver that flips to `true` once shutdown starts. Long-running
    /// tasks (accept loops, retry chains) select on it to stop early.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run `task` on the next member.
    pub fn submit(&self, task: Task) -> Result<MemberHandle, BootstrapError> {
        let member = self.next_member();
        self.submit_to(&member, task)?;
        Ok(member)
    }

    /// Run `task` on a specific member.
    pub fn submit_to(&self, member: &MemberHandle, task: Task) -> Result<(), BootstrapError> {
        if self.is_shutting_down() || member.pool() != self.name() {
            return Err(self.rejected());
        }
        let target = self.members.get(member.index).ok_or_else(|| self.rejected())?;
        target
            .commands
            .send(Command::Run(task))
            .map_err(|_| self.rejected())
    }

    /// Convenience wrapper around [`submit_to`](Self::submit_to) for closures.
    pub fn spawn_on<F, Fut>(&self, member: &MemberHandle, f: F) -> Result<(), BootstrapError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.submit_to(member, Box::new(move || Box::pin(f()) as LocalTask))
    }

    /// Stop accepting work, wait up to `timeout` for running tasks, then
    /// abort whatever is left and join the member threads.
    ///
    /// Only the first call does anything; later calls return an empty report.
    pub async fn shutdown_gracefully(&self, timeout: Duration) -> ShutdownReport {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        logger::log_shutdown_started(&self.name, timeout);
        self.shutdown_tx.send_replace(true);

        let mut pending = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let (done, rx) = oneshot::channel();
            if member
                .commands
                .send(Command::Shutdown { timeout, done })
                .is_ok()
            {
                pending.push(rx);
            }
        }

        let mut report = ShutdownReport::default();
        for rx in pending {
            if let Ok(member_report) = rx.await {
                report.merge(member_report);
            }
        }

        let threads: Vec<_> = self
            .members
            .iter()
            .filter_map(|m| m.thread.lock().ok().and_then(|mut t| t.take()))
            .collect();
        let _ = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;

        logger::log_shutdown_report(&self.name, report.completed, report.aborted);
        report
    }

    fn rejected(&self) -> BootstrapError {
        BootstrapError::PoolShutDown {
            pool: self.name.to_string(),
        }
    }
}

impl Drop for EventLoopPool {
    fn drop(&mut self) {
        // Dropping the command senders ends every member loop.
        self.shutdown_tx.send_replace(true);
    }
}

fn spawn_member(pool: &Arc<str>, index: usize) -> Result<Member, BootstrapError> {
    let handle = MemberHandle {
        pool: Arc::clone(pool),
        index,
    };
    let (commands, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std_mpsc::channel();

    let member = handle.clone();
    let thread = thread::Builder::new()
        .name(handle.thread_name())
        .spawn(move || run_member(member, rx, ready_tx))
        .map_err(|e| startup_error(pool, &e))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(Member {
            handle,
            commands,
            thread: Mutex::new(Some(thread)),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(startup_error(pool, &e))
        }
        Err(_) => {
            let _ = thread.join();
            Err(startup_error(pool, &"member thread exited during startup"))
        }
    }
}

fn startup_error(pool: &str, err: &impl fmt::Display) -> BootstrapError {
    BootstrapError::PoolStartup {
        pool: pool.to_string(),
        reason: err.to_string(),
    }
}

fn run_member(
    handle: MemberHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    ready: std_mpsc::Sender<io::Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let local = LocalSet::new();
    local.block_on(&runtime, member_loop(handle, commands));
}

async fn member_loop(handle: MemberHandle, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Run(task)) => {
                    tasks.spawn_local(async move { task().await });
                }
                Some(Command::Shutdown { timeout, done }) => {
                    commands.close();
                    // Work accepted before the shutdown still runs; it sees the
                    // shutdown signal or is aborted at the deadline.
                    while let Ok(queued) = commands.try_recv() {
                        if let Command::Run(task) = queued {
                            tasks.spawn_local(async move { task().await });
                        }
                    }
                    let report = drain(&handle, &mut tasks, timeout).await;
                    let _ = done.send(report);
                    return;
                }
                // Pool dropped without a graceful shutdown
                None => return,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                note_join(&handle, joined);
            }
        }
    }
}

async fn drain(handle: &MemberHandle, tasks: &mut JoinSet<()>, timeout: Duration) -> ShutdownReport {
    let deadline = Instant::now() + timeout;
    let mut report = ShutdownReport::default();
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(result) => {
                    report.completed += 1;
                    note_join(handle, result);
                }
                None => return report,
            },
            () = tokio::time::sleep_until(deadline) => {
                report.aborted = tasks.len();
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return report;
            }
        }
    }
}

fn note_join(handle: &MemberHandle, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            logger::log_task_panicked(handle.pool(), handle.index());
        }
    }
}
