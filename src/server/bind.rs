//! Asynchronous bind with retry on successive ports.
//!
//! [`BindController::attempt_bind`] returns at once. Each bind attempt runs
//! as its own task on the acceptor pool; a failed attempt reports itself and
//! submits a fresh task for `port + 1`. Nothing recurses on the stack and no
//! acceptor thread waits across a retry delay.
//!
//! ```text
//! attempt_bind(P) ──submit──▶ [acceptor] bind P ──fail──▶ notify ──submit──▶ bind P+1 ...
//!                                         └──ok──▶ notify ──▶ accept loop ──▶ worker pool
//! ```
//!
//! The search ends on the first successful bind, when port 65535 fails, when
//! the [`RetryPolicy`] attempt cap is hit, or when the acceptor pool shuts down.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use super::attributes::{AttributeKey, AttributeValue, Attributes};
use super::connection::dispatch_connection;
use super::listener::create_listener;
use super::options::ServerConfiguration;
use super::pool::EventLoopPool;
use crate::error::BootstrapError;
use crate::handler::ConnectionInitializer;
use crate::logger;

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Limits on the port search. The default searches without a cap or delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` is unbounded.
    /// `Some(0)` behaves like `Some(1)`.
    pub max_attempts: Option<u32>,
    /// Wait before every attempt after the first
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            delay: Duration::ZERO,
        }
    }

    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }
}

/// State of one bind attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Pending,
    Bound,
    Failed,
}

/// One bind attempt: the port and how it went.
#[derive(Debug, Clone)]
pub struct ListenEndpoint {
    port: u16,
    state: EndpointState,
    local_addr: Option<SocketAddr>,
    server: Arc<ServerConfiguration>,
}

impl ListenEndpoint {
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Actual socket address once bound
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn server_attributes(&self) -> &Attributes {
        self.server.server_attributes()
    }

    pub fn server_attribute(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.server.server_attribute(key)
    }
}

/// Reported once per bind attempt.
#[derive(Debug, Clone)]
pub enum BindEvent {
    Bound {
        endpoint: ListenEndpoint,
    },
    Failed {
        port: u16,
        /// Port tried next, `None` when the search stops here
        next_port: Option<u16>,
        reason: String,
    },
}

impl BindEvent {
    pub const fn port(&self) -> u16 {
        match self {
            Self::Bound { endpoint } => endpoint.port,
            Self::Failed { port, .. } => *port,
        }
    }

    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

impl fmt::Display for BindEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound { endpoint } => write!(f, "bound on port {}", endpoint.port),
            Self::Failed {
                port,
                next_port: Some(next),
                ..
            } => write!(f, "failed on port {port}, retrying on {next}"),
            Self::Failed {
                port,
                next_port: None,
                ..
            } => write!(f, "failed on port {port}, giving up"),
        }
    }
}

/// Observability hook for bind attempts. Called on an acceptor thread.
pub trait BindObserver: Send + Sync + 'static {
    fn on_event(&self, event: &BindEvent);
}

impl<F> BindObserver for F
where
    F: Fn(&BindEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &BindEvent) {
        self(event);
    }
}

/// Where the port search stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Searching,
    Bound(SocketAddr),
    Exhausted { last_port: u16 },
    GaveUp { attempts: u32, last_port: u16 },
    Cancelled,
}

impl BindOutcome {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Searching)
    }

    pub fn into_result(self) -> Result<SocketAddr, BootstrapError> {
        match self {
            Self::Bound(addr) => Ok(addr),
            Self::Exhausted { last_port } => Err(BootstrapError::PortRangeExhausted { last_port }),
            Self::GaveUp {
                attempts,
                last_port,
            } => Err(BootstrapError::RetryLimitReached {
                attempts,
                last_port,
            }),
            Self::Searching | Self::Cancelled => Err(BootstrapError::BindCancelled),
        }
    }
}

/// Completion notification for a port search.
#[derive(Debug, Clone)]
pub struct BindHandle {
    outcome: watch::Receiver<BindOutcome>,
}

impl BindHandle {
    /// Current state without waiting
    pub fn outcome(&self) -> BindOutcome {
        self.outcome.borrow().clone()
    }

    /// Wait for the search to end. `Ok` carries the bound address.
    pub async fn wait(&self) -> Result<SocketAddr, BootstrapError> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(BindOutcome::is_terminal).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => BindOutcome::Cancelled,
        };
        outcome.into_result()
    }
}

/// Drives the port search and, once bound, the accept loop.
pub struct BindController {
    acceptors: Arc<EventLoopPool>,
    workers: Arc<EventLoopPool>,
    server: Arc<ServerConfiguration>,
    initializer: Arc<dyn ConnectionInitializer>,
    policy: RetryPolicy,
    observer: Option<Arc<dyn BindObserver>>,
    search: Mutex<Option<Arc<Search>>>,
}

impl BindController {
    pub fn new(
        acceptors: Arc<EventLoopPool>,
        workers: Arc<EventLoopPool>,
        server: Arc<ServerConfiguration>,
        initializer: Arc<dyn ConnectionInitializer>,
    ) -> Self {
        Self {
            acceptors,
            workers,
            server,
            initializer,
            policy: RetryPolicy::default(),
            observer: None,
            search: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl BindObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Start searching for a free port from `start_port` upwards.
    ///
    /// Returns immediately. Only the first call starts a search; later calls
    /// return a handle to that same search whatever port they pass.
    pub fn attempt_bind(&self, start_port: u16) -> Result<BindHandle, BootstrapError> {
        if start_port == 0 {
            return Err(BootstrapError::InvalidPort(start_port));
        }

        let mut slot = self
            .search
            .lock()
            .map_err(|_| BootstrapError::BindCancelled)?;
        if let Some(search) = slot.as_ref() {
            return Ok(search.handle());
        }

        let (outcome, _) = watch::channel(BindOutcome::Searching);
        let search = Arc::new(Search {
            acceptors: Arc::clone(&self.acceptors),
            workers: Arc::clone(&self.workers),
            server: Arc::clone(&self.server),
            initializer: Arc::clone(&self.initializer),
            policy: self.policy,
            observer: self.observer.clone(),
            outcome,
            endpoint: Mutex::new(None),
            attempts: AtomicU32::new(0),
        });
        Search::schedule(&search, start_port)?;

        let handle = search.handle();
        *slot = Some(search);
        Ok(handle)
    }

    /// Latest endpoint of the search, `None` before the first attempt runs.
    pub fn endpoint(&self) -> Option<ListenEndpoint> {
        let slot = self.search.lock().ok()?;
        slot.as_ref().and_then(|search| search.endpoint())
    }
}

/// Shared state of one port search.
struct Search {
    acceptors: Arc<EventLoopPool>,
    workers: Arc<EventLoopPool>,
    server: Arc<ServerConfiguration>,
    initializer: Arc<dyn ConnectionInitializer>,
    policy: RetryPolicy,
    observer: Option<Arc<dyn BindObserver>>,
    outcome: watch::Sender<BindOutcome>,
    endpoint: Mutex<Option<ListenEndpoint>>,
    attempts: AtomicU32,
}

impl Search {
    fn handle(&self) -> BindHandle {
        BindHandle {
            outcome: self.outcome.subscribe(),
        }
    }

    fn endpoint(&self) -> Option<ListenEndpoint> {
        self.endpoint.lock().ok().and_then(|e| e.clone())
    }

    /// Queue an attempt on `port` as a new acceptor task.
    fn schedule(search: &Arc<Self>, port: u16) -> Result<(), BootstrapError> {
        let member = search.acceptors.next_member();
        let task_search = Arc::clone(search);
        search
            .acceptors
            .spawn_on(&member, move || Self::attempt(task_search, port))
    }

    async fn attempt(search: Arc<Self>, port: u16) {
        let mut guard = AttemptGuard {
            search: Arc::clone(&search),
            handed_off: false,
        };
        let mut shutdown = search.acceptors.shutdown_signal();
        if *shutdown.borrow() {
            return;
        }

        let attempt_no = search.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt_no > 1 && !search.policy.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(search.policy.delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }

        search.set_endpoint(port, EndpointState::Pending, None);
        let addr = SocketAddr::new(search.server.host(), port);

        match create_listener(addr, &search.server) {
            Ok(listener) => {
                let local = listener.local_addr().unwrap_or(addr);
                let endpoint = search.set_endpoint(port, EndpointState::Bound, Some(local));
                logger::log_bind_succeeded(
                    &local,
                    search
                        .server
                        .server_attribute(&AttributeKey::ServerName)
                        .and_then(AttributeValue::as_text),
                );
                search.notify(&BindEvent::Bound { endpoint });
                search.finish(BindOutcome::Bound(local));

                search.accept_loop(listener, shutdown).await;
            }
            Err(source) => {
                let err = BootstrapError::Bind { port, source };
                let next_port = if search.policy.allows_another(attempt_no) {
                    port.checked_add(1)
                } else {
                    None
                };

                search.set_endpoint(port, EndpointState::Failed, None);
                logger::log_bind_failed(port, next_port, &err);
                search.notify(&BindEvent::Failed {
                    port,
                    next_port,
                    reason: err.to_string(),
                });

                match next_port {
                    Some(next) => {
                        if Self::schedule(&search, next).is_ok() {
                            guard.handed_off = true;
                        }
                    }
                    None if port == u16::MAX => {
                        search.finish(BindOutcome::Exhausted { last_port: port });
                    }
                    None => search.finish(BindOutcome::GaveUp {
                        attempts: attempt_no,
                        last_port: port,
                    }),
                }
            }
        }
    }

    async fn accept_loop(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => dispatch_connection(
                        stream,
                        peer,
                        &self.server,
                        &self.workers,
                        &self.initializer,
                    ),
                    Err(e) => {
                        logger::log_error("accept", &format!("Failed to accept connection: {e}"));
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        if let Ok(addr) = listener.local_addr() {
            logger::log_info("accept", &format!("stopped accepting on {addr}"));
        }
    }

    fn set_endpoint(
        &self,
        port: u16,
        state: EndpointState,
        local_addr: Option<SocketAddr>,
    ) -> ListenEndpoint {
        let endpoint = ListenEndpoint {
            port,
            state,
            local_addr,
            server: Arc::clone(&self.server),
        };
        if let Ok(mut slot) = self.endpoint.lock() {
            *slot = Some(endpoint.clone());
        }
        endpoint
    }

    fn notify(&self, event: &BindEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }

    /// Record a terminal outcome. Only the first one sticks.
    fn finish(&self, outcome: BindOutcome) {
        self.outcome.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = outcome;
                true
            }
        });
    }
}

/// Marks the search cancelled if an attempt ends without a terminal outcome
/// and without handing off to the next attempt (shutdown, abort, panic).
struct AttemptGuard {
    search: Arc<Search>,
    handed_off: bool,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.handed_off {
            self.search.finish(BindOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> ListenEndpoint {
        ListenEndpoint {
            port,
            state: EndpointState::Bound,
            local_addr: None,
            server: Arc::new(
                ServerConfiguration::builder()
                    .server_attribute(AttributeKey::ServerName, "nettyServer")
                    .build(),
            ),
        }
    }

    #[test]
    fn test_event_messages() {
        let bound = BindEvent::Bound {
            endpoint: endpoint(10001),
        };
        assert_eq!(bound.to_string(), "bound on port 10001");
        assert!(bound.is_bound());

        let retry = BindEvent::Failed {
            port: 9999,
            next_port: Some(10000),
            reason: "address in use".to_string(),
        };
        assert_eq!(retry.to_string(), "failed on port 9999, retrying on 10000");
        assert_eq!(retry.port(), 9999);

        let last = BindEvent::Failed {
            port: u16::MAX,
            next_port: None,
            reason: "address in use".to_string(),
        };
        assert_eq!(last.to_string(), "failed on port 65535, giving up");
    }

    #[test]
    fn test_endpoint_exposes_server_attributes() {
        let ep = endpoint(9999);
        assert_eq!(
            ep.server_attribute(&AttributeKey::ServerName)
                .and_then(AttributeValue::as_text),
            Some("nettyServer")
        );
        assert_eq!(ep.server_attributes().len(), 1);
    }

    #[test]
    fn test_retry_policy_limits() {
        let unbounded = RetryPolicy::unbounded();
        assert!(unbounded.allows_another(u32::MAX - 1));

        let capped = RetryPolicy::with_max_attempts(3).delay(Duration::from_millis(5));
        assert!(capped.allows_another(2));
        assert!(!capped.allows_another(3));
        assert_eq!(capped.delay, Duration::from_millis(5));

        assert!(!RetryPolicy::with_max_attempts(0).allows_another(1));
    }

    #[test]
    fn test_outcome_results() {
        let addr: SocketAddr = "127.0.0.1:10001".parse().expect("addr");
        assert_eq!(BindOutcome::Bound(addr).into_result().ok(), Some(addr));
        assert!(matches!(
            BindOutcome::Exhausted { last_port: 65535 }.into_result(),
            Err(BootstrapError::PortRangeExhausted { last_port: 65535 })
        ));
        assert!(matches!(
            BindOutcome::GaveUp {
                attempts: 2,
                last_port: 10000
            }
            .into_result(),
            Err(BootstrapError::RetryLimitReached { attempts: 2, .. })
        ));
        assert!(matches!(
            BindOutcome::Cancelled.into_result(),
            Err(BootstrapError::BindCancelled)
        ));
        assert!(!BindOutcome::Searching.is_terminal());
    }
}
