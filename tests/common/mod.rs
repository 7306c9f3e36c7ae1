//! Shared utilities for the bootstrap integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tcp_bootstrap::handler::{ConnectionInitializer, EchoInitializer};
use tcp_bootstrap::server::{
    AttributeKey, BindController, BindEvent, EventLoopPool, RetryPolicy, ServerConfiguration,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Occupy `count` consecutive ports with plain listeners and make sure the
/// port right after them is free. Returns the listeners and the first port.
pub fn occupy_run(count: u16) -> (Vec<StdTcpListener>, u16) {
    for _ in 0..200 {
        let Ok(first) = StdTcpListener::bind((LOCALHOST, 0)) else {
            continue;
        };
        let Ok(addr) = first.local_addr() else {
            continue;
        };
        let start = addr.port();
        if start.checked_add(count + 1).is_none() {
            continue;
        }

        let mut held = vec![first];
        for offset in 1..count {
            match StdTcpListener::bind((LOCALHOST, start + offset)) {
                Ok(listener) => held.push(listener),
                Err(_) => break,
            }
        }
        if held.len() != usize::from(count) {
            continue;
        }
        // Probe: bound and released again immediately.
        if StdTcpListener::bind((LOCALHOST, start + count)).is_err() {
            continue;
        }
        return (held, start);
    }
    panic!("could not find {} free consecutive ports", count + 1);
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let (_held, start) = occupy_run(1);
    start + 1
}

/// Records every bind event in order.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<BindEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BindEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until at least `n` events arrived.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<BindEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= n || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl tcp_bootstrap::server::BindObserver for RecordingObserver {
    fn on_event(&self, event: &BindEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub struct Harness {
    pub acceptors: Arc<EventLoopPool>,
    pub workers: Arc<EventLoopPool>,
    pub observer: RecordingObserver,
    pub controller: BindController,
}

impl Harness {
    pub fn new(worker_threads: usize, initializer: Arc<dyn ConnectionInitializer>) -> Self {
        Self::with_policy(worker_threads, initializer, RetryPolicy::default())
    }

    pub fn echo() -> Self {
        Self::new(2, Arc::new(EchoInitializer))
    }

    pub fn with_policy(
        worker_threads: usize,
        initializer: Arc<dyn ConnectionInitializer>,
        policy: RetryPolicy,
    ) -> Self {
        let acceptors = Arc::new(EventLoopPool::start("acceptor", 1).unwrap());
        let workers = Arc::new(EventLoopPool::start("worker", worker_threads).unwrap());
        let server = Arc::new(
            ServerConfiguration::builder()
                .host(LOCALHOST)
                .backlog(256)
                .keep_alive(true)
                .reuse_address(true)
                .low_latency(true)
                .server_attribute(AttributeKey::ServerName, "nettyServer")
                .connection_attribute_default(AttributeKey::ClientId, "Secret")
                .build(),
        );
        let observer = RecordingObserver::default();
        let controller = BindController::new(
            Arc::clone(&acceptors),
            Arc::clone(&workers),
            server,
            initializer,
        )
        .with_policy(policy)
        .with_observer(observer.clone());

        Self {
            acceptors,
            workers,
            observer,
            controller,
        }
    }

    /// Bind on a free port and return the bound address.
    pub async fn bind_free(&self) -> SocketAddr {
        let handle = self.controller.attempt_bind(free_port()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("bind finished in time")
            .expect("bind succeeded")
    }

    pub async fn shutdown(&self, timeout: Duration) {
        self.acceptors.shutdown_gracefully(timeout).await;
        self.workers.shutdown_gracefully(timeout).await;
    }
}

pub fn thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or_default()
        .to_string()
}

/// Poll `check` until it returns true or `timeout` expires.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
