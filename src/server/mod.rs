// Server module entry
// Event loop pools, bind-with-retry, connection dispatch and signal handling

pub mod attributes;
pub mod bind;
pub mod connection;
pub mod listener;
pub mod options;
pub mod pool;
pub mod signal;

// Re-export commonly used types
pub use attributes::{AttributeKey, AttributeValue, Attributes};
pub use bind::{
    BindController, BindEvent, BindHandle, BindObserver, BindOutcome, EndpointState,
    ListenEndpoint, RetryPolicy,
};
pub use connection::{ConnectionContext, ConnectionId};
pub use options::{ServerConfiguration, ServerConfigurationBuilder};
pub use pool::{AcceptorHandle, EventLoopPool, MemberHandle, ShutdownReport, WorkerHandle};
