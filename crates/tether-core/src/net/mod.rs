//! Network plumbing: reachability, retry policy, and request delivery.

mod connectivity;
mod http;
mod retry;

pub use connectivity::{
    ConnectionStatus, ConnectivityChanges, ConnectivityMonitor, ReachabilityProbe, TcpProbe,
};
pub use http::{HttpMethod, HttpRequestSender, HttpResponse, RequestSender};
pub use retry::{BackoffStrategy, RetryPolicy, CONFLICT_STATUS};
