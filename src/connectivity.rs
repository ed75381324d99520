/// Network reachability signal polled once per delivery tick.
///
/// The host supplies the real implementation (OS reachability APIs, a ping
/// probe, whatever fits the platform); the sensor only asks a yes/no
/// question and never caches the answer across ticks.
pub trait ConnectivityMonitor: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Default monitor that reports the network as always reachable.
///
/// Useful for hosts that do not track connectivity; failed sends are still
/// retried on the next tick either way.
pub struct AlwaysReachable;

impl ConnectivityMonitor for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}
