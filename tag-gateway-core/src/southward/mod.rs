mod connection;
mod monitor;
mod namespace;
mod subscription;

pub use connection::{ConnectionManager, EnvGuard};
pub use monitor::{AvailabilityMonitor, AvailabilityReport};
pub use namespace::{NamespaceBinding, NamespaceResolver};
pub use subscription::{ResubscribeRequest, ResubscribeWorker, SubscriptionManager};
