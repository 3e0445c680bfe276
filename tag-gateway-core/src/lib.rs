pub mod cache;
pub mod controller;
pub mod gateway;
pub mod mapping;
pub mod registry;
pub mod router;
pub mod southward;

pub use cache::ValueCache;
pub use controller::{ControllerApi, HttpControllerApi};
pub use gateway::TagGateway;
pub use mapping::MappingResolver;
pub use registry::ModelRegistry;
pub use router::{ChangeRouter, ControllerCommand, RoutedCommand};
pub use southward::{ConnectionManager, EnvGuard, SubscriptionManager};
