mod address;
mod deadline;
mod endpoint;
mod sample;
mod transport;

pub use address::{Identifier, NodeAddress};
pub use deadline::with_deadline;
pub use endpoint::{ClientIdentity, Endpoint, EndpointKind};
pub use sample::{DataSample, SampleValue, StatusClass, UaScalar};
pub use transport::{
    BrowseEntry, ConnectionState, ItemStatus, SubscriptionEvent, SubscriptionListener,
    UaConnector, UaSession,
};

