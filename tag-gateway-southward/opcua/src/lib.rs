mod codec;
mod connector;
mod session;

pub use codec::OpcUaCodec;
pub use connector::OpcUaConnector;
pub use session::OpcUaSession;
