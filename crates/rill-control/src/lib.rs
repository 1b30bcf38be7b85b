//! Control-plane client: a long-lived bidirectional event stream to the
//! architect carrying state-update broadcasts, correlated unary
//! requests, and subscription-service registrations.

pub mod client;
pub mod error;
pub mod state;
pub mod subscription;
pub mod testing;
pub mod transport;
pub mod unary;

pub use client::{ClientConfig, ClientState, ControlPlaneClient, ProgressMode};
pub use error::ClientError;
pub use state::{StateSnapshot, StateUpdates};
pub use subscription::SubscriptionService;
pub use transport::{
    pair, BidiTransport, ChannelTransport, Connect, PreparedConnect, TcpConnect, TcpTransport,
    TransportError,
};
pub use unary::UnaryHandle;
