use rill_control::ClientError;
use rill_flow::FlowError;
use thiserror::Error;

use crate::port_graph::ValidationError;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("pipelines must be registered before the executor starts")]
    AlreadyStarted,

    #[error("segment '{segment}' does not declare port '{port}'")]
    UnknownPort { segment: String, port: String },

    #[error("port '{port}' carries {carried}, segment '{segment}' requested {requested}")]
    PortType {
        port: String,
        segment: String,
        carried: &'static str,
        requested: &'static str,
    },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
