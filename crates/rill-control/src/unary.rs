//! Correlated request/response handle for unary calls on the event
//! stream.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rill_proto::{Event, Payload};
use tokio::sync::oneshot;

use crate::client::ClientShared;
use crate::error::ClientError;

/// Pending unary response. Consumed by awaiting; the matching incoming
/// event is identified by the correlation tag, independent of arrival
/// order.
pub struct UnaryHandle<Resp: Payload> {
    pub(crate) tag: u64,
    pub(crate) rx: oneshot::Receiver<Result<Event, ClientError>>,
    pub(crate) shared: Arc<ClientShared>,
    pub(crate) _marker: PhantomData<fn() -> Resp>,
}

impl<Resp: Payload> UnaryHandle<Resp> {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub async fn await_response(self) -> Result<Resp, ClientError> {
        match self.rx.await {
            Ok(Ok(event)) => Ok(event.payload.unpack::<Resp>()?),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ClientError::Transport),
        }
    }

    /// Like [`await_response`](Self::await_response) with a deadline.
    /// On expiry the tag is retired; a late response bearing it is
    /// logged and discarded by the event handler.
    pub async fn await_response_with_deadline(
        mut self,
        deadline: Duration,
    ) -> Result<Resp, ClientError> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(Ok(event))) => Ok(event.payload.unpack::<Resp>()?),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_)) => Err(ClientError::Transport),
            Err(_) => {
                self.shared.retire_tag(self.tag);
                Err(ClientError::Timeout)
            }
        }
    }
}
