//! Runtime edge construction between producer and consumer endpoints.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use crate::caps::{Consumer, Producer, ReadableAcceptor, WritableProvider};
use crate::edge::{convert_readable, convert_writable, EdgeItem, Upcast};
use crate::error::FlowError;

/// Connects a producer to a consumer of the same item type.
///
/// Resolution order:
/// 1. *Push path*: the producer accepts the consumer-provided writable
///    half (the consumer's channel, or a component's callback).
/// 2. *Pull path*: the consumer accepts the producer-provided readable
///    half.
///
/// Whichever side provides the engaged half owns the edge storage. Two
/// passive components expose neither pairing and fail with
/// [`FlowError::Incompatible`]: no task exists to drive such an edge.
pub fn make_edge<T, P, C>(producer: &P, consumer: &C) -> Result<(), FlowError>
where
    T: EdgeItem,
    P: Producer<T> + ?Sized,
    C: Consumer<T> + ?Sized,
{
    if let (Some(acceptor), Some(provider)) =
        (producer.writable_acceptor(), consumer.writable_provider())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.writable_edge()?;
        return acceptor.accept_writable(edge);
    }
    if let (Some(provider), Some(acceptor)) =
        (producer.readable_provider(), consumer.readable_acceptor())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.readable_edge()?;
        return acceptor.accept_readable(edge);
    }
    Err(FlowError::Incompatible)
}

/// Connects endpoints of different item types through the explicit
/// [`Upcast`] conversion adapter.
pub fn make_edge_converting<PT, CT, P, C>(producer: &P, consumer: &C) -> Result<(), FlowError>
where
    PT: EdgeItem,
    CT: EdgeItem + Upcast<PT>,
    P: Producer<PT> + ?Sized,
    C: Consumer<CT> + ?Sized,
{
    if let (Some(acceptor), Some(provider)) =
        (producer.writable_acceptor(), consumer.writable_provider())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.writable_edge()?;
        return acceptor.accept_writable(convert_writable::<PT, CT>(edge));
    }
    if let (Some(provider), Some(acceptor)) =
        (producer.readable_provider(), consumer.readable_acceptor())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.readable_edge()?;
        return acceptor.accept_readable(convert_readable::<PT, CT>(edge));
    }
    Err(FlowError::Incompatible)
}

/// Connects endpoints whose item types are not statically unified,
/// relying on runtime tag equality. Mismatched tags fail with
/// [`FlowError::TypeMismatch`].
pub fn make_edge_typeless<PT, CT, P, C>(producer: &P, consumer: &C) -> Result<(), FlowError>
where
    PT: EdgeItem,
    CT: EdgeItem,
    P: Producer<PT> + ?Sized,
    C: Consumer<CT> + ?Sized,
{
    if TypeId::of::<PT>() != TypeId::of::<CT>() {
        return Err(FlowError::TypeMismatch {
            produced: type_name::<PT>(),
            expected: type_name::<CT>(),
        });
    }

    struct ConsumerCaps<T: EdgeItem> {
        writable_provider: Option<Arc<dyn WritableProvider<T>>>,
        readable_acceptor: Option<Arc<dyn ReadableAcceptor<T>>>,
    }

    let caps: Box<dyn Any> = Box::new(ConsumerCaps::<CT> {
        writable_provider: consumer.writable_provider(),
        readable_acceptor: consumer.readable_acceptor(),
    });
    let caps = caps
        .downcast::<ConsumerCaps<PT>>()
        .expect("type tags already matched");

    if let (Some(acceptor), Some(provider)) =
        (producer.writable_acceptor(), caps.writable_provider.as_ref())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.writable_edge()?;
        return acceptor.accept_writable(edge);
    }
    if let (Some(provider), Some(acceptor)) =
        (producer.readable_provider(), caps.readable_acceptor.as_ref())
    {
        acceptor.ready_to_accept()?;
        let edge = provider.readable_edge()?;
        return acceptor.accept_readable(edge);
    }
    Err(FlowError::Incompatible)
}
