//! Bounded FIFO channel connecting the two halves of an edge.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use rill_core::Status;
use tokio::sync::Notify;

/// Capacity used by nodes that own a channel but were not given an
/// explicit one.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of a single edge read. Carries the value together with the
/// status so a reader loop is a plain `while let Read::Item(..)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read<T> {
    Item(T),
    Closed,
    Timeout,
    Error,
}

impl<T> Read<T> {
    pub fn status(&self) -> Status {
        match self {
            Self::Item(_) => Status::Success,
            Self::Closed => Status::Closed,
            Self::Timeout => Status::Timeout,
            Self::Error => Status::Error,
        }
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(value) => Some(value),
            _ => None,
        }
    }
}

struct ChannelState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// Bounded mpmc FIFO with close/drain semantics.
///
/// Two policies: *buffered* (`bounded`, capacity >= 1) and *immediate*
/// (`rendezvous`, capacity 0: the writer parks until a reader takes
/// the value). After `close()` queued values remain readable until
/// drained; writers observe `Closed` immediately.
pub struct Channel<T> {
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    readable: Notify,
    writable: Notify,
}

impl<T: Send> Channel<T> {
    pub fn bounded(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    pub fn rendezvous() -> Arc<Self> {
        Arc::new(Self {
            capacity: 0,
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    pub async fn write(&self, value: T) -> Status {
        let mut value = Some(value);
        loop {
            let mut notified = pin!(self.writable.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("channel lock");
                if state.closed {
                    return Status::Closed;
                }
                if state.queue.len() < self.capacity.max(1) {
                    state.queue.push_back(value.take().expect("unsent value"));
                    drop(state);
                    self.readable.notify_one();
                    if self.capacity == 0 {
                        break;
                    }
                    return Status::Success;
                }
            }
            notified.await;
        }
        // Immediate policy: wait for a reader to take the value.
        loop {
            let mut notified = pin!(self.writable.notified());
            notified.as_mut().enable();
            {
                let state = self.state.lock().expect("channel lock");
                if state.queue.is_empty() {
                    return Status::Success;
                }
                if state.closed {
                    return Status::Closed;
                }
            }
            notified.await;
        }
    }

    pub async fn read(&self) -> Read<T> {
        loop {
            let mut notified = pin!(self.readable.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("channel lock");
                if let Some(value) = state.queue.pop_front() {
                    let more = !state.queue.is_empty();
                    drop(state);
                    self.writable.notify_one();
                    if more {
                        // Another item is ready; pass the wakeup on so a
                        // second reader is not left sleeping on a stale
                        // permit.
                        self.readable.notify_one();
                    }
                    return Read::Item(value);
                }
                if state.closed {
                    return Read::Closed;
                }
            }
            notified.await;
        }
    }

    /// Idempotent. Queued values stay readable until drained.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("channel lock");
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("channel lock").closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("channel lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rill_core::Status;

    use super::{Channel, Read};

    #[test]
    fn values_are_read_in_write_order() {
        rill_runtime::block_on(async {
            let channel = Channel::bounded(8);
            for i in 0..5 {
                assert_eq!(channel.write(i).await, Status::Success);
            }
            for i in 0..5 {
                assert_eq!(channel.read().await, Read::Item(i));
            }
        });
    }

    #[test]
    fn close_drains_remaining_values_then_reports_closed() {
        rill_runtime::block_on(async {
            let channel = Channel::bounded(8);
            channel.write(1).await;
            channel.write(2).await;
            channel.close();
            channel.close(); // idempotent
            assert_eq!(channel.write(3).await, Status::Closed);
            assert_eq!(channel.read().await, Read::Item(1));
            assert_eq!(channel.read().await, Read::Item(2));
            assert_eq!(channel.read().await, Read::Closed);
        });
    }

    #[test]
    fn full_channel_blocks_writer_until_space() {
        rill_runtime::block_on(async {
            let channel = Channel::bounded(1);
            channel.write(1).await;
            let writer = {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { channel.write(2).await })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(channel.read().await, Read::Item(1));
            assert_eq!(writer.await.expect("join writer"), Status::Success);
            assert_eq!(channel.read().await, Read::Item(2));
        });
    }

    #[test]
    fn rendezvous_writer_waits_for_reader() {
        rill_runtime::block_on(async {
            let channel = Channel::rendezvous();
            let writer = {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { channel.write(7).await })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!writer.is_finished());
            assert_eq!(channel.read().await, Read::Item(7));
            assert_eq!(writer.await.expect("join writer"), Status::Success);
        });
    }

    #[test]
    fn multiple_readers_steal_each_value_exactly_once() {
        rill_runtime::block_on(async {
            let channel = Channel::bounded(64);
            let reader = |channel: Arc<Channel<u32>>| async move {
                let mut seen = Vec::new();
                while let Read::Item(value) = channel.read().await {
                    seen.push(value);
                }
                seen
            };
            let a = tokio::spawn(reader(Arc::clone(&channel)));
            let b = tokio::spawn(reader(Arc::clone(&channel)));
            for i in 0..100u32 {
                assert_eq!(channel.write(i).await, Status::Success);
            }
            channel.close();
            let mut seen = a.await.expect("join reader a");
            seen.extend(b.await.expect("join reader b"));
            seen.sort_unstable();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        });
    }
}
