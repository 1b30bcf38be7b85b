pub mod broadcast;
pub mod broadcast_typeless;
pub mod combine_latest;
pub mod conditional;
pub mod queue;
pub mod router;

pub use broadcast::Broadcast;
pub use broadcast_typeless::{link_typeless, BroadcastTypeless};
pub use combine_latest::CombineLatest2;
pub use conditional::Conditional;
pub use queue::Queue;
pub use router::{Router, RouterSource, UnknownKeyPolicy};
