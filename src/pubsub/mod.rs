// Pub/sub — brokers that carry reload notifications and the listener that
// turns their replies into events.
//
// MemoryBroker serves a single process (and the tests). RedisBroker is
// available behind the `redis` feature for deployments where terms are
// edited by one process and filtered by others.

pub mod listener;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use listener::{Event, EventHandler, Listener, ListenerState};
pub use memory::MemoryBroker;
pub use traits::{Broker, Reply, Subscriber, SubscriptionKind};
