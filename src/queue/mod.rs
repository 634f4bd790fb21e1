/// Durable at-least-once task queue
///
/// Tasks are persisted to a fjall keyspace before dispatch and removed only
/// on acknowledgement. Redelivery backoff, retry exhaustion, the
/// dead-letter partition and crash recovery live in [`EvalBroker`].
pub mod broker;
pub mod store;
pub mod task;

pub use broker::{Envelope, EvalBroker, RetryPolicy};
pub use store::{FjallQueue, QueueError};
pub use task::{DeadLetterTask, EvalTask};
