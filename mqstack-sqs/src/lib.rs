//! In-memory message queue engine for mqstack
//!
//! Standard-queue semantics with at-least-once delivery:
//! - CreateQueue, DeleteQueue, ListQueues, GetQueue, PurgeQueue
//! - SendMessage, ReceiveMessage (with long polling), DeleteMessage
//! - Visibility timeouts and ChangeMessageVisibility
//! - Dead-letter redrive via RedrivePolicy
//! - Queue and message attributes

pub mod attributes;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod message;
pub mod queue;
pub mod redrive;
pub mod registry;
mod state;
pub mod store;
pub mod visibility;


pub use attributes::{QueueAttributeName, QueueAttributes, RedrivePolicy};
pub use dispatcher::{ReceiveDispatcher, ReceiveOptions};
pub use error::SqsError;
pub use handlers::handle_request;
pub use message::{
    MessageAttributeValue, MessageId, ReceiptHandle, ReceivedMessage, SentMessage,
};
pub use queue::{Queue, QueueId};
pub use registry::QueueRegistry;
pub use state::SqsState;
