//! Subscription matching and fan-out of state updates to agent sessions.

pub mod error;
pub mod matcher;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod selector;
pub mod sessions;

pub use error::BrokerError;
pub use matcher::DestinationMatching;
pub use message::Message;
pub use publisher::{Delivery, PublishReport, Transport, TransportError, UpdatePublisher};
pub use registry::{RegistryConfig, RegistryStats, SubscriberMap, Subscription, SubscriptionRegistry};
pub use selector::{Selector, SelectorError};
pub use sessions::AgentSessionManager;
