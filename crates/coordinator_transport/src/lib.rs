//! The transport fabric: pluggable delivery mechanisms for pushing a
//! persisted `Message` to whichever recipient it names, plus the
//! recipient-kind-aware dispatch logic that picks the right one. Three
//! backends — long-poll HTTP, an AMQP-style topic broker, an MQTT-style
//! pub/sub broker — sit behind one common `Transport` trait.

pub mod dispatch;
pub mod error;
pub mod long_poll;
pub mod pub_sub_broker;
pub mod registry;
pub mod topic_broker;
pub mod transport;

pub use dispatch::{dispatch, RecipientLookup};
pub use error::TransportError;
pub use registry::TransportRegistry;
pub use transport::Transport;
