//! Notification dispatch with retry and channel fallback

mod channel;
mod policy;

pub use channel::{ChannelError, ChannelKind, Dispatcher, Message, NotificationChannel, Recipient};
pub use policy::{
    AttemptOutcome, DeliveryPolicy, DeliveryReport, DeliveryRequest, DeliveryStatus,
    FallbackDelivery, NotificationAttempt,
};
