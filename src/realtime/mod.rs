//! Real-time push notifications: device identity, transport and the
//! reconnecting client.

pub mod client;
pub mod device;
pub mod events;
pub mod transport;

pub use client::RealtimeClient;
pub use device::DeviceIdentity;
pub use events::{Notification, NotificationKind};
pub use transport::{Subscription, WebSocketTransport};
