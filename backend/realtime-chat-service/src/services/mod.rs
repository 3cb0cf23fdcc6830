pub mod hub;
pub mod message_delivery;
pub mod notifier;
pub mod permission;
pub mod presence;
pub mod read_status;
pub mod session_manager;
pub mod typing;

// Re-export key types for convenience
pub use hub::{ChatHub, SessionCommand};
pub use message_delivery::{MessageDeliveryEngine, SendOutcome};
pub use notifier::ChatNotifier;
pub use permission::PermissionOracle;
pub use presence::{Departure, PresenceRegistry};
pub use read_status::ReadStatusPropagator;
pub use session_manager::SessionManager;
pub use typing::{TypingBroadcaster, TypingTransition};
