pub mod messaging;

pub use messaging::{HttpMessagingService, MessageSender, MessagingError, ProviderReceipt};
