pub mod error;
pub mod session;
pub mod transport;

pub use error::TransportError;
pub use session::ImapTransport;
pub use transport::{MailSession, MailTransport, RawMessage, SessionEvent};
