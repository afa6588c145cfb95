// StrandConsent — consent-based attribute disclosure handshake
//
// A requester asks a responder to reveal a subset of identity fields; the
// responder grants or denies field-by-field. Crate root: module declarations
// and public re-exports.

pub mod clock;
pub mod config;
pub mod disclosure;
pub mod error;
pub mod notify;
pub mod participant;
pub mod protocol;
pub mod session;
pub mod store;

// Re-export key types at crate root for convenience.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HandshakeConfig;
pub use disclosure::{DisclosureEngine, FieldValueResolver, StaticFieldValues, CANONICAL_FIELDS};
pub use error::{ConsentError, ErrorKind, Result};
pub use notify::{Notification, NotificationKind, Notifier, Outbox};
pub use participant::{Directory, Participant, ParticipantResolver, ParticipantRole};
pub use protocol::{Decision, HandshakeProtocol, InitiateOptions};
pub use session::{
    field_set, HandshakeRequest, HandshakeResponse, HandshakeSession, HandshakeStatus, Metadata,
};
pub use store::{MemorySessionStore, SessionStore};
