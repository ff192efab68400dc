//! Session and Credential Guardianship
//!
//! Tracks user activity, proactively refreshes the access credential before
//! expiry, and walks prolonged inactivity through a warning-then-forced-
//! logout sequence. Consumers observe the session through broadcast events.

mod events;
mod guardian;

pub use events::{SessionEvent, SessionEventKind};
pub use guardian::{CredentialSource, SessionGuardian, SessionPhase, SessionSnapshot};
