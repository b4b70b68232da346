//! Session management for the signed-in user.
//!
//! This module provides:
//! - `SessionStore`: the process-wide session with expiry-aware token reads
//! - `SessionStorage`: durable backends the session is mirrored to
//!   (memory, JSON file, OS keychain)
//! - `Clock`: time source used for expiry checks
//!
//! Tokens count as expired 5 seconds before the server says they do.

pub mod clock;
pub mod session;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{is_token_valid, Session, SessionPayload, SessionStore, UserProfile, EXPIRY_SKEW_MS};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage};
