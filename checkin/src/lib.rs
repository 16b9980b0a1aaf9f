//! Live attendance check-in protocol.
//!
//! A student's device encrypts its identity into a short-lived, auto-rotating
//! envelope; the lecturer's scanner decrypts and validates it, and attendance
//! is recorded exactly once per student per session while observers watch the
//! enrolled/marked/remaining counts move.
//!
//! Flow: [`generator::TokenGenerator`] → envelope (carried in a visual code)
//! → [`validator::TokenValidator`] → [`coordinator::CheckInCoordinator`] →
//! [`registry::SessionRegistry`] → stats fanned out via [`events`].

pub mod codec;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod generator;
pub mod keyring;
pub mod registry;
pub mod token;
pub mod validator;

pub use codec::TokenCodec;
pub use coordinator::{CheckInCoordinator, CheckInRequest, CheckInResponse, CheckInSuccess};
pub use error::RejectionReason;
pub use events::{SessionEvent, SessionEvents, session_topic};
pub use generator::{Claimant, DEFAULT_ROTATION, TokenGenerator, TokenStream};
pub use keyring::{KeyRing, SharedKey};
pub use registry::{
    AttendanceRecord, AttendanceStatus, ClearAuthorization, SessionRegistry, SessionSnapshot,
    SessionState, SessionStats,
};
pub use token::IdentityToken;
pub use validator::{DEFAULT_MAX_AGE, TokenValidator, ValidIdentity};
