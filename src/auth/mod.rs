//! Caller identification.
//!
//! Requests reach this service through a trusted authenticating proxy. The
//! proxy passes the caller's organization in `X-Org-Id`, and the caller's
//! bearer token is forwarded untouched to the scheduler.

mod caller;
mod error;

pub use caller::{Caller, ORG_ID_HEADER, caller_auth_middleware};
pub use error::AuthError;
