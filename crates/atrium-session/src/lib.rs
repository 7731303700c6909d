//! Session state, token persistence, and single-flight refresh coordination.
//!
//! One [`SessionStore`] and one [`RefreshCoordinator`] exist per process;
//! every component that needs a token goes through them. The store owns its
//! persistence backend outright, and the coordinator guarantees at most one
//! refresh call in flight no matter how many concurrent requests discover an
//! expired token.

pub mod refresh;
pub mod store;
pub mod token;

pub use refresh::{
    AuthTransport, PendingRequest, RefreshCoordinator, RefreshError, TransportError,
};
pub use store::{
    ACCESS_TOKEN_KEY, FileTokenStore, MemoryTokenStore, PersistedTokens, REFRESH_TOKEN_KEY,
    SessionState, SessionStatus, SessionStore, TokenStore, TokenStoreError, UserSnapshot,
};
pub use token::{TokenPair, decode_expiry, expires_within};
