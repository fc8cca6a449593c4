//! Signed bearer tokens.
//!
//! Claim sets built from directory identities, signed with an ECDSA P-256
//! key that is persisted on disk and loaded once at startup.

pub mod claims;
pub mod codec;
pub mod error;
pub mod keypair;

pub use claims::{token_for_identity, AuthToken, DEFAULT_TTL};
pub use codec::{Signer, TokenSigner, TokenVerifier, Verifier};
pub use error::TokenError;
pub use keypair::{ensure_keypair, generate_keypair};
