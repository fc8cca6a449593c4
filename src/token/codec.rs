//! Token signing and verification (compact JWS, ES256).

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use super::claims::AuthToken;
use super::error::TokenError;

/// The only algorithm tokens are signed with or accepted in.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::ES256;

/// Signs claim sets into wire tokens.
pub trait Signer: Send + Sync {
    fn sign(&self, token: &AuthToken) -> Result<String, TokenError>;
}

/// Verifies wire tokens and recovers their claim sets.
///
/// Expiration is not checked here; see [`AuthToken::is_expired`].
pub trait Verifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthToken, TokenError>;
}

/// ES256 signer holding the private half of the keypair.
pub struct TokenSigner {
    encoding_key: EncodingKey,
    header: Header,
}

impl TokenSigner {
    pub fn new(encoding_key: EncodingKey) -> Self {
        Self {
            encoding_key,
            header: Header::new(SIGNING_ALGORITHM),
        }
    }
}

impl Signer for TokenSigner {
    fn sign(&self, token: &AuthToken) -> Result<String, TokenError> {
        encode(&self.header, token, &self.encoding_key).map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// ES256 verifier holding the public half of the keypair.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(decoding_key: DecodingKey) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Claims carry their own millisecond expiration instead of `exp`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            decoding_key,
            validation,
        }
    }
}

impl Verifier for TokenVerifier {
    fn verify(&self, token: &str) -> Result<AuthToken, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        if header.alg != SIGNING_ALGORITHM {
            debug!(alg = ?header.alg, "Rejecting token with unexpected algorithm");
            return Err(TokenError::UnsupportedAlgorithm {
                found: format!("{:?}", header.alg),
                expected: format!("{:?}", SIGNING_ALGORITHM),
            });
        }

        decode::<AuthToken>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm {
                    found: format!("{:?}", header.alg),
                    expected: format!("{:?}", SIGNING_ALGORITHM),
                },
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}
