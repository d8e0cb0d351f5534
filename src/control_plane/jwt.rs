use std::collections::BTreeMap;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;

/// RSA PEM key material mounted into the operator pod.
pub const JWT_PUBLIC_KEY_PATH: &str = "/etc/control-plane-jwt/jwt.pub";
pub const JWT_PRIVATE_KEY_PATH: &str = "/etc/control-plane-jwt/jwt.key";

/// Claims carried by issued tokens. Tokens have no expiry by design; the
/// subject claim is mandatory.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(flatten)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

/// Signs and verifies RS256 tokens with RSA PEM key material loaded at
/// startup. Malformed keys abort the process before any controller runs.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    /// Loads the key pair from the mounted secret paths.
    pub fn from_key_files() -> anyhow::Result<Self> {
        let public_pem = std::fs::read(JWT_PUBLIC_KEY_PATH)
            .map_err(|e| anyhow::anyhow!("failed to read JWT public key {JWT_PUBLIC_KEY_PATH}: {e}"))?;
        let private_pem = std::fs::read(JWT_PRIVATE_KEY_PATH)
            .map_err(|e| anyhow::anyhow!("failed to read JWT private key {JWT_PRIVATE_KEY_PATH}: {e}"))?;
        let manager = Self::from_pem(&public_pem, &private_pem)?;
        info!("JWT manager initialized");
        Ok(manager)
    }

    pub fn from_pem(public_pem: &[u8], private_pem: &[u8]) -> anyhow::Result<Self> {
        Ok(JwtManager {
            encoding_key: EncodingKey::from_rsa_pem(private_pem)
                .map_err(|e| anyhow::anyhow!("failed to parse JWT private key: {e}"))?,
            decoding_key: DecodingKey::from_rsa_pem(public_pem)
                .map_err(|e| anyhow::anyhow!("failed to parse JWT public key: {e}"))?,
        })
    }

    /// Issues a token for `subject` with optional extra claims and no expiry.
    pub fn generate_token(
        &self,
        subject: &str,
        custom: Option<BTreeMap<String, serde_json::Value>>,
    ) -> anyhow::Result<String> {
        if subject.is_empty() {
            anyhow::bail!("token subject must not be empty");
        }

        let claims = TokenClaims {
            sub: subject.to_string(),
            custom: custom.unwrap_or_default(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("failed to sign token: {e}"))
    }

    /// Verifies a token's signature and returns its claims. Expiry is not
    /// validated since issued tokens carry none.
    pub fn verify_token(&self, token: &str) -> anyhow::Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("failed to parse token: {e}"))?;

        if data.claims.sub.is_empty() {
            anyhow::bail!("token carries no subject");
        }

        Ok(data.claims)
    }
}
