//! Time-limited TURN credentials in the shared-secret REST scheme coturn
//! understands: the username carries the expiry, the credential is an
//! HMAC-SHA1 of the username keyed by the server secret.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arcade_proto::RelayCredentials;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

use crate::transport::IceServer;

type HmacSha1 = Hmac<Sha1>;

const CREDENTIAL_USER: &str = "beach-arcade";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("TURN_SECRET_KEY is not configured")]
    MissingSecret,
    #[error("invalid TURN secret: {0}")]
    InvalidSecret(String),
}

#[derive(Clone)]
pub struct TurnCredentialIssuer {
    secret: Option<String>,
    host: Option<String>,
    port: u16,
    ttl: Duration,
}

impl TurnCredentialIssuer {
    pub fn new(secret: Option<String>, host: Option<String>, port: u16, ttl: Duration) -> Self {
        Self {
            secret,
            host,
            port,
            ttl,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Issues credentials valid for the configured ttl from `now`.
    /// `fallback_host` is used when no TURN host is configured, normally the
    /// host the viewer reached us on.
    pub fn issue(
        &self,
        now: SystemTime,
        fallback_host: &str,
    ) -> Result<RelayCredentials, TurnError> {
        let secret = self.secret.as_deref().ok_or(TurnError::MissingSecret)?;
        let expiry = now
            .checked_add(self.ttl)
            .unwrap_or(now)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let username = format!("{expiry}:{CREDENTIAL_USER}");
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .map_err(|e| TurnError::InvalidSecret(e.to_string()))?;
        mac.update(username.as_bytes());
        let credential = STANDARD.encode(mac.finalize().into_bytes());

        let host = self.host.as_deref().unwrap_or(fallback_host);
        Ok(RelayCredentials {
            username,
            credential,
            ttl: self.ttl.as_secs(),
            turn_urls: vec![format!("turn:{host}:{}", self.port)],
            stun_urls: vec![format!("stun:{host}:{}", self.port)],
        })
    }

    pub fn ice_servers(
        &self,
        now: SystemTime,
        fallback_host: &str,
    ) -> Result<Vec<IceServer>, TurnError> {
        let creds = self.issue(now, fallback_host)?;
        Ok(vec![
            IceServer {
                urls: creds.stun_urls,
                username: creds.username.clone(),
                credential: creds.credential.clone(),
            },
            IceServer {
                urls: creds.turn_urls,
                username: creds.username,
                credential: creds.credential,
            },
        ])
    }
}
