//! Signing-key rotation policy

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where new signing keys come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationBackend {
    /// HTTP signing service that mints and revokes keys by id
    RemoteSigningService,
    /// `keygen.jar` run locally, producing a keystore file
    LocalKeystore,
}

impl RotationBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteSigningService => "remote-signing-service",
            Self::LocalKeystore => "local-keystore",
        }
    }
}

impl FromStr for RotationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote-signing-service" | "oxeleven" => Ok(Self::RemoteSigningService),
            "local-keystore" | "jks" => Ok(Self::LocalKeystore),
            _ => Err(format!("Unknown rotation backend: {}", s)),
        }
    }
}

impl fmt::Display for RotationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A secret sealed with its own one-time key and IV, all base64 encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub ciphertext: String,
    pub key: String,
    pub iv: String,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub id: i64,
    pub interval_days: i64,
    pub backend: RotationBackend,
    pub signing_service_url: Option<String>,
    pub token: Option<SealedSecret>,
    pub rotated_at: Option<DateTime<Utc>>,
    /// Anchor identifier of the authentication service's configuration entry
    pub inum_appliance: Option<String>,
}

impl RotationPolicy {
    pub fn interval(&self) -> Duration {
        Duration::days(self.interval_days)
    }

    /// When the next rotation falls due; `None` if never rotated
    pub fn next_rotation_at(&self) -> Option<DateTime<Utc>> {
        self.rotated_at.map(|at| at + self.interval())
    }

    pub fn should_rotate_at(&self, now: DateTime<Utc>) -> bool {
        match self.next_rotation_at() {
            None => true,
            Some(due) => now > due,
        }
    }

    pub fn should_rotate(&self) -> bool {
        self.should_rotate_at(Utc::now())
    }
}

/// A key id currently live on the signing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveKey {
    pub id: i64,
    pub kid: String,
}
