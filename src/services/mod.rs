//! Fleet services
//!
//! The components jobs are built from: provisioning, provider
//! initialization, mirror linking, replication verification and key
//! rotation, plus the signing-service client, local key generator and secret
//! cipher they depend on.

pub mod command_log;
pub mod initializer;
pub mod key_rotation;
pub mod keygen;
pub mod mirror;
pub mod provisioner;
pub mod replication_verifier;
pub mod secret_cipher;
pub mod signing_service;

pub use initializer::ProviderInitializer;
pub use key_rotation::{KeyRotator, RotationOutcome};
pub use mirror::MirrorLinker;
pub use provisioner::FleetProvisioner;
pub use replication_verifier::ReplicationVerifier;
pub use secret_cipher::SecretCipher;
pub use signing_service::SigningServiceClient;
