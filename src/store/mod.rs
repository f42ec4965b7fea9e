//! Persisted saved-network list.

pub mod credentials;
pub mod record;

pub use credentials::CredentialStore;
pub use record::{AuthFlags, CredentialRecord, Secret, Ssid};
