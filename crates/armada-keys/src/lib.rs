// armada-keys: SSH keypair management for worker node access.

pub mod ssh;
pub mod store;

pub use store::{KeyCheck, KeyInfo, KeyManager, KeyPair};
