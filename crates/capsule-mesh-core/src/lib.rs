//! Capsule Mesh core: everything a node needs before touching the network:
//! configuration, publisher identity, the capsule trust invariant, and the
//! verified on-disk capsule store.

pub mod capsule;
pub mod config;
pub mod identity;
pub mod observability;
pub mod path_validation;
pub mod store;

pub use capsule::{Capsule, CapsuleManifest, TrustError};
pub use identity::{generate_keypair, hash, sign, verify, KeyError, Keypair};
pub use store::{CapsuleStore, StoreError};
