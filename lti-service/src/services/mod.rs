//! Core of the LTI platform: key resolution, launch claims, token codec and
//! deep-linking intake, over a pluggable document store.

pub mod claims;
mod database;
pub mod error;
pub mod intake;
pub mod keys;
pub mod metrics;
mod store;
pub mod token;

pub use claims::{ClaimsBuilder, LaunchClaims, LaunchRequest, LaunchRequestType};
pub use database::MongoStore;
pub use error::LtiError;
pub use intake::{ContentItemIntake, IntakeOutcome, IntakeReceipt};
pub use keys::{Jwks, JwksCache, KeyManager, PlatformKeySet, PublicJwk};
pub use store::{InMemoryStore, LtiStore};
pub use token::{TokenCodec, UnverifiedClaims, VerifiedClaims};
