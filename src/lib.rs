//! PKI Ceremony - Offline CA key ceremonies backed by an HSM
//!
//! Runs one ceremony per invocation from a YAML description:
//!
//! ```text
//! root          generate a key in the HSM, self-sign a root CA certificate
//! key           generate a key in the HSM, export its public key
//! intermediate  sign an exported public key with an HSM-resident root key
//! ```
//!
//! Chaining them builds a two-tier hierarchy:
//!
//! ```text
//! Root CA (self-signed, pathlen=1)       ← root ceremony
//!   └── Intermediate CA (pathlen=0)      ← key ceremony, then intermediate ceremony
//! ```
//!
//! Private keys are generated inside the token and never leave it. A generated
//! key is identified by its label plus a short hex key ID, printed as
//!
//! ```text
//! Key pair generated in slot 0 with label "root key" and ID 3fa0c1d2
//! ```
//!
//! and returned in [`ceremony::CeremonyOutcome`]. A later intermediate ceremony
//! addresses the issuer key with that label and ID.
//!
//! # Configuration
//!
//! Every config is validated in full before any hardware or file is touched;
//! a violation is reported as a fixed message naming the offending field
//! (see [`error::ConfigError`]).
//!
//! ```yaml
//! ceremony-type: root
//! pkcs11:
//!   module: /usr/lib/softhsm/libsofthsm2.so
//!   store-key-in-slot: 0
//!   store-key-with-label: root key
//! key:
//!   type: ecdsa
//!   ecdsa-curve: P-384
//! outputs:
//!   public-key-path: root.pub.pem
//!   certificate-path: root.cert.pem
//! certificate-profile:
//!   signature-algorithm: ECDSAWithSHA384
//!   common-name: Example Root X1
//!   organization: Example Org
//!   country: US
//!   not-before: 2024-01-01 00:00:00
//!   not-after: 2044-01-01 00:00:00
//! ```
//!
//! # Library Usage
//!
//! ```no_run
//! use pki_ceremony::ceremony;
//! use pki_ceremony::configs::CeremonyConfig;
//! use pki_ceremony::hsm::Pkcs11Module;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = CeremonyConfig::from_file(Path::new("root.yaml"))?;
//!     let outcome = ceremony::run(&config, &Pkcs11Module)?;
//!     if let Some(key_id) = outcome.key_id {
//!         println!("root key ID: {}", key_id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod algorithms;
pub mod ceremony;
pub mod commands;
pub mod configs;
pub mod error;
pub mod generate_keypair;
pub mod hsm;
pub mod outputs;
pub mod pki_generator;
pub mod templates;
pub mod validation;

pub use ceremony::{CeremonyKind, CeremonyOutcome};
pub use configs::CeremonyConfig;
pub use error::{CeremonyError, ConfigError, HsmError};
pub use generate_keypair::KeyIdentifier;
