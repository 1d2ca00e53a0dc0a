//! HSM session adapter
//!
//! The ceremony flows never talk to a PKCS#11 library directly; they go through
//! [`HsmModule`] and [`HsmSession`]. The production implementation is
//! [`Pkcs11Module`]. Tests run the same flows against an in-memory token.
//!
//! A session is opened per ceremony against one slot and is logged in for its
//! whole lifetime. Dropping the session logs out, closes it and finalises the
//! library, so every exit path releases the token.

mod pin;
pub mod pkcs11;
#[cfg(test)]
pub mod simulation;

pub use pin::{prompt_pin, Pin};
pub use pkcs11::Pkcs11Module;

use crate::algorithms::{EcdsaCurve, HashAlgorithm, KeySpec, SignatureAlgorithm};
use crate::error::HsmResult;
use std::fmt;
use std::path::Path;

/// Which token to open and how to log in
#[derive(Debug, Clone, Copy)]
pub struct SessionTarget<'a> {
    /// Path of the vendor PKCS#11 shared library
    pub module: &'a Path,
    /// Slot ID (not index) of the token
    pub slot: u64,
    /// User PIN; the operator is prompted when absent
    pub pin: Option<&'a Pin>,
}

/// Public half of an HSM key pair as exported by the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// Big-endian modulus and public exponent
    Rsa {
        modulus: Vec<u8>,
        public_exponent: Vec<u8>,
    },
    /// Uncompressed SEC1 point (`04 || X || Y`) on a named curve
    Ec { curve: EcdsaCurve, point: Vec<u8> },
}

/// Signing mechanisms used by the ceremonies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMechanism {
    /// PKCS#1 v1.5 over the message, hashed inside the token
    RsaPkcs(HashAlgorithm),
    /// Raw ECDSA over a digest computed by the caller; returns `r || s`
    Ecdsa,
}

impl From<SignatureAlgorithm> for SignMechanism {
    fn from(algorithm: SignatureAlgorithm) -> Self {
        if algorithm.is_rsa() {
            SignMechanism::RsaPkcs(algorithm.hash())
        } else {
            SignMechanism::Ecdsa
        }
    }
}

/// Object handles of a freshly generated key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPairHandles<H> {
    pub public: H,
    pub private: H,
}

/// A loadable HSM
pub trait HsmModule {
    type Session: HsmSession;

    /// Load the module, select the slot and log in as the user
    fn open_session(&self, target: &SessionTarget<'_>) -> HsmResult<Self::Session>;
}

/// A logged-in session on one token
pub trait HsmSession {
    type Handle: Copy + fmt::Debug;

    /// Generate a non-extractable signing key pair stored under `label`
    ///
    /// Fails with [`HsmError::LabelExists`](crate::error::HsmError::LabelExists)
    /// if a private key with that label is already present.
    fn generate_key_pair(
        &self,
        label: &str,
        spec: &KeySpec,
    ) -> HsmResult<KeyPairHandles<Self::Handle>>;

    fn public_key(&self, handle: Self::Handle) -> HsmResult<PublicKeyMaterial>;

    /// Set `CKA_ID` on both halves of a key pair
    fn set_key_id(&self, pair: &KeyPairHandles<Self::Handle>, id: &[u8]) -> HsmResult<()>;

    /// Find exactly one private key by label and ID
    fn find_private_key(&self, label: &str, id: &[u8]) -> HsmResult<Self::Handle>;

    fn sign(
        &self,
        key: Self::Handle,
        mechanism: SignMechanism,
        data: &[u8],
    ) -> HsmResult<Vec<u8>>;

    /// Bytes from the token's random number generator
    fn random_bytes(&self, len: usize) -> HsmResult<Vec<u8>>;
}
