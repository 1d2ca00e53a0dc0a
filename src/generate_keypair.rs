//! HSM Key Pair Generation Module
//!
//! Generates a signing key pair inside the token, exports the public half and
//! tags the pair with a short identifier derived from the public key.
//!
//! # Steps
//! 1. Generate the pair under the requested label (label collisions are fatal)
//! 2. Read the public key back and rebuild it as an openssl key
//! 3. Derive the [`KeyIdentifier`] and store it as `CKA_ID` on both halves
//! 4. Self-test: sign a random challenge in the HSM, verify it in software
//! 5. Announce the key on stdout
//!
//! The announcement line has a fixed shape that operators and scripts parse:
//!
//! ```text
//! Key pair generated in slot 0 with label "root signing key" and ID 3fa0c1d2
//! ```

use crate::algorithms::{KeySpec, SignatureAlgorithm};
use crate::error::CeremonyError;
use crate::hsm::{HsmSession, KeyPairHandles, PublicKeyMaterial};
use crate::pki_generator::sign_message;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, EcPoint};
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use openssl::sign::Verifier;
use sha2::{Digest, Sha256};
use std::fmt;

const KEY_ID_LEN: usize = 4;
const SELF_TEST_CHALLENGE_LEN: usize = 32;

/// Short identifier of a generated key: the first four bytes of the SHA-256
/// digest of its DER SubjectPublicKeyInfo, shown as eight lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyIdentifier([u8; KEY_ID_LEN]);

impl KeyIdentifier {
    pub fn from_spki_der(spki_der: &[u8]) -> Self {
        let digest = Sha256::digest(spki_der);
        let mut id = [0u8; KEY_ID_LEN];
        id.copy_from_slice(&digest[..KEY_ID_LEN]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A key pair that now lives in the HSM
#[derive(Debug)]
pub struct GeneratedKey<H> {
    pub public_key: PKey<Public>,
    pub key_id: KeyIdentifier,
    pub handles: KeyPairHandles<H>,
}

/// Rebuild token-exported public key material as an openssl key
pub fn public_key_from_material(
    material: &PublicKeyMaterial,
) -> Result<PKey<Public>, CeremonyError> {
    match material {
        PublicKeyMaterial::Rsa {
            modulus,
            public_exponent,
        } => {
            let rsa = Rsa::from_public_components(
                BigNum::from_slice(modulus)?,
                BigNum::from_slice(public_exponent)?,
            )?;
            Ok(PKey::from_rsa(rsa)?)
        }
        PublicKeyMaterial::Ec { curve, point } => {
            let group = EcGroup::from_curve_name(curve.nid())?;
            let mut ctx = BigNumContext::new()?;
            let point = EcPoint::from_bytes(&group, point, &mut ctx)
                .map_err(|e| CeremonyError::InvalidPublicKey(format!("EC point: {}", e)))?;
            let ec_key = EcKey::from_public_key(&group, &point)?;
            ec_key
                .check_key()
                .map_err(|e| CeremonyError::InvalidPublicKey(format!("EC key: {}", e)))?;
            Ok(PKey::from_ec_key(ec_key)?)
        }
    }
}

fn check_material(spec: &KeySpec, material: &PublicKeyMaterial) -> Result<(), CeremonyError> {
    match (spec, material) {
        (KeySpec::Rsa { mod_length }, PublicKeyMaterial::Rsa { modulus, .. }) => {
            let bits = BigNum::from_slice(modulus)?.num_bits();
            if bits as u32 != mod_length.bits() {
                return Err(CeremonyError::InvalidPublicKey(format!(
                    "expected a {}-bit modulus, HSM returned {} bits",
                    mod_length.bits(),
                    bits
                )));
            }
            Ok(())
        }
        (KeySpec::Ecdsa { curve }, PublicKeyMaterial::Ec { curve: actual, .. }) => {
            if curve != actual {
                return Err(CeremonyError::InvalidPublicKey(format!(
                    "expected curve {}, HSM returned {}",
                    curve, actual
                )));
            }
            Ok(())
        }
        _ => Err(CeremonyError::InvalidPublicKey(format!(
            "HSM returned a key of the wrong type for {}",
            spec
        ))),
    }
}

/// Sign a random challenge with the new private key and verify the result
/// against the exported public key
fn self_test<S: HsmSession>(
    session: &S,
    private: S::Handle,
    algorithm: SignatureAlgorithm,
    public_key: &PKey<Public>,
) -> Result<(), CeremonyError> {
    let challenge = session.random_bytes(SELF_TEST_CHALLENGE_LEN)?;
    let signature = sign_message(session, private, algorithm, &challenge)?;

    let mut verifier = Verifier::new(algorithm.hash().message_digest(), public_key)?;
    verifier.update(&challenge)?;
    if !verifier.verify(&signature).unwrap_or(false) {
        return Err(CeremonyError::SelfTestFailed);
    }
    Ok(())
}

/// Generate a key pair in the HSM and return its public key and identifier
///
/// # Arguments
/// * `session` - Logged-in session on the target token
/// * `slot` - Slot ID, used in the announcement line
/// * `label` - `CKA_LABEL` for both halves of the pair
/// * `spec` - Validated key parameters
///
/// # Errors
/// Returns an error if the label is already taken, generation fails, the
/// exported public key does not match `spec`, or the self-test fails.
pub fn generate<S: HsmSession>(
    session: &S,
    slot: u64,
    label: &str,
    spec: &KeySpec,
) -> Result<GeneratedKey<S::Handle>, CeremonyError> {
    tracing::info!(target: "ceremony", %spec, label, slot, "generating key pair");
    let handles = session.generate_key_pair(label, spec)?;

    let material = session.public_key(handles.public)?;
    check_material(spec, &material)?;
    let public_key = public_key_from_material(&material)?;

    let key_id = KeyIdentifier::from_spki_der(&public_key.public_key_to_der()?);
    session.set_key_id(&handles, key_id.as_bytes())?;

    self_test(
        session,
        handles.private,
        spec.self_test_algorithm(),
        &public_key,
    )?;
    tracing::debug!(target: "ceremony", key_id = %key_id, "key self-test passed");

    println!(
        "Key pair generated in slot {} with label \"{}\" and ID {}",
        slot, label, key_id
    );

    Ok(GeneratedKey {
        public_key,
        key_id,
        handles,
    })
}
