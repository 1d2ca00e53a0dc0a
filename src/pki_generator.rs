//! HSM-backed certificate issuance
//!
//! The private key never leaves the token, so openssl's X509 builder cannot
//! sign. Instead the `TBSCertificate` from [`crate::templates`] is DER encoded,
//! signed through the HSM session and assembled into a `Certificate`. The
//! result is parsed back with openssl and its signature verified against the
//! issuer public key before anyone gets to see it.

use crate::algorithms::{EcdsaCurve, KeyAlgorithm, SignatureAlgorithm};
use crate::error::{CeremonyError, HsmError};
use crate::hsm::{HsmSession, SignMechanism};
use crate::templates::{CertificateTemplate, IssuerContext};
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::hash;
use openssl::pkey::{Id, PKey, PKeyRef, Public};
use openssl::x509::{X509, X509Ref};
use x509_cert::der::asn1::BitString;
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

/// Sign `message` with an HSM key, producing an X.509-style signature value
///
/// RSA signatures are PKCS#1 v1.5 computed entirely in the token. For ECDSA the
/// digest is computed here, the token signs it and the raw `r || s` it returns
/// is re-encoded as a DER `ECDSA-Sig-Value`.
pub fn sign_message<S: HsmSession>(
    session: &S,
    key: S::Handle,
    algorithm: SignatureAlgorithm,
    message: &[u8],
) -> Result<Vec<u8>, CeremonyError> {
    match SignMechanism::from(algorithm) {
        mechanism @ SignMechanism::RsaPkcs(_) => Ok(session.sign(key, mechanism, message)?),
        SignMechanism::Ecdsa => {
            let digest = hash(algorithm.hash().message_digest(), message)?;
            let raw = session.sign(key, SignMechanism::Ecdsa, &digest)?;
            ecdsa_raw_to_der(&raw)
        }
    }
}

fn ecdsa_raw_to_der(raw: &[u8]) -> Result<Vec<u8>, CeremonyError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(HsmError::SigningFailed(format!(
            "malformed ECDSA signature of {} bytes",
            raw.len()
        ))
        .into());
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
    Ok(sig.to_der()?)
}

/// Algorithm family of a public key, for signature algorithm compatibility
pub fn key_algorithm(key: &PKeyRef<Public>) -> Result<KeyAlgorithm, CeremonyError> {
    let id = key.id();
    if id == Id::RSA {
        Ok(KeyAlgorithm::Rsa)
    } else if id == Id::EC {
        key.ec_key()?
            .group()
            .curve_name()
            .and_then(EcdsaCurve::from_nid)
            .map(KeyAlgorithm::Ecdsa)
            .ok_or_else(|| CeremonyError::InvalidPublicKey("unsupported EC curve".to_string()))
    } else {
        Err(CeremonyError::InvalidPublicKey(format!(
            "unsupported key type {:?}",
            id
        )))
    }
}

/// DER SubjectPublicKeyInfo of an openssl key, as an x509-cert structure
pub fn subject_public_key_info(
    key: &PKeyRef<Public>,
) -> Result<SubjectPublicKeyInfoOwned, CeremonyError> {
    Ok(SubjectPublicKeyInfoOwned::from_der(&key.public_key_to_der()?)?)
}

/// Issuer name and key taken verbatim from an issuer certificate
pub fn issuer_context(issuer: &X509Ref) -> Result<IssuerContext, CeremonyError> {
    let certificate = Certificate::from_der(&issuer.to_der()?)?;
    Ok(IssuerContext {
        name: certificate.tbs_certificate.subject,
        public_key: certificate.tbs_certificate.subject_public_key_info,
    })
}

/// Sign a certificate template with an HSM key and verify the result
///
/// # Arguments
/// * `session` - Session holding the issuer's private key
/// * `key` - Handle of the issuer private key
/// * `template` - Unsigned certificate from the template builder
/// * `issuer_key` - Issuer public key (the subject key for a self-signed root)
///
/// # Errors
/// Returns [`CeremonyError::VerificationFailed`] if the signed certificate does
/// not verify under `issuer_key`, e.g. when the HSM key is not the issuer's.
pub fn issue_certificate<S: HsmSession>(
    session: &S,
    key: S::Handle,
    template: CertificateTemplate,
    issuer_key: &PKeyRef<Public>,
) -> Result<X509, CeremonyError> {
    let tbs_der = template.tbs.to_der()?;
    let signature = sign_message(session, key, template.signature_algorithm, &tbs_der)?;

    let certificate = Certificate {
        signature_algorithm: template.tbs.signature.clone(),
        tbs_certificate: template.tbs,
        signature: BitString::from_bytes(&signature)?,
    };
    let x509 = X509::from_der(&certificate.to_der()?)?;

    if !x509.verify(issuer_key).unwrap_or(false) {
        return Err(CeremonyError::VerificationFailed);
    }
    tracing::debug!(
        target: "ceremony",
        algorithm = %template.signature_algorithm,
        "certificate signature verified"
    );
    Ok(x509)
}

/// Parse a PEM public key (SubjectPublicKeyInfo)
pub fn public_key_from_pem(pem: &[u8]) -> Result<PKey<Public>, CeremonyError> {
    Ok(PKey::public_key_from_pem(pem)?)
}
