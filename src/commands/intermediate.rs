use crate::algorithms::KeyAlgorithm;
use crate::ceremony::{CeremonyKind, CeremonyOutcome};
use crate::error::CeremonyError;
use crate::hsm::{HsmModule, HsmSession};
use crate::outputs::{check_output_path, read_input, write_certificate};
use crate::pki_generator::{
    issue_certificate, issuer_context, key_algorithm, public_key_from_pem,
    subject_public_key_info,
};
use crate::templates::{
    serial_from_random, CertificateDataType, CertificateTemplateBuilder, SERIAL_LEN,
};
use crate::validation::IntermediateCeremony;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use std::fmt;
use std::path::Path;

/// Inputs of an intermediate ceremony, loaded and checked before the HSM is opened
#[derive(Debug)]
pub struct IntermediateInputs {
    pub subject_key: PKey<Public>,
    pub issuer_certificate: X509,
    pub issuer_key: PKey<Public>,
    pub issuer_algorithm: KeyAlgorithm,
    pub signing_key_id: Vec<u8>,
}

fn parse_error(path: &Path, reason: impl fmt::Display) -> CeremonyError {
    CeremonyError::ParseInput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Load the subject key and issuer certificate and check them against the profile
///
/// # Errors
/// Fails if the output exists, an input cannot be read or parsed, the
/// signing key ID is not hex, or the profile's signature algorithm cannot be
/// produced by the issuer's key.
pub fn preflight(plan: &IntermediateCeremony) -> Result<IntermediateInputs, CeremonyError> {
    check_output_path("outputs.certificate-path", &plan.certificate_path)?;

    let signing_key_id = hex::decode(&plan.signer.key_id)
        .map_err(|_| CeremonyError::MalformedKeyId(plan.signer.key_id.clone()))?;

    let subject_path = &plan.public_key_path;
    let subject_key = public_key_from_pem(&read_input(subject_path)?)
        .map_err(|e| parse_error(subject_path, e))?;
    key_algorithm(&subject_key).map_err(|e| parse_error(subject_path, e))?;

    let issuer_path = &plan.issuer_certificate_path;
    let issuer_certificate =
        X509::from_pem(&read_input(issuer_path)?).map_err(|e| parse_error(issuer_path, e))?;
    let issuer_key = issuer_certificate
        .public_key()
        .map_err(|e| parse_error(issuer_path, e))?;
    let issuer_algorithm = key_algorithm(&issuer_key).map_err(|e| parse_error(issuer_path, e))?;

    plan.profile.signature_algorithm.check_key(issuer_algorithm)?;

    Ok(IntermediateInputs {
        subject_key,
        issuer_certificate,
        issuer_key,
        issuer_algorithm,
        signing_key_id,
    })
}

/// Run an intermediate ceremony
///
/// This command:
/// 1. Locates the issuer private key in the HSM by label and ID
/// 2. Signs an intermediate CA certificate for the input public key
/// 3. Writes the certificate as PEM
///
/// # Arguments
///
/// * `plan` - Validated intermediate ceremony
/// * `inputs` - Result of [`preflight`]
/// * `hsm` - Module used to open the session on the signing slot
pub fn handle_intermediate_ceremony<M: HsmModule>(
    plan: &IntermediateCeremony,
    inputs: IntermediateInputs,
    hsm: &M,
) -> Result<CeremonyOutcome, CeremonyError> {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("  INTERMEDIATE CA CEREMONY");
    println!("═══════════════════════════════════════════════════════════\n");

    println!("📄 Public key: {}", plan.public_key_path.display());
    println!("📄 Issuer certificate: {}", plan.issuer_certificate_path.display());

    let session = hsm.open_session(&plan.signer.session_target())?;

    println!("\n1️⃣  Locating issuer key...");
    let issuer_handle =
        session.find_private_key(&plan.signer.label, &inputs.signing_key_id)?;
    println!(
        "   ✓ Found \"{}\" with ID {}",
        plan.signer.label, plan.signer.key_id
    );
    tracing::info!(
        target: "ceremony",
        label = %plan.signer.label,
        key_id = %plan.signer.key_id,
        issuer_key = inputs.issuer_algorithm.type_name(),
        "issuer key located"
    );

    println!("\n2️⃣  Signing intermediate certificate...");
    let template =
        CertificateTemplateBuilder::new(&plan.profile, CertificateDataType::IntermediateCA)
            .subject_public_key(subject_public_key_info(&inputs.subject_key)?)
            .issuer(issuer_context(&inputs.issuer_certificate)?)
            .serial(serial_from_random(session.random_bytes(SERIAL_LEN)?))
            .build()?;
    let certificate = issue_certificate(&session, issuer_handle, template, &inputs.issuer_key)?;
    println!("   ✓ Signed and verified: {}", plan.profile.common_name);
    drop(session);

    println!("\n3️⃣  Writing outputs...");
    write_certificate(&plan.certificate_path, &certificate)?;

    println!("\n═══════════════════════════════════════════════════════════");
    println!("  ✓ INTERMEDIATE CA CEREMONY COMPLETE");
    println!("═══════════════════════════════════════════════════════════\n");

    Ok(CeremonyOutcome {
        kind: CeremonyKind::Intermediate,
        key_id: None,
        public_key_path: None,
        certificate_path: Some(plan.certificate_path.clone()),
    })
}
