use crate::ceremony::{CeremonyKind, CeremonyOutcome};
use crate::error::CeremonyError;
use crate::generate_keypair::generate;
use crate::hsm::{HsmModule, HsmSession};
use crate::outputs::{
    check_distinct_outputs, check_output_path, write_certificate, write_public_key,
};
use crate::pki_generator::{issue_certificate, subject_public_key_info};
use crate::templates::{
    serial_from_random, CertificateDataType, CertificateTemplateBuilder, SERIAL_LEN,
};
use crate::validation::RootCeremony;

/// Checks that must pass before the HSM is opened
pub fn preflight(plan: &RootCeremony) -> Result<(), CeremonyError> {
    check_distinct_outputs(&plan.public_key_path, &plan.certificate_path)?;
    check_output_path("outputs.public-key-path", &plan.public_key_path)?;
    check_output_path("outputs.certificate-path", &plan.certificate_path)?;
    Ok(())
}

/// Run a root ceremony
///
/// This command:
/// 1. Generates the root key pair in the HSM
/// 2. Self-signs a root CA certificate with it
/// 3. Writes the public key and certificate as PEM
///
/// Nothing is written unless the certificate has been signed and verified.
///
/// # Arguments
///
/// * `plan` - Validated root ceremony
/// * `hsm` - Module used to open the session on the configured slot
pub fn handle_root_ceremony<M: HsmModule>(
    plan: &RootCeremony,
    hsm: &M,
) -> Result<CeremonyOutcome, CeremonyError> {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("  ROOT CA CEREMONY");
    println!("═══════════════════════════════════════════════════════════\n");

    let session = hsm.open_session(&plan.storage.session_target())?;

    println!("1️⃣  Generating {} key pair...", plan.key);
    let key = generate(
        &session,
        plan.storage.slot,
        &plan.storage.label,
        &plan.key,
    )?;

    println!("\n2️⃣  Self-signing root certificate...");
    let template = CertificateTemplateBuilder::new(&plan.profile, CertificateDataType::RootCA)
        .subject_public_key(subject_public_key_info(&key.public_key)?)
        .serial(serial_from_random(session.random_bytes(SERIAL_LEN)?))
        .build()?;
    let certificate = issue_certificate(&session, key.handles.private, template, &key.public_key)?;
    println!("   ✓ Signed and verified: {}", plan.profile.common_name);
    drop(session);

    println!("\n3️⃣  Writing outputs...");
    write_public_key(&plan.public_key_path, &key.public_key)?;
    write_certificate(&plan.certificate_path, &certificate)?;

    println!("\n═══════════════════════════════════════════════════════════");
    println!("  ✓ ROOT CA CEREMONY COMPLETE");
    println!("═══════════════════════════════════════════════════════════\n");

    Ok(CeremonyOutcome {
        kind: CeremonyKind::Root,
        key_id: Some(key.key_id),
        public_key_path: Some(plan.public_key_path.clone()),
        certificate_path: Some(plan.certificate_path.clone()),
    })
}
