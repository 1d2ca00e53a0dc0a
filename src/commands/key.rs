use crate::ceremony::{CeremonyKind, CeremonyOutcome};
use crate::error::CeremonyError;
use crate::generate_keypair::generate;
use crate::hsm::HsmModule;
use crate::outputs::{check_output_path, write_public_key};
use crate::validation::KeyCeremony;

pub fn preflight(plan: &KeyCeremony) -> Result<(), CeremonyError> {
    check_output_path("outputs.public-key-path", &plan.public_key_path)
}

/// Run a key ceremony: generate a key pair in the HSM and export its public key
///
/// The exported key is typically the input of a later intermediate ceremony.
pub fn handle_key_ceremony<M: HsmModule>(
    plan: &KeyCeremony,
    hsm: &M,
) -> Result<CeremonyOutcome, CeremonyError> {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("  KEY CEREMONY");
    println!("═══════════════════════════════════════════════════════════\n");

    let session = hsm.open_session(&plan.storage.session_target())?;

    println!("1️⃣  Generating {} key pair...", plan.key);
    let key = generate(
        &session,
        plan.storage.slot,
        &plan.storage.label,
        &plan.key,
    )?;
    drop(session);

    println!("\n2️⃣  Writing outputs...");
    write_public_key(&plan.public_key_path, &key.public_key)?;

    println!("\n═══════════════════════════════════════════════════════════");
    println!("  ✓ KEY CEREMONY COMPLETE");
    println!("═══════════════════════════════════════════════════════════\n");

    Ok(CeremonyOutcome {
        kind: CeremonyKind::Key,
        key_id: Some(key.key_id),
        public_key_path: Some(plan.public_key_path.clone()),
        certificate_path: None,
    })
}
