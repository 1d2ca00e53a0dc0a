//! Ceremony orchestrator
//!
//! One invocation runs exactly one ceremony:
//!
//! ```text
//! Root:          validate -> pre-flight -> GenerateKey -> SelfSign -> WriteOutputs(pubkey, cert)
//! Intermediate:  validate -> pre-flight(inputs) -> LocateIssuerKey -> Sign -> WriteOutput(cert)
//! Key:           validate -> pre-flight -> GenerateKey -> WriteOutput(pubkey)
//! ```
//!
//! Every step either succeeds or aborts the ceremony; nothing is retried.
//! Validation and pre-flight never touch the HSM. Pre-flight rejects output
//! paths that could not be written (missing directory, existing file, root
//! outputs naming the same file), so a key is not generated for a ceremony
//! that cannot finish. Outputs written before a later failure are left in
//! place for the operator to inspect.

use crate::commands::{intermediate, key, root};
use crate::configs::CeremonyConfig;
use crate::error::CeremonyError;
use crate::generate_keypair::KeyIdentifier;
use crate::hsm::HsmModule;
use crate::validation::Ceremony;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Root,
    Intermediate,
    Key,
}

impl fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CeremonyKind::Root => "root",
            CeremonyKind::Intermediate => "intermediate",
            CeremonyKind::Key => "key",
        })
    }
}

/// What a completed ceremony produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeremonyOutcome {
    pub kind: CeremonyKind,
    /// Identifier of the generated key; `None` for intermediate ceremonies
    pub key_id: Option<KeyIdentifier>,
    pub public_key_path: Option<PathBuf>,
    pub certificate_path: Option<PathBuf>,
}

/// Validate a ceremony config without touching the HSM or any file
pub fn check(config: &CeremonyConfig) -> Result<Ceremony, CeremonyError> {
    Ok(config.check()?)
}

/// Validate and execute one ceremony against `hsm`
pub fn run<M: HsmModule>(
    config: &CeremonyConfig,
    hsm: &M,
) -> Result<CeremonyOutcome, CeremonyError> {
    let ceremony = check(config)?;
    tracing::info!(target: "ceremony", ceremony = config.ceremony_type(), "config validated");

    let outcome = match ceremony {
        Ceremony::Root(plan) => {
            root::preflight(&plan)?;
            root::handle_root_ceremony(&plan, hsm)?
        }
        Ceremony::Intermediate(plan) => {
            let inputs = intermediate::preflight(&plan)?;
            intermediate::handle_intermediate_ceremony(&plan, inputs, hsm)?
        }
        Ceremony::Key(plan) => {
            key::preflight(&plan)?;
            key::handle_key_ceremony(&plan, hsm)?
        }
    };

    tracing::info!(
        target: "ceremony",
        ceremony = %outcome.kind,
        key_id = %outcome.key_id.map(|id| id.to_string()).unwrap_or_default(),
        "ceremony complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, HsmError};
    use crate::hsm::simulation::SoftHsm;
    use openssl::x509::X509;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const SLOT: u64 = 2;
    const PIN: &str = "1234";

    fn root_yaml(dir: &Path, label: &str) -> String {
        format!(
            r#"
ceremony-type: root
pkcs11:
  module: /usr/lib/softhsm/libsofthsm2.so
  pin: "{PIN}"
  store-key-in-slot: {SLOT}
  store-key-with-label: {label}
key:
  type: ecdsa
  ecdsa-curve: P-256
outputs:
  public-key-path: {dir}/root.pub.pem
  certificate-path: {dir}/root.cert.pem
certificate-profile:
  signature-algorithm: ECDSAWithSHA256
  common-name: Example Root E1
  organization: Example Org
  country: US
  not-before: 2020-01-01 00:00:00
  not-after: 2040-01-01 00:00:00
"#,
            dir = dir.display()
        )
    }

    fn key_yaml(dir: &Path) -> String {
        format!(
            r#"
ceremony-type: key
pkcs11:
  module: /usr/lib/softhsm/libsofthsm2.so
  pin: "{PIN}"
  store-key-in-slot: {SLOT}
  store-key-with-label: intermediate key
key:
  type: rsa
  rsa-mod-length: 2048
outputs:
  public-key-path: {dir}/intermediate.pub.pem
"#,
            dir = dir.display()
        )
    }

    fn intermediate_yaml(dir: &Path, signature_algorithm: &str) -> String {
        format!(
            r#"
ceremony-type: intermediate
pkcs11:
  module: /usr/lib/softhsm/libsofthsm2.so
  pin: "{PIN}"
  signing-key-slot: {SLOT}
  signing-key-label: root key
  signing-key-id: $keyID$
inputs:
  public-key-path: {dir}/intermediate.pub.pem
  issuer-certificate-path: {dir}/root.cert.pem
outputs:
  certificate-path: {dir}/intermediate.cert.pem
certificate-profile:
  signature-algorithm: {signature_algorithm}
  common-name: Example Intermediate R1
  organization: Example Org
  country: US
  not-before: 2020-01-01 00:00:00
  not-after: 2030-01-01 00:00:00
  ocsp-url: http://ocsp.example.org
  crl-url: http://crl.example.org/root.crl
  issuer-url: http://cert.example.org/root.der
"#,
            dir = dir.display()
        )
    }

    fn run_yaml(yaml: &str, hsm: &SoftHsm) -> Result<CeremonyOutcome, CeremonyError> {
        let config = CeremonyConfig::from_yaml(yaml).unwrap();
        run(&config, hsm)
    }

    #[test]
    fn test_root_key_intermediate_chain() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);

        let root = run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        assert_eq!(root.kind, CeremonyKind::Root);
        let root_id = root.key_id.unwrap().to_string();
        assert_eq!(root_id.len(), 8);

        let key = run_yaml(&key_yaml(dir.path()), &hsm).unwrap();
        assert_eq!(key.kind, CeremonyKind::Key);
        assert!(key.certificate_path.is_none());

        let yaml =
            intermediate_yaml(dir.path(), "ECDSAWithSHA256").replacen("$keyID$", &root_id, 1);
        let intermediate = run_yaml(&yaml, &hsm).unwrap();
        assert_eq!(intermediate.kind, CeremonyKind::Intermediate);
        assert!(intermediate.key_id.is_none());

        let read_cert =
            |name: &str| X509::from_pem(&fs::read(dir.path().join(name)).unwrap()).unwrap();
        let root_cert = read_cert("root.cert.pem");
        let intermediate_cert = read_cert("intermediate.cert.pem");
        let root_key = root_cert.public_key().unwrap();

        assert!(root_cert.verify(&root_key).unwrap());
        assert!(intermediate_cert.verify(&root_key).unwrap());
        assert_eq!(
            intermediate_cert.issuer_name().to_der().unwrap(),
            root_cert.subject_name().to_der().unwrap()
        );

        let exported = openssl::pkey::PKey::public_key_from_pem(
            &fs::read(dir.path().join("intermediate.pub.pem")).unwrap(),
        )
        .unwrap();
        assert!(intermediate_cert.public_key().unwrap().public_eq(&exported));
        assert_eq!(hsm.private_key_count(), 2);
    }

    #[test]
    fn test_invalid_config_never_opens_session() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let yaml = root_yaml(dir.path(), "root key").replace("  country: US\n", "");

        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::Config(ConfigError::MissingCountry)
        ));
        assert_hsm_untouched(&hsm);
        assert!(!dir.path().join("root.pub.pem").exists());
    }

    #[test]
    fn test_existing_output_aborts_before_hsm() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        fs::write(dir.path().join("root.cert.pem"), b"previous ceremony").unwrap();

        let err = run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::OutputExists {
                field: "outputs.certificate-path",
                ..
            }
        ));
        assert_eq!(hsm.sessions_opened(), 0);
        assert_eq!(hsm.private_key_count(), 0);
    }

    fn assert_hsm_untouched(hsm: &SoftHsm) {
        assert_eq!(hsm.sessions_opened(), 0);
        assert_eq!(hsm.private_key_count(), 0);
    }

    #[test]
    fn test_unencodable_validity_rejected_before_hsm() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let yaml = root_yaml(dir.path(), "root key")
            .replace("not-before: 2020-01-01 00:00:00", "not-before: 1960-01-01 00:00:00");

        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::Config(ConfigError::NotBeforeOutOfRange)
        ));
        assert_hsm_untouched(&hsm);

        // The label is still free for a corrected config.
        run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        assert_eq!(hsm.private_key_count(), 1);
    }

    #[test]
    fn test_same_output_paths_rejected_before_hsm() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let yaml = root_yaml(dir.path(), "root key").replace("root.cert.pem", "root.pub.pem");

        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::OutputPathCollision(_)));
        assert_hsm_untouched(&hsm);
        assert!(!dir.path().join("root.pub.pem").exists());
    }

    #[test]
    fn test_missing_output_directory_rejected_before_hsm() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let missing = dir.path().join("nope");

        let err = run_yaml(&root_yaml(&missing, "root key"), &hsm).unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::OutputDirMissing {
                field: "outputs.public-key-path",
                ..
            }
        ));
        assert_hsm_untouched(&hsm);

        let err = run_yaml(&key_yaml(&missing), &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::OutputDirMissing { .. }));
        assert_hsm_untouched(&hsm);
    }

    #[test]
    fn test_intermediate_missing_output_directory_rejected_before_hsm() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let root = run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        run_yaml(&key_yaml(dir.path()), &hsm).unwrap();
        let opened = hsm.sessions_opened();

        let yaml = intermediate_yaml(dir.path(), "ECDSAWithSHA256")
            .replacen("$keyID$", &root.key_id.unwrap().to_string(), 1)
            .replace("intermediate.cert.pem", "nope/intermediate.cert.pem");
        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::OutputDirMissing {
                field: "outputs.certificate-path",
                ..
            }
        ));
        assert_eq!(hsm.sessions_opened(), opened);
    }

    #[test]
    fn test_label_collision_is_fatal() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);

        run_yaml(&root_yaml(first.path(), "root key"), &hsm).unwrap();
        let err = run_yaml(&root_yaml(second.path(), "root key"), &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::Hsm(HsmError::LabelExists(_))));
        assert_eq!(hsm.private_key_count(), 1);
        assert!(!second.path().join("root.pub.pem").exists());
    }

    #[test]
    fn test_intermediate_unknown_key_id() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        run_yaml(&key_yaml(dir.path()), &hsm).unwrap();

        let yaml =
            intermediate_yaml(dir.path(), "ECDSAWithSHA256").replacen("$keyID$", "00000000", 1);
        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::Hsm(HsmError::KeyNotFound { .. })));
        assert!(!dir.path().join("intermediate.cert.pem").exists());
    }

    #[test]
    fn test_intermediate_unsubstituted_key_id() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        run_yaml(&key_yaml(dir.path()), &hsm).unwrap();
        let opened = hsm.sessions_opened();

        let yaml = intermediate_yaml(dir.path(), "ECDSAWithSHA256");
        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedKeyId(id) if id == "$keyID$"));
        assert_eq!(hsm.sessions_opened(), opened);
    }

    #[test]
    fn test_intermediate_algorithm_must_fit_issuer_key() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, PIN);
        let root = run_yaml(&root_yaml(dir.path(), "root key"), &hsm).unwrap();
        run_yaml(&key_yaml(dir.path()), &hsm).unwrap();
        let opened = hsm.sessions_opened();

        let yaml = intermediate_yaml(dir.path(), "SHA256WithRSA")
            .replacen("$keyID$", &root.key_id.unwrap().to_string(), 1);
        let err = run_yaml(&yaml, &hsm).unwrap_err();
        assert_eq!(
            err.to_string(),
            "signature-algorithm SHA256WithRSA cannot be used with a key.type = 'ecdsa' key"
        );
        assert_eq!(hsm.sessions_opened(), opened);
    }

    #[test]
    fn test_wrong_pin_aborts() {
        let dir = TempDir::new().unwrap();
        let hsm = SoftHsm::new(SLOT, "87654321");
        let err = run_yaml(&key_yaml(dir.path()), &hsm).unwrap_err();
        assert!(matches!(err, CeremonyError::Hsm(HsmError::InvalidPin)));
        assert!(!dir.path().join("intermediate.pub.pem").exists());
    }
}
