//! Ceremony output files
//!
//! Outputs are checked before the HSM is touched (the directory must exist,
//! the file must not), and written
//! through a temporary file in the destination directory that is renamed into
//! place without clobbering. A file appearing between the check and the write
//! still aborts the ceremony rather than being overwritten.

use crate::error::CeremonyError;
use openssl::pkey::{PKeyRef, Public};
use openssl::x509::X509Ref;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Check that an output can be created: its directory exists and the file
/// itself does not. `field` names the config field the path came from.
pub fn check_output_path(field: &'static str, path: &Path) -> Result<(), CeremonyError> {
    let dir = parent_dir(path);
    if !dir.is_dir() {
        return Err(CeremonyError::OutputDirMissing {
            field,
            dir: dir.to_path_buf(),
        });
    }

    let exists = path.try_exists().map_err(|source| CeremonyError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    if exists {
        return Err(CeremonyError::OutputExists {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Fail if two outputs of one ceremony name the same file
pub fn check_distinct_outputs(first: &Path, second: &Path) -> Result<(), CeremonyError> {
    if first == second {
        return Err(CeremonyError::OutputPathCollision(first.to_path_buf()));
    }
    Ok(())
}

/// Write `contents` to `path` atomically, refusing to replace an existing file
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CeremonyError> {
    let write_err = |source: std::io::Error| CeremonyError::WriteOutput {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(parent_dir(path)).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(OUTPUT_MODE))
            .map_err(write_err)?;
    }
    tmp.persist_noclobber(path).map_err(|e| write_err(e.error))?;

    tracing::debug!(
        target: "ceremony",
        path = %path.display(),
        bytes = contents.len(),
        "output written"
    );
    Ok(())
}

/// Write a public key as a PEM `PUBLIC KEY` block
pub fn write_public_key(path: &Path, key: &PKeyRef<Public>) -> Result<(), CeremonyError> {
    write_atomic(path, &key.public_key_to_pem()?)?;
    println!("✓ Public key written to {}", path.display());
    Ok(())
}

/// Write a certificate as a PEM `CERTIFICATE` block
pub fn write_certificate(path: &Path, certificate: &X509Ref) -> Result<(), CeremonyError> {
    write_atomic(path, &certificate.to_pem()?)?;
    println!("✓ Certificate written to {}", path.display());
    Ok(())
}

/// Read an input file, attributing failures to `path`
pub fn read_input(path: &Path) -> Result<Vec<u8>, CeremonyError> {
    fs::read(path).map_err(|source| CeremonyError::ReadInput {
        path: path.to_path_buf(),
        source,
    })
}
