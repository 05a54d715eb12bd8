use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use heal_core::{CriticalFileSet, VerificationFailure, VerificationFailureKind, VerifiedFile};
use sha2::{Digest, Sha256};

/// Checks each critical path under `root`: it must exist, be a regular file,
/// open, and yield at least one byte. Stops at the first failure.
pub fn verify_critical_files(
    root: &Path,
    files: &CriticalFileSet,
) -> Result<Vec<VerifiedFile>, VerificationFailure> {
    files.iter().map(|rel| verify_file(root, rel)).collect()
}

fn verify_file(root: &Path, rel: &Path) -> Result<VerifiedFile, VerificationFailure> {
    let fail = |kind| VerificationFailure { path: rel.to_path_buf(), kind };
    let path = root.join(rel);
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(fail(VerificationFailureKind::Missing)),
        Err(e) => return Err(fail(VerificationFailureKind::Unreadable(e.to_string()))),
    };
    if !meta.is_file() {
        return Err(fail(VerificationFailureKind::NotAFile));
    }
    let (bytes, sha256) =
        hash_file(&path).map_err(|e| fail(VerificationFailureKind::Unreadable(e.to_string())))?;
    if bytes == 0 {
        return Err(fail(VerificationFailureKind::Empty));
    }
    Ok(VerifiedFile { path: rel.to_path_buf(), bytes, sha256 })
}

/// Re-hashes each previously verified file under `root` and checks that the
/// content is unchanged.
pub fn confirm_digests(root: &Path, verified: &[VerifiedFile]) -> Result<(), VerificationFailure> {
    for file in verified {
        let current = verify_file(root, &file.path)?;
        if current.sha256 != file.sha256 {
            return Err(VerificationFailure {
                path: file.path.clone(),
                kind: VerificationFailureKind::DigestMismatch {
                    expected: file.sha256.clone(),
                    actual: current.sha256,
                },
            });
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}
