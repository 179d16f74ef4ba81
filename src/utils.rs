use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{Error, ErrorKind, Result};

/// Replaces the file at `path` with `data` in one step.
///
/// The data is written to a temporary file in the same directory, flushed to disk, then renamed
/// over the destination, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Runs file I/O or key derivation on the blocking thread pool.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| Error::new(ErrorKind::InternalError, format!("blocking task failed: {}", err)))?
}

/// Returns true when `domain` falls under a `[domain_realm]` mapping key.
///
/// `.example.com` matches subdomains only, `example.com` matches itself and its subdomains.
pub fn matches_domain(domain: &str, mapping_domain: &str) -> bool {
    let domain = domain.to_lowercase();
    let mapping_domain = mapping_domain.to_lowercase();

    if mapping_domain.starts_with('.') {
        domain.ends_with(&mapping_domain)
    } else {
        domain == mapping_domain || domain.ends_with(&format!(".{mapping_domain}"))
    }
}
