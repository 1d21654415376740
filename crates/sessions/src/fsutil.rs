//! Atomic JSON writes shared by the store and the resume pointer.

use std::path::{Path, PathBuf};

use serde::Serialize;

use ad_domain::error::{Error, Result};

/// Write to `path.tmp`, fsync, rename.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Persistence(format!("serializing {}: {e}", path.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;
    }
    std::fs::rename(&tmp, path).map_err(Error::Io)?;
    Ok(())
}
