//! Placing images at the caller's destination.

use std::io;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};

/// Mode of pulled image files, before umask.
pub const IMAGE_MODE: u32 = 0o755;

/// Whether a pull may write `dest`.
///
/// Returns `false` when something already exists there and `force` is off.
pub fn check_target(dest: &Path, force: bool) -> bool {
    force || std::fs::symlink_metadata(dest).is_err()
}

/// Create or truncate `dest` for writing, mode [`IMAGE_MODE`] when created.
pub async fn open_destination(dest: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(IMAGE_MODE);
    options.open(dest).await
}

/// Stream-copy a cache entry to `dest`. Returns bytes copied.
pub async fn copy_from_cache(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(src).await?);
    let mut writer = open_destination(dest).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    mark_executable(dest).await?;
    Ok(copied)
}

/// Set [`IMAGE_MODE`] on an existing file.
///
/// `open_destination` only applies the mode to files it creates; a forced
/// pull over an existing file needs this too.
pub async fn mark_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(IMAGE_MODE)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Mark a file written in place executable. Returns its size.
pub async fn finalize_in_place(path: &Path) -> io::Result<u64> {
    mark_executable(path).await?;
    Ok(tokio::fs::metadata(path).await?.len())
}
