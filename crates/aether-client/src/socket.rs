//! Local agent socket location and safety checks.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_SOCKET_FILENAME: &str = "agent.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "AETHER_VAULT_SOCK";

/// Default permission bits expected on the agent socket.
pub const DEFAULT_SOCKET_PERMISSIONS: u32 = 0o600;

/// Resolve the agent socket path.
///
/// Order: `AETHER_VAULT_SOCK`, then `$XDG_RUNTIME_DIR/aether-vault/agent.sock`
/// (only when absolute and free of `..`), then
/// `$HOME/.aether-vault/run/agent.sock`.
pub fn socket_path() -> PathBuf {
    if let Ok(p) = std::env::var(SOCKET_ENV)
        && !p.is_empty()
    {
        return PathBuf::from(p);
    }

    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        let dir_path = Path::new(&dir);
        if dir_path.is_absolute()
            && !dir_path
                .components()
                .any(|c| c == std::path::Component::ParentDir)
        {
            return dir_path.join("aether-vault").join(DEFAULT_SOCKET_FILENAME);
        }
    }

    let home = std::env::var_os("HOME").unwrap_or_else(|| OsString::from("."));
    PathBuf::from(home)
        .join(".aether-vault")
        .join("run")
        .join(DEFAULT_SOCKET_FILENAME)
}

/// Verify that a socket path is safe to connect to.
///
/// Checks:
/// - The socket file exists and is not a symlink
/// - Its permission bits grant nothing beyond `allowed_mode`
/// - The parent directory is not a symlink
#[cfg(unix)]
pub fn verify_socket_safety(path: &Path, allowed_mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    // lstat: reject symlinks.
    let meta = path.symlink_metadata().map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("cannot stat socket {}: {e}", path.display()),
        )
    })?;

    if meta.file_type().is_symlink() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("socket path is a symlink: {}", path.display()),
        ));
    }

    let mode = meta.mode() & 0o777;
    if mode & !allowed_mode != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("socket has mode {mode:o}, expected at most {allowed_mode:o}"),
        ));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let parent_meta = parent.symlink_metadata().map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("cannot stat parent dir {}: {e}", parent.display()),
            )
        })?;

        if parent_meta.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("parent directory is a symlink: {}", parent.display()),
            ));
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn verify_socket_safety(_path: &Path, _allowed_mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Parse permission bits written as an octal string (`"600"`, `"0o600"`).
pub fn parse_mode(raw: &str) -> Option<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).ok().filter(|mode| *mode <= 0o777)
}
