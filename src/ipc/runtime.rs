use anyhow::{Context, Result};
use directories::UserDirs;
use std::{fs, path::PathBuf};

pub fn runtime_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .context("cannot resolve home directory")?
        .home_dir()
        .to_path_buf();
    let dir = home.join(".local").join("run");
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

/// `POSECTL_SOCKET` overrides the default `~/.local/run/posectl.sock`.
pub fn socket_path() -> Result<PathBuf> {
    if let Some(p) = std::env::var_os("POSECTL_SOCKET") {
        return Ok(PathBuf::from(p));
    }
    Ok(runtime_dir()?.join("posectl.sock"))
}
