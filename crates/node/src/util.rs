//! Path and build helpers shared by the config layer and the binary.
#![warn(missing_docs)]

use std::path::Path;
use std::path::PathBuf;

use crate::error::Error;

/// Version string reported by the binary, `<pkg version>-<git short hash>`
/// when the hash was available at build time.
pub fn build_version() -> String {
    match option_env!("GIT_SHORT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}-{}", env!("CARGO_PKG_VERSION"), hash),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Expand a leading `~` to the home directory. Paths without one pass
/// through untouched.
pub fn expand_home<P>(path: P) -> Result<PathBuf, Error>
where P: AsRef<Path> {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => {
            let mut home = home::home_dir().ok_or(Error::HomeDirError)?;
            home.push(rest);
            Ok(home)
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir<P>(path: P) -> Result<(), Error>
where P: AsRef<Path> {
    let path = expand_home(path)?;
    let parent = path.parent().ok_or(Error::ParentDirError)?;
    if !parent.is_dir() {
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateFileError(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> PathBuf {
        PathBuf::from(std::env::var("HOME").unwrap())
    }

    #[test]
    fn test_tilde_paths_land_in_home() {
        assert_eq!(
            expand_home("~/.backchannel/config.yaml").unwrap(),
            home().join(".backchannel/config.yaml")
        );
        assert_eq!(expand_home("~").unwrap(), home().join(""));
    }

    #[test]
    fn test_other_paths_pass_through() {
        for input in ["/etc/backchannel.yaml", "relative/config.yaml", ""] {
            assert_eq!(expand_home(input).unwrap(), PathBuf::from(input));
        }
    }

    #[test]
    fn test_version_is_never_empty() {
        assert!(build_version().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
