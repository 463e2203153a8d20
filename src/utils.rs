//! Shared helpers

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Version information for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Expand a leading `~` to the operator's home directory.
///
/// Paths like `~user/...` are returned untouched.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() {
            if let Some(home) = home_dir() {
                return home;
            }
        } else if let Some(stripped) = rest.strip_prefix('/') {
            if let Some(home) = home_dir() {
                return home.join(stripped);
            }
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_plain_path() {
        assert_eq!(expand_tilde("/etc/keys/id_rsa"), PathBuf::from("/etc/keys/id_rsa"));
        assert_eq!(expand_tilde("relative/key"), PathBuf::from("relative/key"));
    }

    #[test]
    fn test_expand_tilde_home() {
        std::env::set_var("HOME", "/home/operator");
        assert_eq!(expand_tilde("~"), PathBuf::from("/home/operator"));
        assert_eq!(
            expand_tilde("~/.ssh/id_rsa"),
            PathBuf::from("/home/operator/.ssh/id_rsa")
        );
    }

    #[test]
    fn test_expand_tilde_named_user_untouched() {
        assert_eq!(expand_tilde("~deploy/key"), PathBuf::from("~deploy/key"));
    }
}
