use std::path::{Path, PathBuf};

/// Tenant databases live under the configured data dir; a relative one is
/// taken from the directory holding the config file.
pub fn resolve_data_dir(config_file: &Path, data_dir: &Path) -> PathBuf {
    if data_dir.is_absolute() {
        return data_dir.to_path_buf();
    }
    match config_file.parent() {
        Some(base) if !base.as_os_str().is_empty() => base.join(data_dir),
        _ => data_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_data_dir_follows_config_file() {
        assert_eq!(
            resolve_data_dir(Path::new("/etc/ledger/config.toml"), Path::new("data")),
            PathBuf::from("/etc/ledger/data")
        );
        assert_eq!(
            resolve_data_dir(Path::new("/etc/ledger/config.toml"), Path::new("/var/ledger")),
            PathBuf::from("/var/ledger")
        );
        assert_eq!(
            resolve_data_dir(Path::new("config.toml"), Path::new("data")),
            PathBuf::from("data")
        );
    }
}
