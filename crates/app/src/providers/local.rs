use std::fs;

use ledger_core::SourceName;

use super::{AccessResult, ProviderAccessError};

/// Local providers read reports dropped into a directory on this host.
pub(crate) fn local_dir_is_readable(service: &'static str, source: &SourceName) -> AccessResult<bool> {
    let SourceName::LocalDir { path } = source else {
        return Err(ProviderAccessError::access(
            service,
            "a local report directory is required",
        ));
    };
    match fs::read_dir(path) {
        Ok(_) => Ok(true),
        Err(err) => Err(ProviderAccessError::access(
            service,
            format!("report directory {path} is not readable: {err}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_directory_is_reachable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = SourceName::LocalDir {
            path: dir.path().to_string_lossy().to_string(),
        };
        assert!(local_dir_is_readable("AWS-local", &source).expect("reachable"));
    }

    #[test]
    fn missing_directory_or_wrong_source_is_an_error() {
        let missing = SourceName::LocalDir {
            path: "/definitely/not/here".to_string(),
        };
        assert!(local_dir_is_readable("AWS-local", &missing).is_err());
        let bucket = SourceName::Bucket {
            bucket: "cost-reports".to_string(),
        };
        assert!(local_dir_is_readable("AWS-local", &bucket).is_err());
    }
}
