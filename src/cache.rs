use std::{io::ErrorKind, path::PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Extension of the cached documents
const EXTENSION: &str = "html";

/// Raw schedule pages on disk, one file per identity
#[derive(Debug, Clone)]
pub struct ScheduleCache {
    dir: PathBuf,
}

impl ScheduleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the schedule of `identity`
    pub fn path(&self, identity: &str) -> Result<PathBuf> {
        let valid = !identity.is_empty()
            && identity != "."
            && identity != ".."
            && !identity.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::InvalidIdentity(identity.to_owned()));
        }

        Ok(self.dir.join(format!("{identity}.{EXTENSION}")))
    }

    /// Previously stored document, `None` when there is none
    ///
    /// Bytes that aren't UTF-8 are replaced by `U+FFFD`, the page being read as text anyway.
    pub fn lookup(&self, identity: &str) -> Result<Option<String>> {
        let path = self.path(identity)?;
        match fs_err::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8(bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), "cached schedule is not valid UTF-8");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cached schedule");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Save the document, replacing any previous one
    pub fn store(&self, identity: &str, raw: &str) -> Result<PathBuf> {
        let path = self.path(identity)?;
        fs_err::create_dir_all(&self.dir)?;
        fs_err::write(&path, raw)?;

        Ok(path)
    }

    /// Forget the document of `identity`, returns whether there was one
    pub fn evict(&self, identity: &str) -> Result<bool> {
        let path = self.path(identity)?;
        match fs_err::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_of_unknown_identity_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());
        assert_eq!(cache.lookup("jdoe").unwrap(), None);
    }

    #[test]
    fn store_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path().join("nested").join(".cache"));

        let path = cache.store("jdoe", "<table></table>").unwrap();

        assert!(path.ends_with("jdoe.html"));
        assert_eq!(
            cache.lookup("jdoe").unwrap().as_deref(),
            Some("<table></table>")
        );
    }

    #[test]
    fn store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());

        cache.store("jdoe", "old").unwrap();
        cache.store("jdoe", "new").unwrap();

        assert_eq!(cache.lookup("jdoe").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn identities_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());

        cache.store("jdoe", "jane").unwrap();

        assert_eq!(cache.lookup("asmith").unwrap(), None);
    }

    #[test]
    fn evict_removes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path());

        cache.store("jdoe", "jane").unwrap();

        assert!(cache.evict("jdoe").unwrap());
        assert!(!cache.evict("jdoe").unwrap());
        assert_eq!(cache.lookup("jdoe").unwrap(), None);
    }

    #[test]
    fn path_like_identities_are_rejected() {
        let cache = ScheduleCache::new(".cache");
        for identity in ["", "..", "../etc/passwd", "a\\b"] {
            assert!(matches!(
                cache.lookup(identity),
                Err(Error::InvalidIdentity(_))
            ));
        }
    }

    #[test]
    fn non_utf8_document_is_still_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jdoe.html"), b"<td>Caf\xe9</td>").unwrap();
        let cache = ScheduleCache::new(dir.path());

        assert_eq!(
            cache.lookup("jdoe").unwrap().as_deref(),
            Some("<td>Caf\u{fffd}</td>")
        );
    }

    #[test]
    fn unreadable_storage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the document should be
        std::fs::create_dir(dir.path().join("jdoe.html")).unwrap();
        let cache = ScheduleCache::new(dir.path());

        assert!(matches!(cache.lookup("jdoe"), Err(Error::Storage(_))));
    }
}
