//! All on-disk artefact paths are derived from a single data directory plus
//! the node's configured name, rather than passed around individually.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub pgdata: PathBuf,
    name: String,
}

impl Paths {
    pub fn new(pgdata: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            pgdata: pgdata.into(),
            name: name.into(),
        }
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut path = self.pgdata.clone();
        path.set_file_name(format!("{}.{extension}", self.name));
        path
    }

    /// `<name>.cfg` — INI configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.sibling("cfg")
    }

    /// `<name>.state` — versioned binary keeper state file.
    pub fn state_file(&self) -> PathBuf {
        self.sibling("state")
    }

    /// `<name>.init` — binary init-progress marker.
    pub fn init_file(&self) -> PathBuf {
        self.sibling("init")
    }

    /// `<name>.pid` — ASCII supervisor pidfile.
    pub fn pid_file(&self) -> PathBuf {
        self.sibling("pid")
    }

    pub fn data_directory(&self) -> &Path {
        &self.pgdata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_share_parent_with_pgdata() {
        let paths = Paths::new("/var/lib/pg/data", "node1");
        assert_eq!(paths.config_file(), PathBuf::from("/var/lib/pg/node1.cfg"));
        assert_eq!(paths.state_file(), PathBuf::from("/var/lib/pg/node1.state"));
        assert_eq!(paths.init_file(), PathBuf::from("/var/lib/pg/node1.init"));
        assert_eq!(paths.pid_file(), PathBuf::from("/var/lib/pg/node1.pid"));
    }
}
