//! Per-session workspace root.
//!
//! Every tool in a session treats this directory as the root for reads and
//! writes. Read-only tools may touch it concurrently; mutating tools rely
//! on the dispatcher's serial scheduling rule.

use std::path::{Path, PathBuf};

use ad_domain::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(Error::Io)
    }

    /// Resolve a (possibly relative) path against the workspace root.
    pub fn workspace_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Render a path relative to the workspace root where possible.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_against_root() {
        let ws = WorkspaceManager::new(PathBuf::from("/w/s1"));
        assert_eq!(ws.workspace_path("a.txt"), PathBuf::from("/w/s1/a.txt"));
        assert_eq!(ws.workspace_path("/abs/a.txt"), PathBuf::from("/abs/a.txt"));
    }

    #[test]
    fn renders_relative_where_possible() {
        let ws = WorkspaceManager::new(PathBuf::from("/w/s1"));
        assert_eq!(ws.relative_path(Path::new("/w/s1/sub/a.txt")), "sub/a.txt");
        assert_eq!(ws.relative_path(Path::new("/elsewhere/b.txt")), "/elsewhere/b.txt");
    }
}
