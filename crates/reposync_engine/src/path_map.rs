//! Mapping between remote paths and local paths.

use std::path::{Component, Path, PathBuf};

/// Substitutes the remote root for the local root and back.
///
/// Remote paths are absolute and `/`-separated (`/Workspaces/Team/a.txt`).
/// Local paths handed to the engine are absolute; records store them
/// relative to the local root.
#[derive(Debug, Clone)]
pub struct PathMapper {
    local_root: PathBuf,
    remote_root: String,
}

impl PathMapper {
    /// Creates a mapper.
    pub fn new(local_root: impl Into<PathBuf>, remote_root: &str) -> Self {
        let trimmed = remote_root.trim_end_matches('/');
        Self {
            local_root: local_root.into(),
            remote_root: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    /// Local sync root.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Remote root path.
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Converts an absolute local path to a path relative to the root.
    ///
    /// Returns `None` for paths outside the root and for the root itself.
    pub fn relative(&self, local: &Path) -> Option<PathBuf> {
        let relative = local.strip_prefix(&self.local_root).ok()?;
        let normal = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if relative.as_os_str().is_empty() || !normal {
            return None;
        }
        Some(relative.to_path_buf())
    }

    /// Converts a relative path to an absolute local path.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.local_root.join(relative)
    }

    /// Returns the relative local path for a remote path, or `None` if the
    /// remote path is the root or lies outside it.
    pub fn relative_for_remote(&self, remote_path: &str) -> Option<PathBuf> {
        let rest = if self.remote_root == "/" {
            remote_path.strip_prefix('/')?
        } else {
            remote_path
                .strip_prefix(self.remote_root.as_str())?
                .strip_prefix('/')?
        };
        let mut relative = PathBuf::new();
        for segment in rest.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            relative.push(segment);
        }
        if relative.as_os_str().is_empty() {
            None
        } else {
            Some(relative)
        }
    }

    /// Returns the absolute local path for a remote path.
    pub fn local_path_for_remote(&self, remote_path: &str) -> Option<PathBuf> {
        self.relative_for_remote(remote_path)
            .map(|relative| self.absolute(&relative))
    }

    /// Returns the remote path for a relative local path.
    pub fn remote_path_for_local(&self, relative: &Path) -> String {
        let mut path = self.remote_root.clone();
        for component in relative.components() {
            if let Component::Normal(name) = component {
                if !path.ends_with('/') {
                    path.push('/');
                }
                path.push_str(&name.to_string_lossy());
            }
        }
        path
    }

    /// Returns true if the remote path is the root or lies below it.
    pub fn is_in_scope(&self, remote_path: &str) -> bool {
        remote_path == self.remote_root || self.relative_for_remote(remote_path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-][A-Za-z0-9 _-]{0,7}( \\(conflict\\))?(\\.txt)?"
    }

    #[test]
    fn whole_repository() {
        let mapper = PathMapper::new("/home/u/Sync", "/");
        assert_eq!(
            mapper.relative_for_remote("/Cat/kitten.txt"),
            Some(PathBuf::from("Cat/kitten.txt"))
        );
        assert_eq!(mapper.relative_for_remote("/"), None);
        assert_eq!(
            mapper.local_path_for_remote("/a.txt"),
            Some(PathBuf::from("/home/u/Sync/a.txt"))
        );
        assert_eq!(mapper.remote_path_for_local(Path::new("Cat/kitten.txt")), "/Cat/kitten.txt");
    }

    #[test]
    fn sub_folder_root() {
        let mapper = PathMapper::new("/home/u/Sync", "/Workspaces/Team/");
        assert_eq!(mapper.remote_root(), "/Workspaces/Team");
        assert_eq!(
            mapper.relative_for_remote("/Workspaces/Team/doc.txt"),
            Some(PathBuf::from("doc.txt"))
        );
        assert_eq!(mapper.relative_for_remote("/Workspaces/Teamwork/doc.txt"), None);
        assert_eq!(mapper.relative_for_remote("/Other/doc.txt"), None);
        assert!(mapper.is_in_scope("/Workspaces/Team"));
        assert!(!mapper.is_in_scope("/Workspaces"));
        assert_eq!(
            mapper.remote_path_for_local(Path::new("a/b.txt")),
            "/Workspaces/Team/a/b.txt"
        );
    }

    #[test]
    fn relative_rejects_outside_and_root() {
        let mapper = PathMapper::new("/home/u/Sync", "/");
        assert_eq!(
            mapper.relative(Path::new("/home/u/Sync/a/b")),
            Some(PathBuf::from("a/b"))
        );
        assert_eq!(mapper.relative(Path::new("/home/u/Sync")), None);
        assert_eq!(mapper.relative(Path::new("/home/u/Other/a")), None);
        assert_eq!(mapper.relative(Path::new("/home/u/Sync/../x")), None);
    }

    proptest! {
        #[test]
        fn local_and_remote_paths_agree(
            remote_root in prop::sample::select(vec!["/", "/Workspaces/Team"]),
            names in prop::collection::vec(name_strategy(), 1..5),
        ) {
            let mapper = PathMapper::new("/home/u/Sync", remote_root);
            let relative: PathBuf = names.iter().collect();
            let remote = mapper.remote_path_for_local(&relative);

            prop_assert!(mapper.is_in_scope(&remote));
            prop_assert_eq!(mapper.relative_for_remote(&remote), Some(relative.clone()));
            prop_assert_eq!(
                mapper.local_path_for_remote(&remote),
                Some(mapper.absolute(&relative))
            );
            prop_assert_eq!(mapper.relative(&mapper.absolute(&relative)), Some(relative));
        }

        #[test]
        fn siblings_of_the_remote_root_are_out_of_scope(
            suffix in "[A-Za-z0-9]{1,6}",
            name in name_strategy(),
        ) {
            let mapper = PathMapper::new("/home/u/Sync", "/Workspaces/Team");
            let outside = format!("/Workspaces/Team{suffix}/{name}");
            prop_assert!(!mapper.is_in_scope(&outside));
            prop_assert_eq!(mapper.relative_for_remote(&outside), None);
        }
    }
}
