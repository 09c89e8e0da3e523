use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Paths currently being written or waiting for conversion.
///
/// Recorders and the encode dispatcher take a [`PathLease`] for every file
/// they touch; the retention sweep skips any leased path. Leases are counted
/// so the same path may be held by a recorder and a pending job at once.
#[derive(Debug, Clone, Default)]
pub struct InUseRegistry {
    paths: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl InUseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as in use until the returned lease is dropped
    pub fn lease<P: Into<PathBuf>>(&self, path: P) -> PathLease {
        let path = path.into();
        *self.paths.lock().entry(path.clone()).or_insert(0) += 1;
        trace!("Leased {}", path.display());

        PathLease {
            registry: self.clone(),
            path,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    fn release(&self, path: &Path) {
        let mut paths = self.paths.lock();
        if let Some(count) = paths.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                paths.remove(path);
                trace!("Released {}", path.display());
            }
        }
    }
}

/// RAII guard keeping a path registered as in use
#[derive(Debug)]
pub struct PathLease {
    registry: InUseRegistry,
    path: PathBuf,
}

impl PathLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_release() {
        let registry = InUseRegistry::new();
        let path = PathBuf::from("/rec/front/front_20240101_000000_000.mjpeg");

        let lease = registry.lease(&path);
        assert!(registry.contains(&path));
        assert_eq!(lease.path(), path.as_path());

        drop(lease);
        assert!(!registry.contains(&path));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leases_are_counted() {
        let registry = InUseRegistry::new();
        let path = PathBuf::from("/rec/a.mjpeg");

        let writer = registry.lease(&path);
        let job = registry.clone().lease(&path);
        assert_eq!(registry.len(), 1);

        drop(writer);
        assert!(registry.contains(&path));

        drop(job);
        assert!(!registry.contains(&path));
    }
}
