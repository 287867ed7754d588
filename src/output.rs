//! Output files that appear together or not at all.

use std::fs;
use std::path::PathBuf;

use crate::error::Result;

/// A set of files written to staging paths and renamed into place by [`commit`].
///
/// Dropping the set without committing removes whatever was staged.
///
/// [`commit`]: StagedOutputs::commit
#[derive(Debug, Default)]
pub struct StagedOutputs {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path to write `target`'s contents to.
    ///
    /// The staging file sits next to the target and keeps its extension, since image
    /// encoders pick the format from it.
    pub fn stage(&mut self, target: impl Into<PathBuf>) -> PathBuf {
        let target = target.into();
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = target.with_file_name(format!(".partial-{name}"));
        self.staged.push((staging.clone(), target));
        staging
    }

    /// Move every staged file to its target, in staging order.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        let mut committed = Vec::with_capacity(self.staged.len());
        while !self.staged.is_empty() {
            let (staging, target) = &self.staged[0];
            fs::rename(staging, target)?;
            let (_, target) = self.staged.remove(0);
            tracing::debug!(path = %target.display(), "output written");
            committed.push(target);
        }
        Ok(committed)
    }
}

impl Drop for StagedOutputs {
    fn drop(&mut self) {
        for (staging, _) in &self.staged {
            let _ = fs::remove_file(staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_is_a_hidden_sibling() {
        let mut outputs = StagedOutputs::new();
        let staging = outputs.stage("out/ELep.png");
        assert_eq!(staging, PathBuf::from("out/.partial-ELep.png"));
        assert_eq!(staging.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[test]
    fn commit_moves_everything_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut outputs = StagedOutputs::new();
        let a = outputs.stage(dir.path().join("a.png"));
        let b = outputs.stage(dir.path().join("graph.dot"));
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        assert!(!dir.path().join("a.png").exists());

        let written = outputs.commit().unwrap();
        assert_eq!(
            written,
            vec![dir.path().join("a.png"), dir.path().join("graph.dot")]
        );
        assert_eq!(fs::read_to_string(dir.path().join("graph.dot")).unwrap(), "b");
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn dropping_without_commit_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = {
            let mut outputs = StagedOutputs::new();
            let staging = outputs.stage(dir.path().join("ELep.png"));
            fs::write(&staging, "partial").unwrap();
            // a later step fails before commit
            let _never_written = outputs.stage(dir.path().join("ELep_log.png"));
            staging
        };
        assert!(!staging.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_commit_cleans_up_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut outputs = StagedOutputs::new();
        let missing = outputs.stage(dir.path().join("first.png"));
        let second = outputs.stage(dir.path().join("second.png"));
        fs::write(&second, "x").unwrap();

        assert!(outputs.commit().is_err());
        assert!(!missing.exists());
        assert!(!second.exists());
        assert!(!dir.path().join("second.png").exists());
    }
}
