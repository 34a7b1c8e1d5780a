//! The deformable-mirror parameter file.
//!
//! A plain text file of whitespace-separated integers. The first integer is
//! the focus; the rest belong to the mirror and are passed through untouched.

use bf_types::{config_error, BfResult};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
    content: String,
    target: i64,
}

impl ParameterStore {
    /// Read the file and parse the initial target.
    pub fn open(path: impl Into<PathBuf>) -> BfResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            config_error!("cannot read parameter file {}: {e}", path.display())
        })?;
        let target = parse_target(&content).map_err(|message| {
            config_error!("parameter file {}: {message}", path.display())
        })?;

        Ok(Self {
            path,
            content,
            target,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Target currently in the file.
    pub fn target(&self) -> i64 {
        self.target
    }

    /// File content with the first value replaced by `target`.
    pub fn render(&self, target: i64) -> String {
        // open() guarantees a first token exists.
        let span = first_token(&self.content).unwrap_or(0..0);
        let mut rendered = String::with_capacity(self.content.len() + 4);
        rendered.push_str(&self.content[..span.start]);
        rendered.push_str(&target.to_string());
        rendered.push_str(&self.content[span.end..]);
        rendered
    }

    /// Rewrite the file with a new target. The file is replaced atomically.
    pub fn write_target(&mut self, target: i64) -> BfResult<()> {
        let rendered = self.render(target);

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "parameters".to_string());
        let staging = self.path.with_file_name(format!(".{file_name}.tmp"));
        std::fs::write(&staging, &rendered)?;
        std::fs::rename(&staging, &self.path)?;

        debug!(path = %self.path.display(), focus = target, "parameter file updated");
        self.content = rendered;
        self.target = target;
        Ok(())
    }
}

fn first_token(content: &str) -> Option<Range<usize>> {
    let start = content.find(|c: char| !c.is_whitespace())?;
    let end = content[start..]
        .find(char::is_whitespace)
        .map(|offset| start + offset)
        .unwrap_or(content.len());
    Some(start..end)
}

fn parse_target(content: &str) -> Result<i64, String> {
    let span = first_token(content).ok_or_else(|| "no initial target value".to_string())?;
    let token = &content[span];
    token
        .parse::<i64>()
        .map_err(|_| format!("initial target {token:?} is not an integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_types::BfError;

    fn store_with(content: &str) -> (tempfile::TempDir, ParameterStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dm_parameters.txt");
        std::fs::write(&path, content).unwrap();
        let store = ParameterStore::open(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn reads_first_value_as_target() {
        let (_dir, store) = store_with("50 0 0 -3\n");
        assert_eq!(store.target(), 50);
    }

    #[test]
    fn write_replaces_only_the_target() {
        let (_dir, mut store) = store_with("  -12\t7 8\n9\n");
        store.write_target(-11).unwrap();

        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk, "  -11\t7 8\n9\n");
        assert_eq!(store.target(), -11);

        store.write_target(105).unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "  105\t7 8\n9\n"
        );
    }

    #[test]
    fn single_value_file_without_newline() {
        let (_dir, mut store) = store_with("50");
        assert_eq!(store.render(51), "51");
        store.write_target(51).unwrap();
        let reopened = ParameterStore::open(store.path()).unwrap();
        assert_eq!(reopened.target(), 51);
    }

    #[test]
    fn missing_or_bad_target_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(matches!(ParameterStore::open(&empty), Err(BfError::Config(_))));

        let junk = dir.path().join("junk.txt");
        std::fs::write(&junk, "focus=50").unwrap();
        assert!(matches!(ParameterStore::open(&junk), Err(BfError::Config(_))));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(ParameterStore::open(&missing), Err(BfError::Config(_))));
    }

    #[test]
    fn no_staging_file_left_behind() {
        let (dir, mut store) = store_with("1 2 3");
        store.write_target(4).unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["dm_parameters.txt".to_string()]);
    }
}
