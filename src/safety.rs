//! Path sandboxing and command safety checks
//!
//! All tool file operations resolve through a [`PathSandbox`] rooted at the
//! active workspace; shell commands are screened against a substring
//! deny-list before execution.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Error returned when a resolved path leaves the sandbox root.
///
/// The executor downcasts to this type to report safety failures
/// distinctly from ordinary tool errors.
#[derive(Debug, thiserror::Error)]
#[error("Path escapes sandbox: {input:?} resolves to {}", resolved.display())]
pub struct SandboxEscape {
    pub input: String,
    pub resolved: PathBuf,
}

/// Ensures all file operations stay within a workspace root.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at `workspace_root`, creating the directory
    /// if it does not exist.
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let root = workspace_root.as_ref();
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root: {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the workspace root, ensuring it stays
    /// inside.
    ///
    /// Absolute paths under the root are treated as workspace-relative;
    /// absolute paths outside it are stripped of leading separators and
    /// re-rooted. `..` components and symlinks are resolved before the
    /// containment check.
    pub fn resolve(&self, input: &str) -> Result<PathBuf> {
        let path = Path::new(input);
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => PathBuf::from(input.trim_start_matches('/')),
            }
        } else {
            path.to_path_buf()
        };

        let joined = lexical_normalize(&self.root.join(relative));
        let resolved = canonicalize_allow_missing(&joined);

        if !resolved.starts_with(&self.root) {
            return Err(SandboxEscape {
                input: input.to_string(),
                resolved,
            }
            .into());
        }

        Ok(resolved)
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize as much of the path as exists, re-appending the missing
/// tail. Symlinks in the existing portion are resolved.
fn canonicalize_allow_missing(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => tail.push(name.to_os_string()),
            None => break,
        }
        if !existing.pop() {
            break;
        }
    }

    let base = existing.canonicalize().unwrap_or(existing);
    tail.into_iter().rev().fold(base, |acc, name| acc.join(name))
}

/// Check a command against a list of blocked substring patterns.
///
/// Returns the first matching pattern, comparing case-insensitively over
/// the trimmed command.
pub fn check_command_safety(command: &str, blocked_patterns: &[String]) -> Option<String> {
    let cmd_lower = command.trim().to_lowercase();
    blocked_patterns
        .iter()
        .find(|pattern| cmd_lower.contains(&pattern.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/workspace");
        let sandbox = PathSandbox::new(&root).unwrap();
        assert!(sandbox.root().is_dir());
    }

    #[test]
    fn test_resolve_relative() {
        let (_dir, sandbox) = sandbox();
        let resolved = sandbox.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, sandbox.root().join("src/main.rs"));
    }

    #[test]
    fn test_resolve_absolute_inside_root() {
        let (_dir, sandbox) = sandbox();
        let inside = sandbox.root().join("notes.txt");
        let resolved = sandbox.resolve(&inside.to_string_lossy()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_resolve_absolute_outside_treated_as_relative() {
        let (_dir, sandbox) = sandbox();
        // /etc/passwd becomes <root>/etc/passwd rather than escaping
        let resolved = sandbox.resolve("/etc/passwd").unwrap();
        assert_eq!(resolved, sandbox.root().join("etc/passwd"));
    }

    #[test]
    fn test_parent_traversal_escapes() {
        let (_dir, sandbox) = sandbox();
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        let escape = err.downcast_ref::<SandboxEscape>().unwrap();
        assert!(escape.to_string().starts_with("Path escapes sandbox:"));
    }

    #[test]
    fn test_internal_parent_components_ok() {
        let (_dir, sandbox) = sandbox();
        let resolved = sandbox.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, sandbox.root().join("a/c.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_detected() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link")).unwrap();

        let err = sandbox.resolve("link/secret.txt").unwrap_err();
        assert!(err.downcast_ref::<SandboxEscape>().is_some());
    }

    #[test]
    fn test_command_safety_matches_substring() {
        let blocked = vec!["rm -rf".to_string(), "Shutdown".to_string()];
        assert_eq!(
            check_command_safety("  rm -rf /tmp ", &blocked),
            Some("rm -rf".to_string())
        );
        // Case-insensitive both ways
        assert_eq!(
            check_command_safety("sudo SHUTDOWN now", &blocked),
            Some("Shutdown".to_string())
        );
        assert_eq!(check_command_safety("ls -la", &blocked), None);
        assert_eq!(check_command_safety("anything", &[]), None);
    }
}
