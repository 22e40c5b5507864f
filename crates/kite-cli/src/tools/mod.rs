//! Built-in tools for the coding agent

mod bash;
mod edit;
mod fetch;
mod glob;
mod memory;
mod read;
mod write;

use std::path::{Path, PathBuf};

pub use bash::BashTool;
pub use edit::EditTool;
pub use fetch::WebFetchTool;
pub use glob::GlobTool;
pub use memory::MemoryTool;
pub use read::ReadTool;
pub use write::WriteTool;

/// Resolve a path argument: `~` expands to the home directory and relative
/// paths are taken from `cwd`
pub(crate) fn resolve_path(cwd: &Path, raw: &str) -> PathBuf {
    let expanded = if raw == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw))
    } else if let Some(stripped) = raw.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(stripped))
            .unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };

    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

/// Unified diff between two versions of a file
pub(crate) fn unified_diff(path: &str, old: &str, new: &str) -> String {
    similar::TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let cwd = Path::new("/work/project");
        assert_eq!(resolve_path(cwd, "src/main.rs"), PathBuf::from("/work/project/src/main.rs"));
        assert_eq!(resolve_path(cwd, "/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_unified_diff() {
        let diff = unified_diff("a.txt", "one\ntwo\n", "one\nthree\n");
        assert!(diff.contains("--- a/a.txt"));
        assert!(diff.contains("-two"));
        assert!(diff.contains("+three"));
    }
}
