//! Path sandbox for filesystem tools.
//!
//! Every path argument the LLM supplies is validated before any filesystem
//! access:
//!
//! - any `..` component is rejected outright;
//! - absolute paths must sit inside the configured project root;
//! - the normalized relative path must begin with a whitelisted prefix.
//!
//! Reads and writes use separate whitelists.  The write whitelist is
//! stricter and must never include the agent-definition directory, which the
//! defaults respect (`docs/` and the `.scratch/` ephemeral area only).

use std::path::{Component, Path, PathBuf};

use crate::squadron::tool_protocol::ToolError;

/// Default ceiling on file reads (10 MiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Kind of filesystem access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct PathSandbox {
    project_root: PathBuf,
    read_prefixes: Vec<PathBuf>,
    write_prefixes: Vec<PathBuf>,
    max_read_bytes: u64,
}

impl PathSandbox {
    /// Sandbox rooted at `project_root` with the default whitelists:
    /// reads from `.bmad/`, `docs/`, and `config/`; writes to `docs/` and
    /// `.scratch/`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            read_prefixes: vec![
                PathBuf::from(".bmad"),
                PathBuf::from("docs"),
                PathBuf::from("config"),
            ],
            write_prefixes: vec![PathBuf::from("docs"), PathBuf::from(".scratch")],
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_read_prefixes(mut self, prefixes: Vec<PathBuf>) -> Self {
        self.read_prefixes = prefixes;
        self
    }

    pub fn with_write_prefixes(mut self, prefixes: Vec<PathBuf>) -> Self {
        self.write_prefixes = prefixes;
        self
    }

    pub fn with_max_read_bytes(mut self, ceiling: u64) -> Self {
        self.max_read_bytes = ceiling;
        self
    }

    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_bytes
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Validate `raw` for the given access and return the absolute path to
    /// operate on.
    pub fn resolve(&self, raw: &str, access: Access) -> Result<PathBuf, ToolError> {
        if raw.is_empty() {
            return Err(ToolError::PathRejected("empty path".to_string()));
        }

        let path = Path::new(raw);
        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(ToolError::PathRejected(format!(
                    "parent-directory component in '{}'",
                    raw
                )));
            }
        }

        // Absolute paths are allowed only when they already sit inside the
        // project root; everything else is treated as root-relative.
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.project_root)
                .map_err(|_| {
                    ToolError::PathRejected(format!("'{}' is outside the project root", raw))
                })?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };

        let normalized: PathBuf = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        if normalized.as_os_str().is_empty() {
            return Err(ToolError::PathRejected(format!("'{}' names no file", raw)));
        }

        let prefixes = match access {
            Access::Read => &self.read_prefixes,
            Access::Write => &self.write_prefixes,
        };
        if !prefixes.iter().any(|prefix| normalized.starts_with(prefix)) {
            return Err(ToolError::PathRejected(format!(
                "'{}' is outside the allowed prefixes",
                raw
            )));
        }

        Ok(self.project_root.join(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> PathSandbox {
        PathSandbox::new("/project")
    }

    #[test]
    fn accepts_whitelisted_reads() {
        let sb = sandbox();
        let resolved = sb.resolve(".bmad/agents/analyst.yaml", Access::Read).unwrap();
        assert_eq!(resolved, PathBuf::from("/project/.bmad/agents/analyst.yaml"));
        assert!(sb.resolve("docs/plan.md", Access::Read).is_ok());
        assert!(sb.resolve("config/rate_limits.yaml", Access::Read).is_ok());
    }

    #[test]
    fn rejects_parent_traversal_anywhere() {
        let sb = sandbox();
        assert!(matches!(
            sb.resolve("../etc/passwd", Access::Read),
            Err(ToolError::PathRejected(_))
        ));
        assert!(matches!(
            sb.resolve("docs/../.bmad/agents/x.yaml", Access::Read),
            Err(ToolError::PathRejected(_))
        ));
    }

    #[test]
    fn rejects_absolute_paths_outside_the_root() {
        let sb = sandbox();
        assert!(matches!(
            sb.resolve("/etc/passwd", Access::Read),
            Err(ToolError::PathRejected(_))
        ));
        // Absolute but inside the root and whitelisted is fine.
        assert!(sb.resolve("/project/docs/notes.md", Access::Read).is_ok());
    }

    #[test]
    fn rejects_paths_outside_the_whitelist() {
        let sb = sandbox();
        assert!(sb.resolve("src/main.rs", Access::Read).is_err());
        assert!(sb.resolve("Cargo.toml", Access::Read).is_err());
    }

    #[test]
    fn write_whitelist_is_stricter_than_read() {
        let sb = sandbox();
        // Readable but never writable: the agent-definition directory.
        assert!(sb.resolve(".bmad/agents/analyst.yaml", Access::Read).is_ok());
        assert!(sb
            .resolve(".bmad/agents/analyst.yaml", Access::Write)
            .is_err());
        assert!(sb.resolve("config/providers.yaml", Access::Write).is_err());
        assert!(sb.resolve("docs/report.md", Access::Write).is_ok());
        assert!(sb.resolve(".scratch/tmp.txt", Access::Write).is_ok());
    }

    #[test]
    fn curdir_components_are_normalized_away() {
        let sb = sandbox();
        let resolved = sb.resolve("./docs/./report.md", Access::Read).unwrap();
        assert_eq!(resolved, PathBuf::from("/project/docs/report.md"));
    }
}
