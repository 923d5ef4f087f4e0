//! Layered instruction memory
//!
//! Loads `CLAUDE.md` files from the project, `CLAUDE.local.md` overrides and
//! the user-level `~/.claude/CLAUDE.md`, expanding `@path` imports.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

pub const PROJECT_FILE: &str = "CLAUDE.md";
pub const LOCAL_FILE: &str = "CLAUDE.local.md";

/// Maximum nesting of `@` imports below a top-level file
pub const MAX_IMPORT_DEPTH: usize = 5;

/// Subtree search depth for nested memory files
const MAX_WALK_DEPTH: usize = 8;

const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("code block regex must compile"));
static CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").expect("code span regex must compile"));

/// Where a memory file came from, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryKind {
    Project,
    Local,
    User,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Project => write!(f, "Project"),
            MemoryKind::Local => write!(f, "Local"),
            MemoryKind::User => write!(f, "User"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemorySource {
    pub kind: MemoryKind,
    pub path: PathBuf,
    /// File text with imports expanded
    pub text: String,
}

/// All instruction files that apply to a working directory
#[derive(Debug, Clone, Default)]
pub struct MemorySet {
    sources: Vec<MemorySource>,
}

impl MemorySet {
    /// Load memory for `working_dir` using the real home directory
    pub fn load(working_dir: &Path) -> Self {
        Self::load_with_home(working_dir, dirs::home_dir().as_deref())
    }

    pub fn load_with_home(working_dir: &Path, home: Option<&Path>) -> Self {
        let mut discovered: HashSet<PathBuf> = HashSet::new();
        let mut candidates: Vec<(MemoryKind, PathBuf)> = Vec::new();

        for (kind, name) in [(MemoryKind::Project, PROJECT_FILE), (MemoryKind::Local, LOCAL_FILE)] {
            for path in discover(working_dir, name) {
                candidates.push((kind, path));
            }
        }
        if let Some(home) = home {
            let user_file = home.join(".claude").join(PROJECT_FILE);
            if user_file.is_file() {
                candidates.push((MemoryKind::User, user_file));
            }
        }

        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for (kind, path) in candidates {
            let Ok(canonical) = path.canonicalize() else {
                continue;
            };
            if !discovered.insert(canonical) {
                continue;
            }
            let text = read_with_imports(&path, 0, &mut seen);
            if text.trim().is_empty() {
                continue;
            }
            debug!(kind = %kind, path = %path.display(), len = text.len(), "Loaded memory file");
            sources.push(MemorySource { kind, path, text });
        }

        Self { sources }
    }

    pub fn sources(&self) -> &[MemorySource] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// One block of text, each source under a header naming it
    pub fn render(&self) -> String {
        self.sources
            .iter()
            .map(|s| format!("## {} memory ({})\n{}", s.kind, s.path.display(), s.text.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Files named `name` from `start` upward (nearest first), then in its subtree
fn discover(start: &Path, name: &str) -> Vec<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());

    let mut found: Vec<PathBuf> = start
        .ancestors()
        .map(|dir| dir.join(name))
        .filter(|p| p.is_file())
        .collect();

    let mut nested: Vec<PathBuf> = WalkDir::new(&start)
        .max_depth(MAX_WALK_DEPTH)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.depth() > 0 && e.file_type().is_file() && e.file_name() == name)
        .map(|e| e.into_path())
        .collect();
    nested.sort();

    for path in nested {
        if !found.contains(&path) {
            found.push(path);
        }
    }
    found
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Read a memory file and append its imports, depth first
///
/// Unreadable files, files beyond the depth limit and files already in
/// `seen` contribute nothing.
pub fn read_with_imports(path: &Path, depth: usize, seen: &mut HashSet<PathBuf>) -> String {
    if depth > MAX_IMPORT_DEPTH {
        return String::new();
    }
    let Ok(canonical) = path.canonicalize() else {
        return String::new();
    };
    if !seen.insert(canonical.clone()) {
        return String::new();
    }

    let content = match std::fs::read_to_string(&canonical) {
        Ok(c) if !c.is_empty() => c,
        _ => return String::new(),
    };

    let base_dir = canonical.parent().unwrap_or_else(|| Path::new("/"));
    let mut parts = vec![content.clone()];
    for import in parse_import_paths(&content) {
        let resolved = resolve_import(base_dir, &import);
        let imported = read_with_imports(&resolved, depth + 1, seen);
        if !imported.is_empty() {
            parts.push(imported);
        }
    }

    parts.join("\n")
}

/// `@path` lines outside code blocks and inline code spans
pub fn parse_import_paths(text: &str) -> Vec<String> {
    let without_blocks = CODE_BLOCK.replace_all(text, "");
    let cleaned = CODE_SPAN.replace_all(&without_blocks, "");

    cleaned
        .lines()
        .filter_map(|line| line.trim().strip_prefix('@'))
        .map(|rest| rest.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn resolve_import(base_dir: &Path, raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_parse_import_paths_skips_code() {
        let text = "@path/to/file\nNot an import\n@ another/path\n`@ignore/inline`\n```\n@ignore/codeblock\n```";
        assert_eq!(parse_import_paths(text), vec!["path/to/file", "another/path"]);
    }

    #[test]
    fn test_imports_expanded() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("imported.md"), "imported content");
        write(&dir.path().join("CLAUDE.md"), "Root content\n@imported.md");

        let text = read_with_imports(&dir.path().join("CLAUDE.md"), 0, &mut HashSet::new());
        assert_eq!(text, "Root content\n@imported.md\nimported content");
    }

    #[test]
    fn test_import_depth_limit() {
        let dir = TempDir::new().unwrap();
        let count = MAX_IMPORT_DEPTH + 2;
        for i in 0..count {
            let body = if i + 1 < count {
                format!("File {}\n@file{}.md", i, i + 1)
            } else {
                format!("File {}", i)
            };
            write(&dir.path().join(format!("file{}.md", i)), &body);
        }

        let text = read_with_imports(&dir.path().join("file0.md"), 0, &mut HashSet::new());
        assert!(text.contains("File 0"));
        assert!(text.contains(&format!("File {}", MAX_IMPORT_DEPTH)));
        assert!(!text.contains(&format!("File {}", MAX_IMPORT_DEPTH + 1)));
    }

    #[test]
    fn test_import_cycle() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("a.md"), "A\n@b.md");
        write(&dir.path().join("b.md"), "B\n@a.md");

        let text = read_with_imports(&dir.path().join("a.md"), 0, &mut HashSet::new());
        assert_eq!(text, "A\n@b.md\nB\n@a.md");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let text = read_with_imports(&dir.path().join("nope.md"), 0, &mut HashSet::new());
        assert!(text.is_empty());
    }

    #[test]
    fn test_precedence_and_nested_discovery() {
        let root = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let work = root.path().join("repo");

        write(&root.path().join("CLAUDE.md"), "outer project");
        write(&work.join("CLAUDE.md"), "repo project");
        write(&work.join("sub/CLAUDE.md"), "nested project");
        write(&work.join("node_modules/pkg/CLAUDE.md"), "vendored");
        write(&work.join(".hidden/CLAUDE.md"), "hidden");
        write(&work.join("CLAUDE.local.md"), "local override");
        write(&home.path().join(".claude/CLAUDE.md"), "user prefs");

        let memory = MemorySet::load_with_home(&work, Some(home.path()));
        let texts: Vec<&str> = memory.sources().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["repo project", "outer project", "nested project", "local override", "user prefs"]
        );

        let kinds: Vec<MemoryKind> = memory.sources().iter().map(|s| s.kind).collect();
        assert_eq!(kinds[3], MemoryKind::Local);
        assert_eq!(kinds[4], MemoryKind::User);
    }

    #[test]
    fn test_render() {
        let root = TempDir::new().unwrap();
        write(&root.path().join("CLAUDE.md"), "Use tabs.\n");

        let memory = MemorySet::load_with_home(root.path(), None);
        let rendered = memory.render();
        assert!(rendered.starts_with("## Project memory ("));
        assert!(rendered.ends_with("CLAUDE.md)\nUse tabs."));

        assert_eq!(MemorySet::default().render(), "");
    }
}
