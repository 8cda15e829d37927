use kanban_core::paths::KANBAN_DIR;
use std::path::{Path, PathBuf};

/// Resolve the board's root directory.
///
/// Priority:
/// 1. `--root` flag / `KANBAN_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.kanban/`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd, KANBAN_DIR)
        .or_else(|| find_upward(&cwd, ".git"))
        .unwrap_or(cwd)
}

fn find_upward(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_kanban_dir_above_start() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".kanban")).unwrap();
        let deep = dir.path().join("work/features/deep");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_upward(&deep, KANBAN_DIR).unwrap(), dir.path());
    }

    #[test]
    fn kanban_dir_beats_enclosing_git_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let board = dir.path().join("board");
        std::fs::create_dir_all(board.join(".kanban")).unwrap();
        let found = find_upward(&board, KANBAN_DIR).or_else(|| find_upward(&board, ".git"));
        assert_eq!(found.unwrap(), board);
    }
}
