//! External command helpers shared by the worker and server wrappers

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Run a command to completion in `dir`, treating a non-zero exit as
/// an error.
pub(crate) async fn run_checked(argv: &[String], dir: &Path) -> io::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::other("empty command"));
    };
    let status = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        return Err(io::Error::other(format!("{program} exited with {status}")));
    }
    Ok(())
}

/// Materialize a working copy of `repository` at `dest`.
///
/// Git URLs are cloned shallow on the configured branch; anything else
/// is taken as a local directory and copied. Fails if `dest` already
/// exists.
pub(crate) async fn fetch_source(repository: &str, branch: &str, dest: &Path) -> io::Result<()> {
    if repository.contains("://") || repository.ends_with(".git") {
        let argv = vec![
            "git".to_string(),
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            repository.to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        let cwd = dest.parent().unwrap_or(Path::new("."));
        run_checked(&argv, cwd).await
    } else {
        copy_tree(Path::new(repository), dest).await
    }
}

/// Recursive directory copy on the blocking pool.
pub(crate) async fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    let src: PathBuf = src.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
        .await
        .map_err(io::Error::other)?
}

fn copy_tree_blocking(src: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree_blocking(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_tree_copies_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        std::fs::write(src.join("sub/b.txt"), "b").unwrap();

        let dest = tmp.path().join("dest");
        copy_tree(&src, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(dest.join("sub/b.txt")).unwrap(),
            "b"
        );
    }

    #[tokio::test]
    async fn test_copy_tree_fails_on_existing_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();

        let dest = tmp.path().join("dest");
        std::fs::write(&dest, "in the way").unwrap();

        assert!(copy_tree(&src, &dest).await.is_err());
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure_status() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(run_checked(&["true".to_string()], tmp.path()).await.is_ok());
        assert!(run_checked(&["false".to_string()], tmp.path())
            .await
            .is_err());
        assert!(run_checked(&[], tmp.path()).await.is_err());
    }
}
