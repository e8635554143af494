//! Path module.
//!
//! This module contains the path helpers shared by the local
//! backends: lexical normalisation, folder abbreviation and parent
//! lookup.

use std::{
    env, fs,
    path::{Component, Path, PathBuf},
};

use super::{Error, Result};

/// Normalises a local path: makes it absolute, resolves `.` and `..`
/// lexically, then follows symlinks when the path exists.
pub fn canon(path: String) -> Result<String> {
    let mut buf = PathBuf::from(&path);
    if buf.is_relative() {
        let cwd = env::current_dir().map_err(|_| Error::PathNotAbsoluteError(path.clone()))?;
        buf = cwd.join(buf);
    }

    let mut normalized = PathBuf::new();
    for component in buf.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component.as_os_str()),
        }
    }

    if !normalized.is_absolute() {
        return Err(Error::PathNotAbsoluteError(path));
    }

    let resolved = fs::canonicalize(&normalized).unwrap_or(normalized);
    Ok(resolved.to_string_lossy().to_string())
}

/// Abbreviates a local path: a leading base folder becomes `=`.
/// Other paths are returned untouched.
pub fn pretty(path: String, folder: &str) -> String {
    match strip_dir_prefix(&path, folder) {
        Some(rest) if !rest.is_empty() => format!("={}", rest),
        _ => path,
    }
}

/// Returns the rest of `path` after the directory `dir`, if `path`
/// is inside it.
pub fn strip_dir_prefix<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return None;
    }

    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/').map(|rest| rest.trim_start_matches('/'))
    }
}

/// Returns the enclosing directory of a local path.
pub fn parent(path: String) -> Result<String> {
    let trimmed = path.trim_end_matches('/');
    match Path::new(trimmed).parent() {
        Some(parent) if !trimmed.is_empty() => Ok(parent.to_string_lossy().to_string()),
        _ => Err(Error::PathParentError(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canon_resolves_dots() {
        assert_eq!(
            "/nonexistent-mailbox-lib/a/c",
            canon("/nonexistent-mailbox-lib/a/b/../c/./".into()).unwrap()
        );
    }

    #[test]
    fn canon_makes_relative_absolute() {
        let path = canon("nonexistent-mailbox-lib".into()).unwrap();
        assert!(Path::new(&path).is_absolute());
        assert!(path.ends_with("/nonexistent-mailbox-lib"));
    }

    #[test]
    fn pretty_substitutes_folder() {
        assert_eq!("=INBOX", pretty("/home/u/Mail/INBOX".into(), "/home/u/Mail"));
        assert_eq!("=INBOX", pretty("/home/u/Mail/INBOX".into(), "/home/u/Mail/"));
        assert_eq!(
            "/home/u/Mailings/x",
            pretty("/home/u/Mailings/x".into(), "/home/u/Mail")
        );
        assert_eq!("/var/mail/u", pretty("/var/mail/u".into(), "/home/u/Mail"));
        assert_eq!("/home/u/Mail", pretty("/home/u/Mail".into(), "/home/u/Mail"));
    }

    #[test]
    fn pretty_leaves_home_paths_alone() {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let path = home.join("elsewhere/box").to_string_lossy().to_string();
        assert_eq!(path, pretty(path.clone(), "/nonexistent/Mail"));
    }

    #[test]
    fn parent_of_paths() {
        assert_eq!("/home/u", parent("/home/u/Mail/".into()).unwrap());
        assert_eq!("/", parent("/home".into()).unwrap());
        assert!(parent("/".into()).is_err());
    }
}
