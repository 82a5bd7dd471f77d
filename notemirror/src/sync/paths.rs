use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps a slash-delimited mirror-relative path ("A/B/Journal.note") under `root`.
pub fn local_path_for(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    if relative.trim_matches('/').is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(relative.to_string()));
            }
        }
    }
    Ok(out)
}

/// Turns a remote display name into a single safe path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

pub fn join_relative(folder_path: &str, name: &str) -> String {
    if folder_path.is_empty() {
        name.to_string()
    } else {
        format!("{folder_path}/{name}")
    }
}

/// "A/B/Journal.note" -> "A/B/Journal"; only the final component loses its extension.
pub fn strip_extension(relative: &str) -> String {
    let (dir, name) = match relative.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, relative),
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    match dir {
        Some(dir) => format!("{dir}/{stem}"),
        None => stem.to_string(),
    }
}

/// "A/Same.note" + "d2" -> "A/Same d2.note". Gives an entry whose name
/// collides with another entry's path a name of its own.
pub fn with_id_suffix(relative: &str, id: &str) -> String {
    let (dir, name) = match relative.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, relative),
    };
    let id = sanitize_component(id);
    let name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} {id}.{ext}"),
        _ => format!("{name} {id}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name,
    }
}

pub fn file_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_relative_path_under_root() {
        let root = PathBuf::from("/mirror");
        let mapped = local_path_for(&root, "Work/Meetings/A.note").unwrap();
        assert_eq!(mapped, PathBuf::from("/mirror/Work/Meetings/A.note"));
    }

    #[test]
    fn rejects_parent_dir() {
        let root = PathBuf::from("/mirror");
        assert!(matches!(
            local_path_for(&root, "../secret"),
            Err(PathError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn rejects_empty() {
        let root = PathBuf::from("/mirror");
        assert!(matches!(local_path_for(&root, "/"), Err(PathError::Empty)));
    }

    #[test]
    fn sanitizes_separators_and_dot_names() {
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("  "), "_");
        assert_eq!(sanitize_component("Journal.note"), "Journal.note");
    }

    #[test]
    fn joins_root_level_names_without_slash() {
        assert_eq!(join_relative("", "A.note"), "A.note");
        assert_eq!(join_relative("X/Y", "A.note"), "X/Y/A.note");
    }

    #[test]
    fn strips_only_the_last_extension() {
        assert_eq!(strip_extension("A/B/Journal.note"), "A/B/Journal");
        assert_eq!(strip_extension("v1.2/Journal"), "v1.2/Journal");
        assert_eq!(strip_extension("Plan.v2.note"), "Plan.v2");
        assert_eq!(strip_extension(".hidden"), ".hidden");
    }

    #[test]
    fn file_name_takes_last_component() {
        assert_eq!(file_name("A/B/Journal.note"), "Journal.note");
        assert_eq!(file_name("Journal.note"), "Journal.note");
    }

    #[test]
    fn id_suffix_goes_before_extension() {
        assert_eq!(with_id_suffix("A/B/Same.note", "d2"), "A/B/Same d2.note");
        assert_eq!(with_id_suffix("Same.note", "d2"), "Same d2.note");
        assert_eq!(with_id_suffix("README", "x/y"), "README x_y");
        assert_eq!(with_id_suffix(".note", "d2"), ".note d2");
    }
}
