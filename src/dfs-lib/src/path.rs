use crate::{DfsError, DfsResult};

/// Canonicalize a namespace path: absolute, `/`-separated, no empty
/// segments, trailing `/` stripped except for the root itself.
pub fn clean_path(path: &str) -> DfsResult<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(DfsError::InvalidParam("path cannot be empty".to_string()));
    }
    if !trimmed.starts_with('/') {
        return Err(DfsError::InvalidParam(format!(
            "path must start with / but was '{}'",
            trimmed
        )));
    }

    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() {
        return Ok("/".to_string());
    }

    for segment in stripped[1..].split('/') {
        if segment.is_empty() {
            return Err(DfsError::InvalidParam(format!(
                "path contains an empty segment: '{}'",
                path
            )));
        }
    }

    Ok(stripped.to_string())
}

/// Split a canonical path into `(full, parent, name)`. The root splits
/// into `("/", "/", "")`.
pub fn split_path(path: &str) -> DfsResult<(String, String, String)> {
    let full = clean_path(path)?;
    if full == "/" {
        return Ok(("/".to_string(), "/".to_string(), String::new()));
    }

    let last = full
        .rfind('/')
        .ok_or_else(|| DfsError::InvalidParam(format!("invalid path '{}'", full)))?;
    let parent = if last == 0 {
        "/".to_string()
    } else {
        full[..last].to_string()
    };
    let name = full[last + 1..].to_string();

    Ok((full, parent, name))
}

/// Name segments of a canonical path, root first excluded: `[]` for `/`.
pub fn segments(path: &str) -> DfsResult<Vec<String>> {
    let full = clean_path(path)?;
    if full == "/" {
        return Ok(Vec::new());
    }
    Ok(full[1..].split('/').map(|s| s.to_string()).collect())
}

/// Join a directory path and a child name into a canonical child path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
