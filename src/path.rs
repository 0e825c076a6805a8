//! Path helpers shared by every backend
//!
//! Location paths are absolute and end in `/`; file paths are absolute and
//! never end in `/`. Relative arguments are validated before any remote call.

use crate::error::{VfsError, VfsResult};

/// Require an absolute file path: leading `/`, no trailing `/`
pub fn validate_absolute_file_path(path: &str) -> VfsResult<()> {
    if !path.starts_with('/') {
        return Err(VfsError::validation(path, "absolute file path must begin with a slash"));
    }
    if path.ends_with('/') {
        return Err(VfsError::validation(path, "file path must not end with a slash"));
    }
    Ok(())
}

/// Require an absolute location path: leading and trailing `/`
pub fn validate_absolute_location_path(path: &str) -> VfsResult<()> {
    if !path.starts_with('/') {
        return Err(VfsError::validation(path, "absolute location path must begin with a slash"));
    }
    if !path.ends_with('/') {
        return Err(VfsError::validation(path, "location path must end with a slash"));
    }
    Ok(())
}

/// Require a relative file path: no leading `/`, no trailing `/`, not empty
pub fn validate_relative_file_path(path: &str) -> VfsResult<()> {
    if path.is_empty() {
        return Err(VfsError::validation(path, "file path must not be empty"));
    }
    if path.starts_with('/') {
        return Err(VfsError::validation(path, "relative file path must not begin with a slash"));
    }
    if path.ends_with('/') {
        return Err(VfsError::validation(path, "file path must not end with a slash"));
    }
    Ok(())
}

/// Require a relative location path: no leading `/`, trailing `/`
pub fn validate_relative_location_path(path: &str) -> VfsResult<()> {
    if path.starts_with('/') {
        return Err(VfsError::validation(
            path,
            "relative location path must not begin with a slash",
        ));
    }
    if !path.ends_with('/') {
        return Err(VfsError::validation(path, "location path must end with a slash"));
    }
    Ok(())
}

/// Require a listing prefix: relative, may be empty
pub fn validate_prefix(prefix: &str) -> VfsResult<()> {
    if prefix.starts_with('/') {
        return Err(VfsError::validation(prefix, "prefix must not begin with a slash"));
    }
    if prefix.split('/').any(|seg| seg == "..") {
        return Err(VfsError::validation(prefix, "prefix must not contain '..'"));
    }
    Ok(())
}

/// Resolve `.` and `..` segments and collapse repeated slashes
///
/// The result is always absolute. `..` never climbs above the root. A
/// trailing slash on the input is kept.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    out.push_str(&segments.join("/"));
    if trailing && !segments.is_empty() {
        out.push('/');
    }
    out
}

/// Join a relative location path onto an absolute location path
pub fn join_location(base: &str, relative: &str) -> VfsResult<String> {
    validate_absolute_location_path(base)?;
    validate_relative_location_path(relative)?;
    Ok(ensure_trailing_slash(&clean(&format!("{}{}", base, relative))))
}

/// Join a relative file path onto an absolute location path
pub fn join_file(base: &str, relative: &str) -> VfsResult<String> {
    validate_absolute_location_path(base)?;
    validate_relative_file_path(relative)?;
    let joined = clean(&format!("{}{}", base, relative));
    if joined == "/" || joined.ends_with('/') {
        return Err(VfsError::validation(relative, "path does not name a file"));
    }
    Ok(joined)
}

pub fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

pub fn remove_leading_slash(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Last segment of a path (`a/b/c.txt` -> `c.txt`)
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Directory part of an absolute file path, with trailing slash
pub fn dirname(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    }
}

/// Build `scheme://volume/path`
pub fn uri(scheme: &str, volume: &str, path: &str) -> String {
    format!("{}://{}{}", scheme, volume, ensure_leading_slash(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_paths() {
        assert!(validate_absolute_file_path("/a/b.txt").is_ok());
        assert!(validate_absolute_file_path("a/b.txt").is_err());
        assert!(validate_absolute_file_path("/a/").is_err());

        assert!(validate_relative_file_path("b.txt").is_ok());
        assert!(validate_relative_file_path("../b.txt").is_ok());
        assert!(validate_relative_file_path("/b.txt").is_err());
        assert!(validate_relative_file_path("dir/").is_err());
        assert!(validate_relative_file_path("").is_err());
    }

    #[test]
    fn test_validate_location_paths() {
        assert!(validate_absolute_location_path("/").is_ok());
        assert!(validate_absolute_location_path("/a/b/").is_ok());
        assert!(validate_absolute_location_path("/a/b").is_err());
        assert!(validate_relative_location_path("sub/").is_ok());
        assert!(validate_relative_location_path("../").is_ok());
        assert!(validate_relative_location_path("sub").is_err());
        assert!(validate_relative_location_path("/sub/").is_err());
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("/a/./b/../c"), "/a/c");
        assert_eq!(clean("/a//b/"), "/a/b/");
        assert_eq!(clean("/../.."), "/");
        assert_eq!(clean("/a/b/.."), "/a/");
        assert_eq!(clean(""), "/");
    }

    #[test]
    fn test_join_location() {
        assert_eq!(join_location("/a/b/", "c/").unwrap(), "/a/b/c/");
        assert_eq!(join_location("/a/b/", "../").unwrap(), "/a/");
        assert_eq!(join_location("/a/", "../../").unwrap(), "/");
        assert!(join_location("/a/", "c").is_err());
    }

    #[test]
    fn test_join_file() {
        assert_eq!(join_file("/a/b/", "c.txt").unwrap(), "/a/b/c.txt");
        assert_eq!(join_file("/a/b/", "../c.txt").unwrap(), "/a/c.txt");
        assert_eq!(join_file("/a/", "x/./y.txt").unwrap(), "/a/x/y.txt");
        assert!(join_file("/a/", "..").is_err());
    }

    #[test]
    fn test_basename_dirname() {
        assert_eq!(basename("/some/path/to/file.txt"), "file.txt");
        assert_eq!(basename("some/dir/"), "dir");
        assert_eq!(dirname("/some/path/to/file.txt"), "/some/path/to/");
        assert_eq!(dirname("/file.txt"), "/");
    }

    #[test]
    fn test_uri() {
        assert_eq!(uri("s3", "bucket", "/some/file.txt"), "s3://bucket/some/file.txt");
        assert_eq!(uri("mem", "b", "x/"), "mem://b/x/");
    }
}
