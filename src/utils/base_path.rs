//! Remote path helpers. Remote paths are always POSIX, so these work on
//! strings rather than `std::path` (which follows the local platform).

/// Join a base folder and a relative segment with exactly one separator.
pub fn join_remote_path(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base.is_empty() {
        return relative.to_string();
    }
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative)
}

/// Last path segment (`/var/www/installations/v1` -> `v1`).
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Parent folder (`/var/www/current` -> `/var/www`).
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None => ".",
    }
}

fn segments(path: &str) -> Vec<&str> {
    let mut result: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}

/// Collapse `.`, `..` and repeated separators.
pub fn normalize(path: &str) -> String {
    let joined = segments(path).join("/");
    if path.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Absolute form of a symlink `target` read from a link inside `link_dir`.
pub fn resolve_link_target(link_dir: &str, target: &str) -> String {
    if target.starts_with('/') {
        normalize(target)
    } else {
        normalize(&join_remote_path(link_dir, target))
    }
}

/// Relative path leading from folder `from_dir` to `to`.
///
/// Both inputs are absolute. Used for symlinks so an instance folder can be
/// moved or mounted elsewhere without breaking its `current` and shared links.
pub fn relative_path(from_dir: &str, to: &str) -> String {
    let from = segments(from_dir);
    let target = segments(to);

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = std::iter::repeat("..").take(from.len() - common).collect();
    parts.extend(target[common..].iter().copied());

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_avoids_double_separators() {
        assert_eq!(join_remote_path("/var/www/", "/shared"), "/var/www/shared");
        assert_eq!(join_remote_path("/var/www", "shared"), "/var/www/shared");
        assert_eq!(join_remote_path("", "shared"), "shared");
    }

    #[test]
    fn relative_path_to_child() {
        assert_eq!(
            relative_path("/var/www/shop/staging", "/var/www/shop/staging/installations/v1"),
            "installations/v1"
        );
    }

    #[test]
    fn relative_path_climbs_to_shared() {
        assert_eq!(
            relative_path(
                "/var/www/shop/staging/installations/v1/var",
                "/var/www/shop/staging/shared/var/persistent"
            ),
            "../../../shared/var/persistent"
        );
    }

    #[test]
    fn relative_path_same_folder() {
        assert_eq!(relative_path("/a/b/", "/a/b"), ".");
    }

    #[test]
    fn link_targets_resolve_against_the_link_folder() {
        assert_eq!(
            resolve_link_target("/var/www/shop/staging", "installations/v1"),
            "/var/www/shop/staging/installations/v1"
        );
        assert_eq!(
            resolve_link_target("/var/www/shop/staging", "../production/installations/v1/"),
            "/var/www/shop/production/installations/v1"
        );
        assert_eq!(resolve_link_target("/var/www", "/srv//v1"), "/srv/v1");
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent("/var/www/current"), "/var/www");
        assert_eq!(parent("/current"), "/");
        assert_eq!(file_name("/var/www/installations/v1/"), "v1");
    }
}
