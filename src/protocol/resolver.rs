//! URL → sandboxed filesystem path.

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

use crate::types::{AppConfig, Error, Result};

/// Maps application URLs onto files under the application root.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    base_url: String,
    app_root: PathBuf,
}

impl ResourceResolver {
    /// `app_root` must be absolute; it is normalized lexically.
    pub fn new(base_url: impl Into<String>, app_root: impl AsRef<Path>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_root: normalize_dot_segments(app_root.as_ref()),
        }
    }

    /// Resolver for the configured application. A relative root is taken
    /// against the current directory.
    pub fn from_app(app: &AppConfig) -> Result<Self> {
        let root = if app.app_root.is_absolute() {
            app.app_root.clone()
        } else {
            std::env::current_dir()?.join(&app.app_root)
        };
        let mut app = app.clone();
        app.app_root = normalize_dot_segments(&root);
        Ok(Self::new(app.base_url(), &app.app_root))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    /// Resolve `url` to a path under the application root.
    ///
    /// Refused with [`Error::SandboxViolation`] when the URL does not start
    /// with the base URL followed by `/`, or when the normalized path leaves
    /// the root.
    pub fn resolve(&self, url: &str) -> Result<PathBuf> {
        let remainder = url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::sandbox_violation(url))?;

        let end = remainder.find(['?', '#']).unwrap_or(remainder.len());
        let relative = remainder[..end].trim_start_matches('/');

        let resolved = normalize_dot_segments(&self.app_root.join(relative));
        if !resolved.starts_with(&self.app_root) {
            tracing::warn!(url, "refused resource outside the application root");
            return Err(Error::sandbox_violation(url));
        }
        Ok(resolved)
    }
}

/// Lexical normalization: drops `.`, folds `..` into its parent. Never
/// touches the filesystem, so symlinks are not followed.
fn normalize_dot_segments(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut normals: Vec<OsString> = Vec::new();
    let mut anchored = false;

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                out.push(prefix.as_os_str());
                anchored = true;
            }
            Component::RootDir => {
                out.push(component.as_os_str());
                anchored = true;
            }
            Component::CurDir => {}
            Component::ParentDir => match normals.last() {
                Some(last) if last.as_os_str() != OsStr::new("..") => {
                    normals.pop();
                }
                _ if !anchored => normals.push(OsString::from("..")),
                _ => {}
            },
            Component::Normal(part) => normals.push(part.to_os_string()),
        }
    }

    out.extend(normals);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> ResourceResolver {
        ResourceResolver::new("app://localhost", "/app")
    }

    #[test]
    fn test_resolves_under_root() {
        assert_eq!(
            resolver().resolve("app://localhost/index.html").unwrap(),
            PathBuf::from("/app/index.html")
        );
        assert_eq!(
            resolver().resolve("app://localhost/css/./site/../main.css").unwrap(),
            PathBuf::from("/app/css/main.css")
        );
    }

    #[test]
    fn test_traversal_is_refused() {
        let err = resolver()
            .resolve("app://localhost/../../etc/passwd")
            .unwrap_err();
        assert!(matches!(err, Error::SandboxViolation(_)));
        assert_eq!(err.to_error_code(), "SANDBOX_VIOLATION");

        assert!(resolver().resolve("app://localhost/a/../../etc").is_err());
    }

    #[test]
    fn test_absolute_injection_stays_inside() {
        assert_eq!(
            resolver().resolve("app://localhost//etc/passwd").unwrap(),
            PathBuf::from("/app/etc/passwd")
        );
    }

    #[test]
    fn test_prefix_must_be_strict() {
        for url in [
            "app://localhost",
            "app://localhost.evil/index.html",
            "app://localhostx/index.html",
            "file:///etc/passwd",
            "https://localhost/index.html",
        ] {
            assert!(resolver().resolve(url).is_err(), "{url} must be refused");
        }
    }

    #[test]
    fn test_query_and_fragment_are_stripped() {
        assert_eq!(
            resolver().resolve("app://localhost/page.html?x=../../..#top").unwrap(),
            PathBuf::from("/app/page.html")
        );
        assert_eq!(
            resolver().resolve("app://localhost/page.html#/../../secret").unwrap(),
            PathBuf::from("/app/page.html")
        );
    }

    #[test]
    fn test_root_sibling_is_refused() {
        // "/app-other" shares the text prefix of "/app" but not the path prefix.
        assert!(resolver().resolve("app://localhost/../app-other/x").is_err());
    }

    #[test]
    fn test_file_scheme_against_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppConfig {
            scheme: "file".to_string(),
            app_root: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let resolver = ResourceResolver::from_app(&app).unwrap();
        let base = resolver.base_url().to_string();
        assert!(base.starts_with("file://"));

        let resolved = resolver.resolve(&format!("{base}/www/index.html")).unwrap();
        assert_eq!(resolved, normalize_dot_segments(&dir.path().join("www/index.html")));
        assert!(resolver.resolve(&format!("{base}/../outside")).is_err());
    }

    #[test]
    fn test_relative_root_is_anchored() {
        let app = AppConfig {
            app_root: PathBuf::from("www/../www"),
            ..AppConfig::default()
        };
        let resolver = ResourceResolver::from_app(&app).unwrap();
        assert!(resolver.app_root().is_absolute());
        assert!(resolver.app_root().ends_with("www"));
    }

    #[test]
    fn test_normalize_dot_segments() {
        assert_eq!(normalize_dot_segments(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_dot_segments(Path::new("/../..")), PathBuf::from("/"));
        assert_eq!(normalize_dot_segments(Path::new("../a/..")), PathBuf::from(".."));
    }

    proptest! {
        #[test]
        fn prop_never_escapes_root(
            segments in prop::collection::vec(
                prop::sample::select(vec!["..", ".", "a", "b", "etc", "", "passwd"]),
                0..12,
            )
        ) {
            let url = format!("app://localhost/{}", segments.join("/"));
            match resolver().resolve(&url) {
                Ok(path) => prop_assert!(path.starts_with("/app")),
                Err(err) => prop_assert!(matches!(err, Error::SandboxViolation(_))),
            }
        }
    }
}
