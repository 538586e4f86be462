use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::models::DEFAULT_LIMIT;

pub const DEFAULT_MAX_LIMIT: u32 = 1_000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;
/// SQLite's busy handler takes an `i32` millisecond count.
pub const MAX_QUERY_TIMEOUT_MS: u64 = 2_147_483_647;
pub const DEFAULT_DATABASE_FILE: &str = "healthkit_records.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    /// `None` selects the catalog compiled into the binary.
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathOverrides<'a> {
    pub data_dir: Option<&'a Path>,
    pub database: Option<&'a Path>,
    pub catalog: Option<&'a Path>,
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    overrides: PathOverrides<'_>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let data_dir = match overrides.data_dir {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(".healthq"),
    };
    let database_path = match overrides.database {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => data_dir.join(DEFAULT_DATABASE_FILE),
    };
    let catalog_path = overrides
        .catalog
        .map(|path| resolve_user_path(path, &home_dir, &cwd))
        .transpose()?;

    Ok(RuntimePaths {
        home_dir,
        cwd,
        data_dir: normalize_lexical(&data_dir),
        database_path: normalize_lexical(&database_path),
        catalog_path,
    })
}

/// Per-request bounds the validator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    default_limit: u32,
    max_limit: u32,
    timeout: Duration,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
        }
    }
}

impl QueryLimits {
    pub fn new(max_limit: u32, timeout: Duration) -> Result<Self> {
        if max_limit == 0 {
            bail!("max_limit must be greater than zero");
        }
        if timeout.is_zero() {
            bail!("query timeout must be greater than zero");
        }
        if timeout > Duration::from_millis(MAX_QUERY_TIMEOUT_MS) {
            bail!("query timeout must be at most {MAX_QUERY_TIMEOUT_MS}ms");
        }

        Ok(Self {
            default_limit: DEFAULT_LIMIT,
            max_limit,
            timeout,
        })
    }

    /// Limit applied when a spec omits one; never above `max_limit`.
    #[must_use]
    pub fn default_limit(&self) -> u32 {
        self.default_limit.min(self.max_limit)
    }

    #[must_use]
    pub fn max_limit(&self) -> u32 {
        self.max_limit
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::{MAX_QUERY_TIMEOUT_MS, PathOverrides, QueryLimits, resolve_runtime_paths};
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn defaults_database_under_healthq_data_dir() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides::default(),
        )
        .expect("paths should resolve");

        assert_eq!(paths.data_dir, Path::new("/home/tester/.healthq"));
        assert_eq!(
            paths.database_path,
            Path::new("/home/tester/.healthq/healthkit_records.sqlite")
        );
        assert!(paths.catalog_path.is_none());
    }

    #[test]
    fn database_follows_data_dir_override() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                data_dir: Some(Path::new("~/health")),
                ..PathOverrides::default()
            },
        )
        .expect("tilde override should resolve");

        assert_eq!(
            paths.database_path,
            Path::new("/home/tester/health/healthkit_records.sqlite")
        );
    }

    #[test]
    fn resolves_relative_catalog_against_cwd() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                catalog: Some(Path::new("./config/../config/metrics.json")),
                ..PathOverrides::default()
            },
        )
        .expect("relative override should resolve");

        assert_eq!(
            paths.catalog_path.as_deref(),
            Some(Path::new("/work/repo/config/metrics.json"))
        );
    }

    #[test]
    fn rejects_non_absolute_home_dir() {
        let err = resolve_runtime_paths(
            Path::new("home/tester"),
            Path::new("/work/repo"),
            PathOverrides::default(),
        )
        .expect_err("relative home dir must fail");

        assert!(
            err.to_string().contains("home_dir must be absolute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_tilde_username_syntax() {
        let err = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            PathOverrides {
                database: Some(Path::new("~someone/db.sqlite")),
                ..PathOverrides::default()
            },
        )
        .expect_err("~username syntax must fail");

        assert!(
            err.to_string()
                .contains("unsupported home expansion syntax"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn default_limit_never_exceeds_max() {
        let limits =
            QueryLimits::new(25, Duration::from_secs(1)).expect("limits should be accepted");
        assert_eq!(limits.default_limit(), 25);
        assert_eq!(QueryLimits::default().default_limit(), 100);
    }

    #[test]
    fn rejects_zero_max_limit() {
        assert!(QueryLimits::new(0, Duration::from_secs(1)).is_err());
        assert!(QueryLimits::new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn rejects_timeouts_beyond_sqlite_range() {
        let at_max = QueryLimits::new(10, Duration::from_millis(MAX_QUERY_TIMEOUT_MS))
            .expect("largest representable timeout should be accepted");
        assert_eq!(at_max.timeout().as_millis(), u128::from(MAX_QUERY_TIMEOUT_MS));

        let err = QueryLimits::new(10, Duration::from_millis(3_000_000_000))
            .expect_err("timeout above i32::MAX ms must fail");
        assert!(
            err.to_string().contains("at most"),
            "unexpected error: {err}"
        );
    }
}
