use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::api::Screen;
use crate::notify::DEFAULT_SUPPRESS_WINDOW;
use crate::table_event::Sorter;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "DirectoryAdmin";
const APP_NAME: &str = "diradmin";

pub const CONFIG_ENV: &str = "DIRADMIN_CONFIG";
pub const DATA_ENV: &str = "DIRADMIN_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AdminConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AdminConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AdminConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AdminConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AdminConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_dir = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("state"));

        Ok(Self {
            config_file,
            config_dir,
            database_path: data_dir.join("directory.db"),
            data_dir,
            state_dir,
        })
    }

    /// Everything under one directory; used by tests and throwaway setups.
    pub fn rooted(root: &Path) -> Self {
        let config_dir = root.join("config");
        let data_dir = root.join("data");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            database_path: data_dir.join("directory.db"),
            state_dir: data_dir.join("state"),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub screen: Screen,
    pub lists: ListOptions,
    pub notices: NoticeOptions,
    pub storage: StorageOptions,
}

impl AdminConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.lists.sanitize();
        Ok(())
    }
}

/// Which way stale list responses are resolved when two requests for one
/// list overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StalePolicy {
    /// Only the newest request for a list may change it.
    #[default]
    Discard,
    /// Whichever response arrives last is shown.
    LastArrivalWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub page_size: u32,
    pub child_page_size: u32,
    pub max_page_size: u32,
    pub stale_responses: StalePolicy,
    pub refresh_parent_on_child_mutation: bool,
    pub default_sort: Sorter,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            child_page_size: 5,
            max_page_size: 100,
            stale_responses: StalePolicy::Discard,
            refresh_parent_on_child_mutation: true,
            default_sort: Sorter::default(),
        }
    }
}

impl ListOptions {
    fn sanitize(&mut self) {
        if self.max_page_size == 0 {
            tracing::warn!("lists.max_page_size is 0, using 1");
            self.max_page_size = 1;
        }
        for (name, size) in [
            ("page_size", &mut self.page_size),
            ("child_page_size", &mut self.child_page_size),
        ] {
            let clamped = (*size).clamp(1, self.max_page_size);
            if clamped != *size {
                tracing::warn!(option = name, configured = *size, clamped, "page size out of range");
                *size = clamped;
            }
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeOptions {
    /// Identical error messages inside this window are shown once.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "suppress_window_ms")]
    pub suppress_window: Duration,
}

impl Default for NoticeOptions {
    fn default() -> Self {
        Self {
            suppress_window: DEFAULT_SUPPRESS_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
    /// Fill an empty database with sample categories and companies.
    pub seed_demo_data: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
            seed_demo_data: true,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_event::SortOrder;
    use tempfile::TempDir;

    type TestResult = Result<()>;

    #[test]
    fn first_run_writes_defaults() -> TestResult {
        let dir = TempDir::new()?;
        let loader = ConfigLoader::with_paths(ConfigPaths::rooted(dir.path()));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.lists.page_size, 10);
        assert_eq!(cfg.notices.suppress_window, Duration::from_millis(3_000));
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let written = fs::read_to_string(&loader.paths().config_file)?;
        assert!(written.contains("suppress_window_ms = 3000"));
        assert!(written.contains("stale_responses = \"discard\""));

        let reloaded = loader.load()?;
        assert_eq!(reloaded.lists.child_page_size, cfg.lists.child_page_size);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_for_the_rest() -> TestResult {
        let dir = TempDir::new()?;
        let paths = ConfigPaths::rooted(dir.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            r#"
screen = "companies"

[lists]
page_size = 25
stale_responses = "last-arrival-wins"
default_sort = { field = "name", order = "descend" }

[notices]
suppress_window_ms = 500
"#,
        )?;
        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.screen, Screen::Companies);
        assert_eq!(cfg.lists.page_size, 25);
        assert_eq!(cfg.lists.child_page_size, 5);
        assert_eq!(cfg.lists.stale_responses, StalePolicy::LastArrivalWins);
        assert_eq!(cfg.lists.default_sort, Sorter::new("name", SortOrder::Descend));
        assert_eq!(cfg.notices.suppress_window, Duration::from_millis(500));
        assert!(cfg.storage.seed_demo_data);
        Ok(())
    }

    #[test]
    fn page_sizes_are_clamped() -> TestResult {
        let dir = TempDir::new()?;
        let paths = ConfigPaths::rooted(dir.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[lists]\npage_size = 0\nchild_page_size = 500\nmax_page_size = 50\n",
        )?;
        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.lists.page_size, 1);
        assert_eq!(cfg.lists.child_page_size, 50);
        Ok(())
    }

    #[test]
    fn invalid_toml_is_reported_with_context() -> TestResult {
        let dir = TempDir::new()?;
        let paths = ConfigPaths::rooted(dir.path());
        paths.ensure_directories()?;
        fs::write(&paths.config_file, "[lists\n")?;
        let err = ConfigLoader::with_paths(paths)
            .load()
            .expect_err("broken toml");
        assert!(format!("{err:#}").contains("parsing config toml"));
        Ok(())
    }
}
