#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
};

use crate::fetch::{DEFAULT_MAX_VIDEO_BYTES, DEFAULT_VIDEO_CONTAINER, FetchConstraints};
use crate::pipeline::DEFAULT_AUDIO_FORMAT;
use crate::storage::StorageLayout;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STORAGE_ROOT: &str = "public";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";

const MIB: u64 = 1024 * 1024;

/// Everything the service needs at runtime. Built once at startup and handed
/// to the workflow; nothing reads globals after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub storage_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_video_bytes: u64,
    pub video_container: String,
    pub audio_format: String,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
}

impl ServiceConfig {
    pub fn fetch_constraints(&self) -> FetchConstraints {
        FetchConstraints {
            video_container: self.video_container.clone(),
            max_video_bytes: self.max_video_bytes,
        }
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_root)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
            video_container: DEFAULT_VIDEO_CONTAINER.to_string(),
            audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            yt_dlp: PathBuf::from(DEFAULT_YT_DLP),
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
        }
    }
}

/// Values supplied on the command line. They win over the environment and
/// the env file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub storage_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<ServiceConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<ServiceConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let storage_root = overrides
        .storage_root
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| lookup("STORAGE_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    let host = overrides
        .host
        .and_then(non_blank)
        .or_else(|| lookup("HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let max_video_bytes = lookup("MAX_VIDEO_MB")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|mb| *mb > 0)
        .and_then(|mb| mb.checked_mul(MIB))
        .unwrap_or(DEFAULT_MAX_VIDEO_BYTES);
    let yt_dlp = lookup("YT_DLP_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let ffmpeg = lookup("FFMPEG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));

    Ok(ServiceConfig {
        storage_root,
        host,
        port,
        max_video_bytes,
        yt_dlp,
        ffmpeg,
        ..ServiceConfig::default()
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .and_then(non_blank)
        .or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses a dotenv file without touching the process environment. A missing
/// file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let iter =
        dotenvy::from_path_iter(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) = item.with_context(|| format!("Parsing {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> ServiceConfig {
        let env = make_env(contents);
        let vars = read_env_file(env.path()).unwrap();
        build_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn empty_sources_yield_defaults() {
        let config = build_config(&HashMap::new(), |_| None).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_video_bytes, 1000 * 1024 * 1024);
        assert_eq!(config.storage_root, PathBuf::from("public"));
        assert_eq!(config.bind_address(), "0.0.0.0:3001");
    }

    #[test]
    fn env_file_sets_port_and_limits() {
        let config = config_from(
            "PORT=4242\nMAX_VIDEO_MB=\"50\"\nSTORAGE_ROOT=/srv/media\nYT_DLP_PATH='/opt/yt-dlp'\n",
        );
        assert_eq!(config.port, 4242);
        assert_eq!(config.max_video_bytes, 50 * 1024 * 1024);
        assert_eq!(config.storage_root, PathBuf::from("/srv/media"));
        assert_eq!(config.yt_dlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(config.fetch_constraints().max_video_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from("PORT=nope\nMAX_VIDEO_MB=-3\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_video_bytes, DEFAULT_MAX_VIDEO_BYTES);

        let config = config_from("MAX_VIDEO_MB=0\n");
        assert_eq!(config.max_video_bytes, DEFAULT_MAX_VIDEO_BYTES);
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_env("FFMPEG_PATH=/file/ffmpeg\nPORT=5000\n").path()).unwrap();
        let config = build_config(&vars, |key| {
            (key == "FFMPEG_PATH").then(|| "/env/ffmpeg".to_string())
        })
        .unwrap();
        assert_eq!(config.ffmpeg, PathBuf::from("/env/ffmpeg"));
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("STORAGE_ROOT".to_string(), "/file-root".to_string());
        vars.insert("HOST".to_string(), "file-host".to_string());
        vars.insert("PORT".to_string(), "7000".to_string());

        let overrides = ConfigOverrides {
            storage_root: Some(PathBuf::from("/override-root")),
            host: None,
            port: Some(9000),
            env_path: None,
        };
        let config = build_config_with_overrides(
            &vars,
            |key| match key {
                "HOST" => Some("env-host".to_string()),
                "PORT" => Some("8000".to_string()),
                _ => None,
            },
            overrides,
        )
        .unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/override-root"));
        assert_eq!(config.host, "env-host");
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let vars = read_env_file(make_env("HOST=\"   \"\nSTORAGE_ROOT=\n").path()).unwrap();
        let config = build_config_with_overrides(
            &vars,
            |_| Some(String::new()),
            ConfigOverrides {
                host: Some("  ".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.storage_root, PathBuf::from(DEFAULT_STORAGE_ROOT));
    }

    #[test]
    fn read_env_file_handles_export_comments_and_quotes() {
        let env = make_env(
            "# service settings\nexport PORT=9090\nHOST='127.0.0.1'\nSTORAGE_ROOT=\"/data\"\n",
        );
        let vars = read_env_file(env.path()).unwrap();
        assert_eq!(vars.get("PORT").unwrap(), "9090");
        assert_eq!(vars.get("HOST").unwrap(), "127.0.0.1");
        assert_eq!(vars.get("STORAGE_ROOT").unwrap(), "/data");
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_config_reads_the_given_env_file() {
        let env = make_env("STORAGE_ROOT=/from-file\n");
        let config = resolve_config(ConfigOverrides {
            env_path: Some(env.path().to_path_buf()),
            port: Some(1234),
            ..ConfigOverrides::default()
        })
        .unwrap();
        assert_eq!(config.port, 1234);
        // Only STORAGE_ROOT from the process env could shadow the file value.
        if env::var_os("STORAGE_ROOT").is_none() {
            assert_eq!(config.storage_root, PathBuf::from("/from-file"));
        }
    }
}
