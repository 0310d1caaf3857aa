use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// 서비스별 설정. 세 서비스가 같은 모양을 공유한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// 다운로드 루트 경로
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// 릴리스당 동시 다운로드 스레드 수 (2-3 권장)
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// `{루트}/{아티스트}/{아티스트 - 앨범}` 구조 사용 여부
    #[serde(default)]
    pub artist_folders: bool,
    /// 싱크 가사 선호 여부
    #[serde(default)]
    pub timed_lyrics: bool,
    /// 아티스트 일괄 다운로드에 참여 앨범 포함 여부
    #[serde(default)]
    pub contributions: bool,
    /// 커버 아트 해상도 (서비스별 픽셀 값)
    pub cover_size: Option<u32>,
    /// KKBOX 음질 (128k / 192k / 320k / hifi / hires)
    pub quality: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            username: None,
            password: None,
            path: default_path(),
            threads: default_threads(),
            artist_folders: false,
            timed_lyrics: false,
            contributions: false,
            cover_size: None,
            quality: None,
        }
    }
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        self.username.as_ref().is_some_and(|s| !s.is_empty())
            && self.password.as_ref().is_some_and(|s| !s.is_empty())
    }
}

fn default_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_threads() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bugs: ProviderConfig,
    #[serde(default)]
    pub genie: ProviderConfig,
    #[serde(default)]
    pub kkbox: ProviderConfig,
}

pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("sori")
        .join("config.toml")
}

pub fn load_config() -> Config {
    let path = config_path();
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.bugs.threads, 2);
        assert_eq!(cfg.genie.path, PathBuf::from("."));
        assert!(!cfg.kkbox.artist_folders);
        assert!(!cfg.bugs.is_configured());
    }

    #[test]
    fn test_partial_section() {
        let cfg: Config = toml::from_str(
            "[genie]\nusername = \"me\"\npassword = \"pw\"\nthreads = 3\ntimed_lyrics = true\n",
        )
        .unwrap();
        assert!(cfg.genie.is_configured());
        assert_eq!(cfg.genie.threads, 3);
        assert!(cfg.genie.timed_lyrics);
        assert!(!cfg.bugs.is_configured());
    }
}
