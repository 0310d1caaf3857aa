use anyhow::Result;
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use tracing::error;

use crate::config::{self, ProviderConfig};
use crate::core::release;
use crate::error::Error;
use crate::models::TargetType;
use crate::providers::bugs::BugsClient;
use crate::providers::genie::GenieClient;
use crate::providers::kkbox::KkboxClient;
use crate::providers::Provider;

#[derive(Parser)]
#[command(name = "sori", about = "Bugs / Genie / KKBOX 음원 다운로더")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 주소의 앨범/아티스트/트랙 다운로드
    Down {
        /// 음원 서비스 웹 주소 (여러 개 가능)
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,
    },
    /// 서비스 계정과 다운로드 옵션 설정
    Config,
}

/// URL에서 판별한 서비스 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Bugs,
    Genie,
    Kkbox,
}

impl Service {
    fn label(self) -> &'static str {
        match self {
            Service::Bugs => "Bugs",
            Service::Genie => "Genie",
            Service::Kkbox => "KKBOX",
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Down { urls } => cmd_down(&urls),
        Commands::Config => cmd_config(),
    }
}

/// 서비스 웹 주소를 (서비스, 대상 종류, ID)로 해석한다.
fn parse_url(url: &str) -> Result<(Service, TargetType, String), Error> {
    let invalid = || Error::InvalidUrl(url.to_string());

    if url.contains("bugs.co.kr") {
        let mut segments = url.trim_end_matches('/').split('/').rev();
        let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let id = id.split('?').next().unwrap_or(id);
        if !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let target = match segments.next() {
            Some("album") => TargetType::Album,
            Some("artist") => TargetType::Artist,
            Some("track") => TargetType::Track,
            _ => return Err(invalid()),
        };
        return Ok((Service::Bugs, target, id.to_string()));
    }

    if url.contains("genie.co.kr") {
        let target = if url.contains("artistInfo") {
            TargetType::Artist
        } else if url.contains("albumInfo") {
            TargetType::Album
        } else {
            return Err(invalid());
        };
        // ID는 주소 끝의 숫자 부분이다 (?xxnm=80006308 꼴)
        let id: String = url
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if id.is_empty() {
            return Err(invalid());
        }
        return Ok((Service::Genie, target, id));
    }

    if url.contains("kkbox.com") {
        let mut segments = url.trim_end_matches('/').split('/').rev();
        let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let target = match segments.next() {
            Some("album") => TargetType::Album,
            Some("artist") => TargetType::Artist,
            Some("song") => TargetType::Track,
            _ => return Err(invalid()),
        };
        return Ok((Service::Kkbox, target, id.to_string()));
    }

    Err(invalid())
}

fn cmd_down(urls: &[String]) -> Result<()> {
    let cfg = config::load_config();

    // 클라이언트는 처음 쓰일 때 한 번만 로그인한다
    let mut bugs: Option<BugsClient> = None;
    let mut genie: Option<GenieClient> = None;
    let mut kkbox: Option<KkboxClient> = None;

    for url in urls {
        let (service, target, id) = match parse_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("{e}");
                continue;
            }
        };

        let provider_cfg = match service {
            Service::Bugs => &cfg.bugs,
            Service::Genie => &cfg.genie,
            Service::Kkbox => &cfg.kkbox,
        };
        if !provider_cfg.is_configured() {
            error!(
                "{} 계정이 설정되지 않았습니다. 먼저 'sori config'를 실행하세요",
                service.label()
            );
            continue;
        }

        let result = match service {
            Service::Bugs => {
                let client = ensure(&mut bugs, || BugsClient::new(provider_cfg))?;
                release::download(client, provider_cfg, target, &id)
            }
            Service::Genie => {
                let client = ensure(&mut genie, || GenieClient::new(provider_cfg))?;
                release::download(client, provider_cfg, target, &id)
            }
            Service::Kkbox => {
                let client = ensure(&mut kkbox, || KkboxClient::new(provider_cfg))?;
                release::download(client, provider_cfg, target, &id)
            }
        };

        match result {
            Ok(()) => {}
            // 인증 문제는 이후 주소도 전부 실패하므로 즉시 중단한다
            Err(e @ Error::Auth(_)) => anyhow::bail!("{e}"),
            Err(e) => error!("다운로드 실패 ({url}): {e}"),
        }
    }
    Ok(())
}

fn ensure<'a, P: Provider>(
    slot: &'a mut Option<P>,
    init: impl FnOnce() -> Result<P, Error>,
) -> Result<&'a P, Error> {
    if slot.is_none() {
        *slot = Some(init()?);
    }
    match slot {
        Some(client) => Ok(client),
        None => unreachable!(),
    }
}

fn cmd_config() -> Result<()> {
    let mut cfg = config::load_config();

    println!("서비스별 계정과 다운로드 옵션을 설정합니다.");
    println!("건너뛰려면 해당 서비스 설정 여부에서 아니오를 선택하세요.\n");

    prompt_provider("Bugs", &mut cfg.bugs)?;
    prompt_provider("Genie", &mut cfg.genie)?;
    prompt_provider("KKBOX", &mut cfg.kkbox)?;

    config::save_config(&cfg)?;
    println!("\n설정이 저장되었습니다: {}", config::config_path().display());
    Ok(())
}

fn prompt_provider(label: &str, cfg: &mut ProviderConfig) -> Result<()> {
    let edit = Confirm::new()
        .with_prompt(format!("{label} 설정을 변경하시겠습니까?"))
        .default(false)
        .interact()?;
    if !edit {
        return Ok(());
    }

    let username: String = Input::new()
        .with_prompt(format!("{label} 아이디"))
        .with_initial_text(cfg.username.clone().unwrap_or_default())
        .interact_text()?;
    let password = Password::new()
        .with_prompt(format!("{label} 비밀번호"))
        .interact()?;
    let path: String = Input::new()
        .with_prompt("다운로드 경로")
        .with_initial_text(cfg.path.display().to_string())
        .interact_text()?;
    let threads: usize = Input::new()
        .with_prompt("동시 다운로드 수")
        .default(cfg.threads)
        .interact_text()?;
    let artist_folders = Confirm::new()
        .with_prompt("아티스트별 폴더를 만들까요?")
        .default(cfg.artist_folders)
        .interact()?;
    let timed_lyrics = Confirm::new()
        .with_prompt("싱크 가사를 선호합니까?")
        .default(cfg.timed_lyrics)
        .interact()?;
    let contributions = Confirm::new()
        .with_prompt("아티스트 일괄 다운로드에 참여 앨범을 포함합니까?")
        .default(cfg.contributions)
        .interact()?;

    cfg.username = Some(username);
    cfg.password = Some(password);
    cfg.path = path.into();
    cfg.threads = threads;
    cfg.artist_folders = artist_folders;
    cfg.timed_lyrics = timed_lyrics;
    cfg.contributions = contributions;

    if label == "KKBOX" {
        let quality: String = Input::new()
            .with_prompt("음질 (128k/192k/320k/hifi/hires)")
            .with_initial_text(cfg.quality.clone().unwrap_or_else(|| "320k".to_string()))
            .interact_text()?;
        cfg.quality = Some(quality);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bugs_urls() {
        let (service, target, id) =
            parse_url("https://music.bugs.co.kr/album/20487313").unwrap();
        assert_eq!(service, Service::Bugs);
        assert_eq!(target, TargetType::Album);
        assert_eq!(id, "20487313");

        let (_, target, id) = parse_url("https://music.bugs.co.kr/artist/80219706/").unwrap();
        assert_eq!(target, TargetType::Artist);
        assert_eq!(id, "80219706");

        let (_, target, _) = parse_url("https://music.bugs.co.kr/track/33077590").unwrap();
        assert_eq!(target, TargetType::Track);
    }

    #[test]
    fn test_parse_genie_urls() {
        let (service, target, id) =
            parse_url("https://www.genie.co.kr/detail/albumInfo?axnm=81451328").unwrap();
        assert_eq!(service, Service::Genie);
        assert_eq!(target, TargetType::Album);
        assert_eq!(id, "81451328");

        let (_, target, id) =
            parse_url("https://www.genie.co.kr/detail/artistInfo?xxnm=80006308").unwrap();
        assert_eq!(target, TargetType::Artist);
        assert_eq!(id, "80006308");
    }

    #[test]
    fn test_parse_kkbox_urls() {
        let (service, target, id) =
            parse_url("https://www.kkbox.com/kr/ko/album/Cu9a4nZvA8pgFhVuEWl7").unwrap();
        assert_eq!(service, Service::Kkbox);
        assert_eq!(target, TargetType::Album);
        assert_eq!(id, "Cu9a4nZvA8pgFhVuEWl7");

        let (_, target, _) =
            parse_url("https://www.kkbox.com/kr/ko/song/0sNFZkX0XvlvGQRHp1").unwrap();
        assert_eq!(target, TargetType::Track);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_url("https://example.com/album/1").is_err());
        assert!(parse_url("https://music.bugs.co.kr/album/not-a-number").is_err());
        assert!(parse_url("https://www.genie.co.kr/detail/somewhere?x=1").is_err());
    }
}
