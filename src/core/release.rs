use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;
use crate::core::{fetch, path as paths, tag};
use crate::error::{Error, Result};
use crate::models::{ReleaseMeta, Resolved, TargetType, TrackMeta};
use crate::providers::Provider;

/// 대상 하나(아티스트/앨범/트랙)의 다운로드를 끝까지 진행한다.
///
/// 트랙 하나의 실패는 격리되어 로그만 남고, 인증 실패나 릴리스 메타데이터
/// 오류는 릴리스 전체를 중단시킨 채 호출자에게 올라간다.
pub fn download<P: Provider>(
    provider: &P,
    cfg: &ProviderConfig,
    target: TargetType,
    id: &str,
) -> Result<()> {
    Orchestrator { provider, cfg }.run(target, id)
}

struct Orchestrator<'a, P: Provider> {
    provider: &'a P,
    cfg: &'a ProviderConfig,
}

/// 릴리스 단위로 내려받은 커버 아트 경로.
struct CoverPaths {
    full: Option<PathBuf>,
    embed: Option<PathBuf>,
}

impl CoverPaths {
    /// 임베드용 사본이 있으면 그것을, 없으면 원본을 태깅에 쓴다.
    fn embed_path(&self) -> Option<&Path> {
        self.embed.as_deref().or(self.full.as_deref())
    }
}

impl<P: Provider> Orchestrator<'_, P> {
    fn run(&self, target: TargetType, id: &str) -> Result<()> {
        match target {
            TargetType::Album => self.album(id, None),
            TargetType::Track => {
                let album_id = self.provider.resolve_track_album(id)?;
                self.album(&album_id, Some(id))
            }
            TargetType::Artist => self.artist(id),
        }
    }

    fn artist(&self, id: &str) -> Result<()> {
        let albums = self.provider.fetch_artist_albums(id)?;
        info!("디스코그래피 {}장", albums.len());
        for album in albums {
            if album.contribution && !self.cfg.contributions {
                info!("참여 앨범 제외: {}", album.title);
                continue;
            }
            // 앨범 하나의 실패는 디스코그래피의 다음 앨범으로 번지지 않는다
            match self.album(&album.id, None) {
                Ok(()) => {}
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => error!("앨범 실패 ({}): {}", album.title, e),
            }
        }
        Ok(())
    }

    fn album(&self, id: &str, only_track: Option<&str>) -> Result<()> {
        let release = self.provider.fetch_release(id)?;
        info!(
            "앨범: {} - {} ({}곡)",
            release.album_artist,
            release.album,
            release.tracks.len()
        );

        let album_path = self.prepare_dirs(&release)?;
        let cover = self.download_covers(&release, &album_path)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.threads.max(1))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        info!("스레드: {}", self.cfg.threads.max(1));

        let targets: Vec<&TrackMeta> = release
            .tracks
            .iter()
            .filter(|t| only_track.map_or(true, |id| t.id == id))
            .collect();
        if let Some(track_id) = only_track {
            if targets.is_empty() {
                warn!("앨범에 요청한 트랙이 없습니다, 건너뜀: {track_id}");
            }
        }

        pool.install(|| {
            targets.par_iter().for_each(|track| {
                if let Err(e) = self.track(&release, track, &album_path, cover.embed_path()) {
                    error!("트랙 실패 ({}): {}", track.title, e);
                }
            });
        });

        // 임베드 전용 저해상도 커버는 릴리스가 끝나면 지운다
        if let Some(embed) = cover.embed {
            debug!("임베드용 커버 삭제: {}", embed.display());
            let _ = fs::remove_file(embed);
        }
        Ok(())
    }

    /// 워커 풀 시작 전에 디렉토리를 전부 만든다.
    /// 경로 길이 초과면 대체 디렉토리로 한 번 재시도한다.
    fn prepare_dirs(&self, release: &ReleaseMeta) -> Result<PathBuf> {
        let planned = paths::album_dir(&self.cfg.path, self.cfg.artist_folders, release);
        match paths::create_release_dirs(&planned, release) {
            Ok(()) => Ok(planned),
            Err(Error::PathTooLong(p)) => {
                warn!("경로 길이 초과, 대체 디렉토리 사용: {}", p.display());
                let fallback = paths::fallback_album_dir(&self.cfg.path);
                paths::create_release_dirs(&fallback, release)?;
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }

    fn download_covers(&self, release: &ReleaseMeta, album_path: &Path) -> Result<CoverPaths> {
        if release.cover.full_url.is_empty() {
            warn!("커버 아트 URL 없음: {}", release.album);
            return Ok(CoverPaths { full: None, embed: None });
        }
        let full = album_path.join("cover.jpg");
        fetch::download_cover(self.provider.http(), &release.cover.full_url, &full)?;
        let embed = match &release.cover.embed_url {
            Some(url) => {
                let path = album_path.join("embed.jpg");
                fetch::download_cover(self.provider.http(), url, &path)?;
                Some(path)
            }
            None => None,
        };
        Ok(CoverPaths { full: Some(full), embed })
    }

    /// 트랙 하나의 전체 처리.
    /// 존재 확인 → 스트림 해석 → 다운로드 → 개명 → 가사 → 태깅 순서를 지킨다.
    fn track(
        &self,
        release: &ReleaseMeta,
        track: &TrackMeta,
        album_path: &Path,
        cover: Option<&Path>,
    ) -> Result<()> {
        debug!("트랙 처리: {} ({})", track.title, track.id);
        let dir = paths::disc_dir(album_path, release, track.disc_number);
        let base = paths::track_base(&dir, track);

        if let Some((path, _)) = fetch::existing_final(&base) {
            debug!("{} 이미 존재함, 건너뜀", path.display());
            return Ok(());
        }

        let desc = match self.provider.fetch_stream(track)? {
            Resolved::Available(desc) => desc,
            Resolved::Unavailable => {
                info!("제공되지 않음, 건너뜀: {}", track.title);
                return Ok(());
            }
        };

        let status = match fetch::fetch(self.provider.http(), &desc, &base) {
            Err(Error::PathTooLong(_)) => {
                warn!("파일명 길이 초과, 번호로 대체: {:02}", track.track_number);
                fetch::fetch(
                    self.provider.http(),
                    &desc,
                    &paths::fallback_track_base(&dir, track),
                )?
            }
            other => other?,
        };

        let (path, kind) = match status {
            fetch::FetchStatus::Unavailable => {
                info!("스트림 없음, 건너뜀: {}", track.title);
                return Ok(());
            }
            fetch::FetchStatus::AlreadyExists(path, _) => {
                debug!("{} 이미 존재함, 건너뜀", path.display());
                return Ok(());
            }
            fetch::FetchStatus::Done(path, kind) => (path, kind),
        };

        let lyrics = match self.provider.fetch_lyrics(track, self.cfg.timed_lyrics) {
            Ok(lyrics) => lyrics,
            Err(e) => {
                warn!("가사 조회 실패 ({}): {}", track.title, e);
                None
            }
        };

        // 태깅 실패 시에도 오디오 파일은 남는다
        tag::tag(&path, kind, release, track, lyrics.as_ref(), cover)?;
        info!("완료: {}", path.display());
        Ok(())
    }
}
