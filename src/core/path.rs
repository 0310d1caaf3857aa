use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ReleaseMeta, TrackMeta};

/// 파일명에 사용할 수 없는 문자를 `_`로 치환하고 끝의 공백/마침표를 제거한다.
pub fn sanitize(s: &str) -> String {
    sanitize_for(s, cfg!(windows))
}

fn sanitize_for(s: &str, windows: bool) -> String {
    let replaced: String = s
        .chars()
        .map(|c| {
            if c == '/' || c == '\0' {
                return '_';
            }
            if windows && matches!(c, '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                return '_';
            }
            c
        })
        .collect();
    replaced.trim().trim_end_matches([' ', '.']).to_string()
}

/// 앨범 디렉토리 경로.
/// artist_folders가 켜져 있으면 `{루트}/{아티스트}/{아티스트 - 앨범}`,
/// 꺼져 있으면 `{루트}/{아티스트 - 앨범}`.
pub fn album_dir(root: &Path, artist_folders: bool, release: &ReleaseMeta) -> PathBuf {
    let artist = sanitize(&release.album_artist);
    let album = format!("{} - {}", artist, sanitize(&release.album));
    if artist_folders {
        root.join(artist).join(album)
    } else {
        root.join(album)
    }
}

/// 경로 길이 초과 시 쓰는 대체 앨범 디렉토리.
pub fn fallback_album_dir(root: &Path) -> PathBuf {
    root.join("EDIT ME")
}

/// 트랙이 저장될 디렉토리. 멀티 디스크 릴리스만 `Disc {n}` 하위 디렉토리를 쓴다.
pub fn disc_dir(album_path: &Path, release: &ReleaseMeta, disc: u32) -> PathBuf {
    if release.disc_total > 1 {
        album_path.join(format!("Disc {disc}"))
    } else {
        album_path.to_path_buf()
    }
}

/// 확장자를 제외한 트랙 파일 경로: `{NN}. {제목}`.
/// 확장자는 스트림이 해석된 뒤에야 붙는다.
pub fn track_base(dir: &Path, track: &TrackMeta) -> PathBuf {
    dir.join(format!("{:02}. {}", track.track_number, sanitize(&track.title)))
}

/// 파일명 길이 초과 시 쓰는 번호만 남긴 대체 이름.
pub fn fallback_track_base(dir: &Path, track: &TrackMeta) -> PathBuf {
    dir.join(format!("{:02}", track.track_number))
}

/// OS가 보고한 "이름이 너무 긺" 에러인지 판별한다.
/// ENAMETOOLONG: 리눅스 36, macOS 63, 윈도우 ERROR_FILENAME_EXCED_RANGE 206.
pub fn is_name_too_long(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(36) | Some(63) | Some(206))
}

/// 앨범 디렉토리와 디스크 하위 디렉토리를 워커 풀 시작 전에 모두 만든다.
/// 동시 mkdir 경쟁을 피하기 위함이다.
pub fn create_release_dirs(album_path: &Path, release: &ReleaseMeta) -> Result<()> {
    create_all(album_path)?;
    if release.disc_total > 1 {
        for disc in 1..=release.disc_total {
            create_all(&album_path.join(format!("Disc {disc}")))?;
        }
    }
    Ok(())
}

fn create_all(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    debug!("디렉토리 생성: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        if is_name_too_long(&e) {
            Error::PathTooLong(path.to_path_buf())
        } else {
            e.into()
        }
    })
}
