use std::fs;
use std::path::Path;

use id3::frame::{Comment, Content, Frame, PictureType};
use id3::{TagLike, Version};
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture};
use lofty::tag::{ItemKey, Tag, TagExt, TagType};
use tracing::debug;

use crate::error::Result;
use crate::models::{ContainerKind, Lyrics, ReleaseMeta, TrackMeta};

/// 표준 태그 집합(ALBUM, ARTIST, TITLE, 번호/총수, DATE, GENRE, LABEL,
/// COMMENT, LYRICS)과 커버 아트를 컨테이너별 네이티브 표현으로 기록한다.
///
/// 태깅 실패는 호출자에게 보고되지만 이미 받은 오디오 파일은 지우지 않는다.
/// 받았지만 태그 없는 상태로 남아 재시도 시 다시 태깅된다.
pub fn tag(
    path: &Path,
    kind: ContainerKind,
    release: &ReleaseMeta,
    track: &TrackMeta,
    lyrics: Option<&Lyrics>,
    cover: Option<&Path>,
) -> Result<()> {
    debug!("태그 기록: {}", path.display());
    match kind {
        ContainerKind::Mp3 => tag_id3(path, release, track, lyrics, cover),
        ContainerKind::Flac => tag_lofty(path, TagType::VorbisComments, release, track, lyrics, cover),
        ContainerKind::Mp4 => tag_lofty(path, TagType::Mp4Ilst, release, track, lyrics, cover),
    }
}

/// MP3: ID3v2.4 프레임으로 기록한다.
fn tag_id3(
    path: &Path,
    release: &ReleaseMeta,
    track: &TrackMeta,
    lyrics: Option<&Lyrics>,
    cover: Option<&Path>,
) -> Result<()> {
    let mut tag = id3::Tag::read_from_path(path).unwrap_or_else(|_| id3::Tag::new());

    tag.set_title(&track.title);
    tag.set_album(&release.album);
    tag.set_artist(&track.artist);
    tag.set_album_artist(&release.album_artist);
    if !release.genre.is_empty() {
        tag.set_genre(&release.genre);
    }
    if !release.label.is_empty() {
        tag.set_text("TPUB", &release.label);
    }
    if !release.release_date.is_empty() {
        tag.set_text("TDRC", &release.release_date);
    }
    tag.set_text("TRCK", format!("{}/{}", track.track_number, track.track_total));
    tag.set_text("TPOS", format!("{}/{}", track.disc_number, release.disc_total));
    tag.add_frame(Frame::with_content(
        "COMM",
        Content::Comment(Comment {
            lang: "kor".to_string(),
            description: String::new(),
            text: track.id.clone(),
        }),
    ));

    // 가사가 없으면 프레임 자체를 두지 않는다. 빈 문자열로 덮지 않는다.
    if let Some(lyrics) = lyrics {
        tag.add_frame(Frame::with_content(
            "USLT",
            Content::Lyrics(id3::frame::Lyrics {
                lang: "kor".to_string(),
                description: String::new(),
                text: lyrics.text().to_string(),
            }),
        ));
    }

    if let Some(cover_path) = cover {
        let data = fs::read(cover_path)?;
        // 재태깅 시 이미지가 누적되지 않도록 기존 그림을 제거한다
        tag.remove_all_pictures();
        tag.add_frame(id3::frame::Picture {
            mime_type: mime_str(&data).to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data,
        });
    }

    tag.write_to_path(path, Version::Id3v24)?;
    Ok(())
}

/// FLAC(Vorbis comment) / M4A(MP4 atom): lofty의 범용 태그로 기록한다.
/// 태그를 통째로 새로 만들어 저장하므로 기존에 박힌 그림도 함께 대체된다.
fn tag_lofty(
    path: &Path,
    tag_type: TagType,
    release: &ReleaseMeta,
    track: &TrackMeta,
    lyrics: Option<&Lyrics>,
    cover: Option<&Path>,
) -> Result<()> {
    let mut tag = Tag::new(tag_type);

    tag.insert_text(ItemKey::TrackTitle, track.title.clone());
    tag.insert_text(ItemKey::AlbumTitle, release.album.clone());
    tag.insert_text(ItemKey::TrackArtist, track.artist.clone());
    tag.insert_text(ItemKey::AlbumArtist, release.album_artist.clone());
    if !release.genre.is_empty() {
        tag.insert_text(ItemKey::Genre, release.genre.clone());
    }
    if !release.label.is_empty() {
        tag.insert_text(ItemKey::Label, release.label.clone());
    }
    if !release.release_date.is_empty() {
        tag.insert_text(ItemKey::RecordingDate, release.release_date.clone());
    }
    tag.insert_text(ItemKey::TrackNumber, track.track_number.to_string());
    tag.insert_text(ItemKey::TrackTotal, track.track_total.to_string());
    tag.insert_text(ItemKey::DiscNumber, track.disc_number.to_string());
    tag.insert_text(ItemKey::DiscTotal, release.disc_total.to_string());
    tag.insert_text(ItemKey::Comment, track.id.clone());

    if let Some(lyrics) = lyrics {
        tag.insert_text(ItemKey::Lyrics, lyrics.text().to_string());
    }

    if let Some(cover_path) = cover {
        let data = fs::read(cover_path)?;
        let mime = match mime_str(&data) {
            "image/png" => MimeType::Png,
            _ => MimeType::Jpeg,
        };
        let picture = Picture::new_unchecked(
            lofty::picture::PictureType::CoverFront,
            Some(mime),
            None,
            data,
        );
        tag.push_picture(picture);
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

/// 이미지 바이너리의 매직 바이트로 MIME 타입을 판별한다.
fn mime_str(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LyricsHint;

    fn sample_release() -> ReleaseMeta {
        ReleaseMeta {
            album: "IU 5th Album 'LILAC'".to_string(),
            album_artist: "아이유 (IU)".to_string(),
            genre: "댄스 팝; 발라드".to_string(),
            label: "EDAM엔터테인먼트".to_string(),
            release_date: "2021.03.25".to_string(),
            disc_total: 1,
            ..Default::default()
        }
    }

    fn sample_track() -> TrackMeta {
        TrackMeta {
            id: "33077590".to_string(),
            title: "라일락".to_string(),
            artist: "아이유 (IU)".to_string(),
            disc_number: 1,
            track_number: 1,
            track_total: 10,
            lyrics: LyricsHint::Timed,
            ..Default::default()
        }
    }

    #[test]
    fn test_id3_canonical_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("01. 라일락.mp3");
        std::fs::write(&path, b"").unwrap();

        tag(&path, ContainerKind::Mp3, &sample_release(), &sample_track(), None, None).unwrap();

        let written = id3::Tag::read_from_path(&path).unwrap();
        assert_eq!(written.title(), Some("라일락"));
        assert_eq!(written.album(), Some("IU 5th Album 'LILAC'"));
        assert_eq!(written.album_artist(), Some("아이유 (IU)"));
        assert_eq!(written.track(), Some(1));
        assert_eq!(written.total_tracks(), Some(10));
        assert_eq!(written.disc(), Some(1));
        assert_eq!(written.total_discs(), Some(1));
        assert_eq!(written.text_for_frame_id("TPUB"), Some("EDAM엔터테인먼트"));
        // 가사를 안 줬으면 USLT 프레임이 없어야 한다
        assert_eq!(written.lyrics().count(), 0);
    }

    #[test]
    fn test_id3_lyrics_written_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.mp3");
        std::fs::write(&path, b"").unwrap();

        let lyrics = Lyrics::Timed("[00:12.34]첫 소절".to_string());
        tag(
            &path,
            ContainerKind::Mp3,
            &sample_release(),
            &sample_track(),
            Some(&lyrics),
            None,
        )
        .unwrap();

        let written = id3::Tag::read_from_path(&path).unwrap();
        let uslt: Vec<_> = written.lyrics().collect();
        assert_eq!(uslt.len(), 1);
        assert_eq!(uslt[0].text, "[00:12.34]첫 소절");
    }

    #[test]
    fn test_id3_retag_does_not_accumulate_covers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.mp3");
        std::fs::write(&path, b"").unwrap();
        let cover = tmp.path().join("cover.jpg");
        std::fs::write(&cover, [0xFFu8, 0xD8, 0xFF, 0xE0, 0x01, 0x02]).unwrap();

        let release = sample_release();
        let track = sample_track();
        tag(&path, ContainerKind::Mp3, &release, &track, None, Some(&cover)).unwrap();
        tag(&path, ContainerKind::Mp3, &release, &track, None, Some(&cover)).unwrap();

        let written = id3::Tag::read_from_path(&path).unwrap();
        assert_eq!(written.pictures().count(), 1);
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_str(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), "image/png");
        assert_eq!(mime_str(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
    }
}
