use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::core::meta;
use crate::error::{Error, Result};
use crate::models::{
    AlbumRef, ContainerKind, CoverArt, Lyrics, LyricsHint, PostProcess, ReleaseMeta, Resolved,
    StreamDescriptor, TrackMeta,
};
use crate::providers::{malformed, value_i64, value_str, value_u32, Provider};

/// Bugs 모바일 앱의 고정 API 키와 기기 ID.
const API_KEY: &str = "b2de0fbe3380408bace96a5d1a76f800";
const DEVICE_ID: &str = "gwAHWlkOYX_T8Sl43N78GiaD6Sg_";
const USER_AGENT: &str = "Mobile|Bugs|4.11.30|Android|5.1.1|SM-G965N|samsung|market";

/// Bugs.co.kr 모바일 API 클라이언트.
pub struct BugsClient {
    client: Client,
    conn_info: String,
    cover_size: u32,
}

impl BugsClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        let username = cfg
            .username
            .as_deref()
            .ok_or_else(|| Error::Auth("Bugs 계정이 설정되지 않았습니다".to_string()))?;
        let password = cfg
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Bugs 비밀번호가 설정되지 않았습니다".to_string()))?;
        let conn_info = Self::authenticate(&client, username, password)?;
        Ok(BugsClient {
            client,
            conn_info,
            cover_size: cfg.cover_size.unwrap_or(500),
        })
    }

    fn authenticate(client: &Client, username: &str, password: &str) -> Result<String> {
        let response: Value = client
            .post(format!(
                "https://secure.bugs.co.kr/mbugs/3/login?api_key={API_KEY}"
            ))
            .form(&[
                ("device_id", DEVICE_ID),
                ("passwd", password),
                ("userid", username),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        if response["ret_code"].as_i64() == Some(300) {
            return Err(Error::Auth("Bugs 자격증명이 올바르지 않습니다".to_string()));
        }
        let conn_info = response["result"]["coninfo"]
            .as_str()
            .ok_or_else(|| malformed("Bugs 로그인 응답에 coninfo 없음"))?;
        info!("Bugs 로그인 성공");
        Ok(conn_info.to_string())
    }

    /// invokeMap 일괄 호출. 응답의 list에서 호출 id별 result를 꺼내 쓴다.
    fn invoke(&self, calls: Value) -> Result<Value> {
        let response: Value = self
            .client
            .post(format!(
                "https://api.bugs.co.kr/3/home/invokeMap?api_key={API_KEY}"
            ))
            .json(&calls)
            .send()?
            .error_for_status()?
            .json()?;
        if response["ret_code"].as_i64() != Some(0) {
            return Err(malformed("invokeMap 호출 실패"));
        }
        Ok(response)
    }

    fn invoke_result<'v>(response: &'v Value, key: &str) -> Result<&'v Value> {
        response["list"]
            .as_array()
            .and_then(|list| list.iter().find(|entry| !entry[key].is_null()))
            .map(|entry| &entry[key]["result"])
            .ok_or_else(|| malformed(format!("invokeMap 응답에 {key} 없음")))
    }

    fn normalize_release(&self, result: &Value) -> Result<ReleaseMeta> {
        let raw_tracks = result["tracks"]
            .as_array()
            .ok_or_else(|| malformed("앨범 응답에 tracks 없음"))?;

        let mut tracks = Vec::with_capacity(raw_tracks.len());
        for raw in raw_tracks {
            tracks.push(TrackMeta {
                id: value_str(&raw["track_id"]).ok_or_else(|| malformed("track_id 없음"))?,
                title: value_str(&raw["track_title"]).ok_or_else(|| malformed("track_title 없음"))?,
                artist: value_str(&raw["artist_disp_nm"]).unwrap_or_default(),
                disc_number: value_u32(&raw["disc_id"]).unwrap_or(1),
                track_number: value_u32(&raw["track_no"]).unwrap_or(0),
                track_total: 0,
                lyrics: match raw["lyrics_tp"].as_str() {
                    Some("T") => LyricsHint::Timed,
                    Some("N") => LyricsHint::Plain,
                    _ => LyricsHint::None,
                },
                // FLAC 제공 여부로 선언 포맷 결정. 실제 확장자는 응답에서 재판별된다.
                declared: if raw["svc_flac_yn"].as_str() == Some("Y") {
                    ContainerKind::Flac
                } else {
                    ContainerKind::Mp3
                },
                quality: None,
            });
        }

        let disc_total = meta::disc_total(&tracks);
        meta::insert_total_tracks(&mut tracks);

        let release_date = raw_tracks
            .first()
            .and_then(|t| value_str(&t["release_ymd"]))
            .map(|d| meta::format_date(&d))
            .transpose()?
            .unwrap_or_default();

        let label = result["labels"]
            .as_array()
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|l| value_str(&l["label_nm"]))
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default();

        // 예전 앨범은 커버 해상도 키가 다를 수 있어 설정값 → 아무거나 순서로 고른다
        let img_urls = &result["img_urls"];
        let full_url = img_urls[self.cover_size.to_string()]
            .as_str()
            .or_else(|| {
                img_urls
                    .as_object()
                    .and_then(|m| m.values().next())
                    .and_then(Value::as_str)
            })
            .unwrap_or_default()
            .to_string();

        Ok(ReleaseMeta {
            album: value_str(&result["title"]).ok_or_else(|| malformed("앨범 제목 없음"))?,
            album_artist: value_str(&result["artist_disp_nm"])
                .ok_or_else(|| malformed("앨범 아티스트 없음"))?,
            artist_id: value_i64(&result["artist_id"]),
            genre: result["genre_str"]
                .as_str()
                .unwrap_or_default()
                .replace(',', ";"),
            label,
            release_date,
            cover: CoverArt {
                full_url,
                embed_url: None,
            },
            disc_total,
            tracks,
        })
    }

    fn lyrics_request(&self, kind: char, track_id: &str) -> Result<Option<String>> {
        let response: Value = self
            .client
            .get(format!(
                "https://music.bugs.co.kr/player/lyrics/{kind}/{track_id}"
            ))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response["lyrics"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}

/// Bugs 싱크 가사를 LRC 텍스트로 변환한다.
/// 원문은 `＃`로 줄을 나누고 각 줄은 `초|가사` 형태다.
fn format_timed_lyrics(raw: &str) -> String {
    raw.replace('＃', "\n")
        .lines()
        .filter_map(|line| {
            let (time, text) = line.split_once('|')?;
            let seconds: f64 = time.trim().parse().ok()?;
            let ms = (seconds * 1000.0).round() as u64;
            Some(format!("{}{}", meta::lrc_timestamp(ms), text))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Provider for BugsClient {
    fn name(&self) -> &'static str {
        "Bugs"
    }

    fn http(&self) -> &Client {
        &self.client
    }

    fn fetch_release(&self, album_id: &str) -> Result<ReleaseMeta> {
        let id: i64 = album_id
            .parse()
            .map_err(|_| Error::InvalidUrl(album_id.to_string()))?;
        let response = self.invoke(json!([
            {"id": "album_info", "args": {"albumId": id}},
            {"id": "artist_role_info", "args": {"contentsId": id, "type": "ALBUM"}}
        ]))?;
        let result = Self::invoke_result(&response, "album_info")?;
        self.normalize_release(result)
    }

    fn fetch_artist_albums(&self, artist_id: &str) -> Result<Vec<AlbumRef>> {
        let id: i64 = artist_id
            .parse()
            .map_err(|_| Error::InvalidUrl(artist_id.to_string()))?;
        let response = self.invoke(json!([
            {"id": "artist_info", "args": {"artistId": id}},
            {"id": "artist_album", "args": {"artistId": id, "albumType": "main", "tracksYn": "Y", "page": 1, "size": 500}}
        ]))?;
        let list = Self::invoke_result(&response, "artist_album")?;
        let albums = list["list"]
            .as_array()
            .ok_or_else(|| malformed("디스코그래피 목록 없음"))?;
        Ok(albums
            .iter()
            .filter_map(|album| {
                Some(AlbumRef {
                    id: value_str(&album["album_id"])?,
                    title: value_str(&album["title"]).unwrap_or_default(),
                    contribution: value_i64(&album["artist_id"])
                        .map(|album_artist| meta::contribution_check(id, album_artist))
                        .unwrap_or(false),
                })
            })
            .collect())
    }

    fn resolve_track_album(&self, track_id: &str) -> Result<String> {
        let id: i64 = track_id
            .parse()
            .map_err(|_| Error::InvalidUrl(track_id.to_string()))?;
        let response = self.invoke(json!([
            {"id": "track_detail", "args": {"trackId": id}}
        ]))?;
        let result = Self::invoke_result(&response, "track_detail")?;
        value_str(&result["album_id"])
            .or_else(|| value_str(&result["album"]["album_id"]))
            .ok_or_else(|| malformed("트랙 상세에 album_id 없음"))
    }

    fn fetch_stream(&self, track: &TrackMeta) -> Result<Resolved> {
        debug!("스트림 해석: {}", track.id);
        let url = Url::parse_with_params(
            &format!(
                "https://api.bugs.co.kr/3/tracks/{}/listen/android/flac",
                track.id
            ),
            &[
                ("ConnectionInfo", self.conn_info.as_str()),
                ("api_key", API_KEY),
                ("overwrite_session", "Y"),
                ("track_id", track.id.as_str()),
            ],
        )
        .map_err(|_| Error::InvalidUrl(track.id.clone()))?;
        // 404는 다운로드 단계에서 Unavailable로 처리된다
        Ok(Resolved::Available(StreamDescriptor {
            url: url.into(),
            declared: track.declared,
            length: None,
            post_process: PostProcess::None,
        }))
    }

    fn fetch_lyrics(&self, track: &TrackMeta, prefer_timed: bool) -> Result<Option<Lyrics>> {
        match track.lyrics {
            LyricsHint::None => Ok(None),
            LyricsHint::Timed if prefer_timed => Ok(self
                .lyrics_request('T', &track.id)?
                .map(|raw| Lyrics::Timed(format_timed_lyrics(&raw)))),
            _ => Ok(self.lyrics_request('N', &track.id)?.map(Lyrics::Plain)),
        }
    }
}
