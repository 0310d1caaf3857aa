use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::core::meta;
use crate::core::rc4::Rc4;
use crate::error::{Error, Result};
use crate::models::{
    AlbumRef, ContainerKind, CoverArt, Lyrics, LyricsHint, PostProcess, ReleaseMeta, Resolved,
    StreamDescriptor, TrackMeta,
};
use crate::providers::{malformed, value_i64, value_str, value_u32, Provider};

/// kc1 응답 봉투를 푸는 고정 RC4 키.
const KC1_KEY: &[u8] = b"7f1a68f00b747f4ac1469c72e7ef492c";
const APP_VER: &str = "06090076";
const USER_AGENT: &str = "okhttp/3.14.9";

/// 음질 설정값과 티켓 응답의 스트림 이름 대응표.
const QUALITY_LEGEND: &[(&str, &str)] = &[
    ("128k", "mp3_128k_chromecast"),
    ("192k", "mp3_192k_kkdrm1"),
    ("320k", "aac_320k_m4a_kkdrm1"),
    ("hifi", "flac_16_download_kkdrm"),
    ("hires", "flac_24_download_kkdrm"),
];

/// 로그인/갱신으로 바뀌는 세션 상태. 워커 스레드가 공유한다.
struct Session {
    sid: String,
    /// kkdrm 스트림 복호화 키. 로그인 응답의 문자열을 그대로 키로 쓴다.
    lic_content_key: Vec<u8>,
}

/// KKBOX 모바일 API 클라이언트.
pub struct KkboxClient {
    client: Client,
    kkid: String,
    username: String,
    password_md5: String,
    session: Mutex<Session>,
    cover_size: u32,
    quality: Option<String>,
}

impl KkboxClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        let username = cfg
            .username
            .as_deref()
            .ok_or_else(|| Error::Auth("KKBOX 계정이 설정되지 않았습니다".to_string()))?;
        let password = cfg
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("KKBOX 비밀번호가 설정되지 않았습니다".to_string()))?;
        let password_md5 = hex::encode(Md5::digest(password.as_bytes()));
        // 기기 식별자는 실행마다 새로 만든다
        let kkid = hex::encode_upper(rand::random::<[u8; 16]>());

        let mut this = KkboxClient {
            client,
            kkid,
            username: username.to_string(),
            password_md5,
            session: Mutex::new(Session {
                sid: String::new(),
                lic_content_key: Vec::new(),
            }),
            cover_size: cfg.cover_size.unwrap_or(3000),
            quality: cfg.quality.clone(),
        };
        this.login()?;
        Ok(this)
    }

    /// kc1 봉투로 싸인 응답을 풀어 JSON으로 돌려준다.
    fn api_call(
        &self,
        host: &str,
        path: &str,
        params: &[(&str, &str)],
        payload: Option<&Value>,
    ) -> Result<Value> {
        let sid = self.session.lock().map_or_else(
            |poisoned| poisoned.into_inner().sid.clone(),
            |s| s.sid.clone(),
        );
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("enc", "u"),
            ("ver", APP_VER),
            ("os", "android"),
            ("osver", "11"),
            ("lang", "en"),
            ("ui_lang", "en"),
            ("dist", "0021"),
            ("dist2", "0021"),
            ("resolution", "411x683"),
            ("of", "j"),
            ("oenc", "kc1"),
            ("timestamp", &timestamp),
            ("sid", &sid),
        ];
        query.extend_from_slice(params);

        let url = format!("https://api-{host}.kkbox.com.tw/{path}");
        let request = match payload {
            Some(body) => self.client.post(&url).query(&query).body(body.to_string()),
            None => self.client.get(&url).query(&query),
        };
        let mut body = request.send()?.error_for_status()?.bytes()?.to_vec();
        Rc4::new(KC1_KEY).apply(&mut body);
        let parsed: Value = serde_json::from_slice(&body)
            .map_err(|_| malformed(format!("{path} 응답 복호화 실패")))?;
        Ok(parsed)
    }

    fn login(&mut self) -> Result<()> {
        let response = self.login_request("login.php")?;
        let status = response["status"].as_i64().unwrap_or(0);
        let response = match status {
            2 | 3 => response,
            // 지역 제한 계정은 우회 엔드포인트로 한 번 더 시도한다
            -4 => {
                warn!("지역 제한 응답, 우회 로그인 시도");
                let retry = self.login_request("login-utapass.php")?;
                match retry["status"].as_i64().unwrap_or(0) {
                    2 | 3 => retry,
                    _ => {
                        return Err(Error::Auth(
                            "KKBOX 지역 제한을 우회하지 못했습니다".to_string(),
                        ))
                    }
                }
            }
            _ => {
                return Err(Error::Auth(
                    "KKBOX 자격증명이 올바르지 않습니다".to_string(),
                ))
            }
        };
        let data = &response["data"];
        let sid = value_str(&data["sid"]).ok_or_else(|| malformed("로그인 응답에 sid 없음"))?;
        let key = data["lic_content_key"]
            .as_str()
            .ok_or_else(|| malformed("로그인 응답에 lic_content_key 없음"))?;
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.sid = sid;
        session.lic_content_key = key.as_bytes().to_vec();
        info!("KKBOX 로그인 성공");
        Ok(())
    }

    fn login_request(&self, endpoint: &str) -> Result<Value> {
        let payload = json!({
            "uid": self.username,
            "passwd": self.password_md5,
            "kkid": self.kkid,
            "registration_id": "",
        });
        self.api_call("login", endpoint, &[], Some(&payload))
    }

    /// sid 만료 시 세션을 다시 발급받는다.
    fn renew_session(&self) -> Result<()> {
        let response = self.api_call("login", "check.php", &[], None)?;
        let sid = value_str(&response["data"]["sid"])
            .ok_or_else(|| malformed("세션 갱신 응답에 sid 없음"))?;
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.sid = sid;
        debug!("세션 갱신됨");
        Ok(())
    }

    fn stream_name(&self, track: &TrackMeta) -> &'static str {
        let wanted = self
            .quality
            .as_deref()
            .or(track.quality.as_deref())
            .unwrap_or("128k");
        QUALITY_LEGEND
            .iter()
            .find(|(q, _)| *q == wanted)
            .map(|(_, name)| *name)
            .unwrap_or("mp3_128k_chromecast")
    }

    fn request_ticket(&self, track_id: &str) -> Result<Value> {
        let payload = json!({ "song_id": track_id, "ver": APP_VER });
        // 상태 코드에 따라 세션 갱신 또는 잠시 대기 후 재시도한다
        for attempt in 0..3 {
            let response = self.api_call("ds", "v1/ticket", &[], Some(&payload))?;
            match ticket_action(&response)? {
                TicketAction::Ready => return Ok(response),
                TicketAction::Renew => self.renew_session()?,
                TicketAction::Wait => {
                    debug!("티켓 대기 (시도 {})", attempt + 1);
                    thread::sleep(Duration::from_millis(500));
                }
            }
        }
        Err(malformed("스트림 티켓 발급 실패"))
    }

    fn normalize_release(&self, album: &Value, songs: &[Value]) -> Result<ReleaseMeta> {
        let mut tracks = Vec::with_capacity(songs.len());
        for raw in songs {
            // 곡 ID는 상세 URL의 마지막 경로 조각이다
            let id = raw["song_more_url"]
                .as_str()
                .and_then(|u| u.rsplit('/').next())
                .ok_or_else(|| malformed("song_more_url 없음"))?
                .to_string();
            let quality = raw["audio_quality"]
                .as_array()
                .and_then(|q| q.last())
                .and_then(Value::as_str)
                .map(str::to_string);
            tracks.push(TrackMeta {
                id,
                title: value_str(&raw["text"]).ok_or_else(|| malformed("곡 제목 없음"))?,
                artist: main_artist(&raw["artist_role"]),
                disc_number: 1,
                track_number: value_u32(&raw["trankno"]).unwrap_or(0),
                track_total: 0,
                lyrics: if raw["song_lyrics_valid"].as_i64() == Some(1) {
                    LyricsHint::Timed
                } else {
                    LyricsHint::None
                },
                declared: ContainerKind::Mp3,
                quality,
            });
        }
        meta::insert_total_tracks(&mut tracks);

        let release_date = value_str(&album["album_date"])
            .map(|d| meta::format_date(&d))
            .transpose()?
            .unwrap_or_default();
        let template = album["album_photo_info"]["url_template"]
            .as_str()
            .unwrap_or_default();

        Ok(ReleaseMeta {
            album: value_str(&album["album_name"]).ok_or_else(|| malformed("앨범 이름 없음"))?,
            album_artist: value_str(&album["artist_name"])
                .ok_or_else(|| malformed("앨범 아티스트 없음"))?,
            artist_id: value_i64(&album["artist_id"]),
            genre: songs
                .first()
                .and_then(|s| value_str(&s["genre_name"]))
                .unwrap_or_default(),
            label: String::new(),
            release_date,
            cover: CoverArt {
                full_url: image_url(template, self.cover_size),
                embed_url: Some(image_url(template, 600)),
            },
            disc_total: 1,
            tracks,
        })
    }
}

/// 티켓 응답의 다음 동작.
enum TicketAction {
    Ready,
    Renew,
    Wait,
}

/// 티켓 상태를 해석한다. 갱신/대기로 복구할 수 없는 상태는
/// 미제공(Unavailable)과 섞이지 않도록 에러로 올린다.
fn ticket_action(response: &Value) -> Result<TicketAction> {
    if response["status"]["type"].as_str() == Some("OK") {
        return Ok(TicketAction::Ready);
    }
    match response["status"]
        .as_i64()
        .or_else(|| response["status"]["code"].as_i64())
    {
        Some(-1) => Ok(TicketAction::Renew),
        Some(2) => Ok(TicketAction::Wait),
        code => Err(malformed(format!(
            "티켓 발급 거부 (상태 {})",
            code.map_or_else(|| "없음".to_string(), |c| c.to_string())
        ))),
    }
}

/// 커버 아트 URL 템플릿에 크기를 채운다.
/// 2048px를 넘는 요청은 리사이즈 없이 원본을 받는다.
fn image_url(template: &str, size: u32) -> String {
    if size > 2048 {
        template
            .replace("fit/{width}x{height}", "original")
            .replace("cropresize/{width}x{height}", "original")
            .replace("{format}", "jpg")
    } else {
        template
            .replace("{width}", &size.to_string())
            .replace("{height}", &size.to_string())
            .replace("{format}", "jpg")
    }
}

/// 메인 아티스트 표기. 문자열 하나 또는 배열로 온다.
fn main_artist(artist_role: &Value) -> String {
    match &artist_role["mainartist_list"]["mainartist"] {
        Value::String(s) => s.clone(),
        Value::Array(list) => list
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

impl Provider for KkboxClient {
    fn name(&self) -> &'static str {
        "KKBOX"
    }

    fn http(&self) -> &Client {
        &self.client
    }

    fn fetch_release(&self, album_id: &str) -> Result<ReleaseMeta> {
        let detail = self.api_call("ds", &format!("v1/album/{album_id}"), &[], None)?;
        let album = &detail["data"]["album"];
        let raw_id = value_str(&album["album_id"])
            .ok_or_else(|| malformed("앨범 상세에 album_id 없음"))?;
        let more = self.api_call("ds", "album_more.php", &[("album", &raw_id)], None)?;
        let songs = more["data"]["song_list"]["song"]
            .as_array()
            .ok_or_else(|| malformed("곡 목록 없음"))?;
        self.normalize_release(album, songs)
    }

    fn fetch_artist_albums(&self, artist_id: &str) -> Result<Vec<AlbumRef>> {
        let profile = self.api_call("ds", &format!("v3/artist/{artist_id}"), &[], None)?;
        let raw_id = value_i64(&profile["data"]["profile"]["artist_id"])
            .ok_or_else(|| malformed("아티스트 프로필에 artist_id 없음"))?;
        let response = self.api_call("ds", &format!("v2/artist/{raw_id}/album"), &[], None)?;
        let albums = response["data"]["album"]
            .as_array()
            .ok_or_else(|| malformed("디스코그래피 목록 없음"))?;
        Ok(albums
            .iter()
            .filter_map(|album| {
                Some(AlbumRef {
                    id: value_str(&album["encrypted_album_id"])?,
                    title: value_str(&album["album_name"]).unwrap_or_default(),
                    contribution: value_i64(&album["artist_id"])
                        .map(|album_artist| meta::contribution_check(raw_id, album_artist))
                        .unwrap_or(false),
                })
            })
            .collect())
    }

    fn fetch_stream(&self, track: &TrackMeta) -> Result<Resolved> {
        debug!("스트림 해석: {}", track.id);
        let ticket = self.request_ticket(&track.id)?;
        let uris = match ticket["data"]["uris"].as_array() {
            Some(uris) if !uris.is_empty() => uris,
            _ => return Ok(Resolved::Unavailable),
        };
        let wanted = self.stream_name(track);
        let entry = match uris
            .iter()
            .find(|u| u["name"].as_str() == Some(wanted))
        {
            Some(entry) => entry,
            None => {
                info!("요청한 음질({wanted}) 없음: {}", track.title);
                return Ok(Resolved::Unavailable);
            }
        };
        let url = entry["uri"]
            .as_str()
            .or_else(|| entry["url"].as_str())
            .ok_or_else(|| malformed("티켓에 스트림 주소 없음"))?
            .to_string();

        let declared = if wanted.starts_with("flac") {
            ContainerKind::Flac
        } else if wanted.starts_with("aac") {
            ContainerKind::Mp4
        } else {
            ContainerKind::Mp3
        };
        let post_process = if wanted.contains("kkdrm") {
            let session = self
                .session
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // 본문 앞 1024바이트는 라이선스 헤더, 키스트림은 512바이트 버린 뒤부터 맞는다
            PostProcess::StripDrm {
                header_len: 1024,
                keystream_discard: 512,
                key: session.lic_content_key.clone(),
            }
        } else {
            PostProcess::None
        };

        Ok(Resolved::Available(StreamDescriptor {
            url,
            declared,
            length: None,
            post_process,
        }))
    }

    fn fetch_lyrics(&self, track: &TrackMeta, prefer_timed: bool) -> Result<Option<Lyrics>> {
        if track.lyrics == LyricsHint::None {
            return Ok(None);
        }
        let response = self.api_call("ds", &format!("v1/song/{}/lyrics", track.id), &[], None)?;
        if response["status"]["type"].as_str() != Some("OK") {
            return Ok(None);
        }
        let lines = match response["data"]["lyrics"].as_array() {
            Some(lines) if !lines.is_empty() => lines,
            _ => return Ok(None),
        };
        if prefer_timed {
            let lrc = lines
                .iter()
                .filter_map(|l| {
                    let ms = l["start_time"].as_u64()?;
                    let content = l["content"].as_str().unwrap_or_default();
                    Some(format!("{}{}", meta::lrc_timestamp(ms), content))
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Some(Lyrics::Timed(lrc)))
        } else {
            let plain = lines
                .iter()
                .filter_map(|l| l["content"].as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Some(Lyrics::Plain(plain)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url_resize() {
        let template = "https://i.kfs.io/album/global/123/cropresize/{width}x{height}/crop.{format}";
        assert_eq!(
            image_url(template, 600),
            "https://i.kfs.io/album/global/123/cropresize/600x600/crop.jpg"
        );
    }

    #[test]
    fn test_image_url_original_above_limit() {
        let template = "https://i.kfs.io/album/global/123/cropresize/{width}x{height}/crop.{format}";
        assert_eq!(
            image_url(template, 3000),
            "https://i.kfs.io/album/global/123/original/crop.jpg"
        );
    }

    #[test]
    fn test_main_artist_string_or_array() {
        let single = serde_json::json!({"mainartist_list": {"mainartist": "아이유"}});
        assert_eq!(main_artist(&single), "아이유");
        let multi = serde_json::json!({"mainartist_list": {"mainartist": ["아이유", "SUGA"]}});
        assert_eq!(main_artist(&multi), "아이유; SUGA");
        assert_eq!(main_artist(&serde_json::json!({})), "");
    }

    #[test]
    fn test_ticket_action_statuses() {
        use serde_json::json;
        assert!(matches!(
            ticket_action(&json!({"status": {"type": "OK"}})),
            Ok(TicketAction::Ready)
        ));
        assert!(matches!(ticket_action(&json!({"status": -1})), Ok(TicketAction::Renew)));
        assert!(matches!(ticket_action(&json!({"status": 2})), Ok(TicketAction::Wait)));
        // 알 수 없는 상태는 미제공으로 뭉개지 말고 에러로 올려야 한다
        assert!(matches!(
            ticket_action(&json!({"status": -4})),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            ticket_action(&json!({})),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_stream_name_legend() {
        let mut cfg = ProviderConfig::default();
        cfg.quality = Some("hifi".to_string());
        let client = KkboxClient {
            client: Client::new(),
            kkid: String::new(),
            username: String::new(),
            password_md5: String::new(),
            session: Mutex::new(Session {
                sid: String::new(),
                lic_content_key: Vec::new(),
            }),
            cover_size: 3000,
            quality: cfg.quality.clone(),
        };
        let track = TrackMeta {
            quality: Some("320k".to_string()),
            ..Default::default()
        };
        // 설정값이 트랙의 최고 음질보다 우선한다
        assert_eq!(client.stream_name(&track), "flac_16_download_kkdrm");

        let client = KkboxClient { quality: None, ..client };
        assert_eq!(client.stream_name(&track), "aac_320k_m4a_kkdrm1");
        let bare = TrackMeta::default();
        assert_eq!(client.stream_name(&bare), "mp3_128k_chromecast");
    }
}
