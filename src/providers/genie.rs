use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::core::meta;
use crate::error::{Error, Result};
use crate::models::{
    AlbumRef, ContainerKind, CoverArt, Lyrics, LyricsHint, PostProcess, ReleaseMeta, Resolved,
    StreamDescriptor, TrackMeta,
};
use crate::providers::{malformed, value_i64, value_str, value_u32, Provider};

const DEV_ID: &str = "eb9d53a3c424f961";
const APP_VER: &str = "40807";
const USER_AGENT: &str =
    "genie/ANDROID/5.1.1/WIFI/SM-G930L/dreamqltecaneb9d53a3c424f961/500200714/40807";

/// Genie 모바일 API 클라이언트.
pub struct GenieClient {
    client: Client,
    usr_num: String,
    usr_token: String,
    stm_token: String,
}

impl GenieClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        let username = cfg
            .username
            .as_deref()
            .ok_or_else(|| Error::Auth("Genie 계정이 설정되지 않았습니다".to_string()))?;
        let password = cfg
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Genie 비밀번호가 설정되지 않았습니다".to_string()))?;

        let response: Value = client
            .post("https://app.genie.co.kr/member/j_Member_Login.json")
            .form(&[("uxd", username), ("uxx", password)])
            .send()?
            .error_for_status()?
            .json()?;
        if response["Result"]["RetCode"].as_str() != Some("0") {
            return Err(Error::Auth("Genie 자격증명이 올바르지 않습니다".to_string()));
        }
        let data = &response["DATA0"];
        let usr_num = value_str(&data["MemUno"])
            .ok_or_else(|| malformed("로그인 응답에 MemUno 없음"))?;
        let usr_token = value_str(&data["MemToken"])
            .ok_or_else(|| malformed("로그인 응답에 MemToken 없음"))?;
        let stm_token = value_str(&data["STM_TOKEN"])
            .ok_or_else(|| malformed("로그인 응답에 STM_TOKEN 없음"))?;
        info!("Genie 로그인 성공");

        Ok(GenieClient {
            client,
            usr_num,
            usr_token,
            stm_token,
        })
    }

    /// 모든 엔드포인트가 요구하는 공통 파라미터.
    fn base_data(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dcd", DEV_ID.to_string()),
            ("mts", "Y".to_string()),
            ("stk", self.stm_token.clone()),
            ("svc", "IV".to_string()),
            ("tct", "Android".to_string()),
            ("unm", self.usr_num.clone()),
            ("uxtk", self.usr_token.clone()),
        ]
    }

    fn call(&self, subdomain: &str, endpoint: &str, extra: &[(&str, &str)]) -> Result<Value> {
        let mut form = self.base_data();
        for (k, v) in extra {
            form.push((k, v.to_string()));
        }
        let response: Value = self
            .client
            .post(format!("https://{subdomain}.genie.co.kr/{endpoint}"))
            .form(&form)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response)
    }

    fn normalize_release(response: &Value) -> Result<ReleaseMeta> {
        let album = response["DATA0"]["DATA"]
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| malformed("앨범 정보(DATA0) 없음"))?;
        let raw_tracks = response["DATA1"]["DATA"]
            .as_array()
            .ok_or_else(|| malformed("트랙 목록(DATA1) 없음"))?;

        let mut tracks = Vec::with_capacity(raw_tracks.len());
        for raw in raw_tracks {
            tracks.push(TrackMeta {
                id: value_str(&raw["SONG_ID"]).ok_or_else(|| malformed("SONG_ID 없음"))?,
                title: meta::percent_decode(
                    &value_str(&raw["SONG_NAME"]).ok_or_else(|| malformed("SONG_NAME 없음"))?,
                ),
                artist: meta::percent_decode(&value_str(&raw["ARTIST_NAME"]).unwrap_or_default()),
                disc_number: value_u32(&raw["ALBUM_CD_NO"]).unwrap_or(1),
                track_number: value_u32(&raw["ALBUM_TRACK_NO"]).unwrap_or(0),
                track_total: 0,
                lyrics: LyricsHint::Timed,
                declared: ContainerKind::Flac,
                quality: None,
            });
        }

        let disc_total = meta::disc_total(&tracks);
        meta::insert_total_tracks(&mut tracks);

        let release_date = value_str(&album["ALBUM_RELEASE_DT"])
            .map(|d| meta::format_date(&d))
            .transpose()?
            .unwrap_or_default();

        Ok(ReleaseMeta {
            album: meta::percent_decode(
                &value_str(&album["ALBUM_NAME"]).ok_or_else(|| malformed("ALBUM_NAME 없음"))?,
            ),
            album_artist: meta::percent_decode(
                &value_str(&album["ARTIST_NAME"]).ok_or_else(|| malformed("ARTIST_NAME 없음"))?,
            ),
            artist_id: value_i64(&album["ARTIST_ID"]),
            // 장르 필드가 없으면 비워 둔다. 앨범명으로 채우지 않는다.
            genre: meta::percent_decode(&value_str(&album["ALBUM_GENRE"]).unwrap_or_default()),
            label: meta::percent_decode(&value_str(&album["ALBUM_PLANNER"]).unwrap_or_default()),
            release_date,
            cover: CoverArt {
                full_url: value_str(&album["ALBUM_IMG_PATH_600"]).unwrap_or_default(),
                embed_url: None,
            },
            disc_total,
            tracks,
        })
    }
}

/// JSONP 싱크 가사 응답을 LRC 텍스트로 변환한다.
/// 본문은 `GenieCallBack({"1000": "가사", ...});` 형태로 키가 밀리초다.
fn parse_timed_lyrics(body: &str) -> Result<Option<Lyrics>> {
    if body.contains("NOT FOUND LYRICS") {
        return Ok(None);
    }
    let inner = body
        .trim()
        .strip_prefix("GenieCallBack(")
        .and_then(|s| s.strip_suffix(");"))
        .ok_or_else(|| malformed("가사 콜백 형식이 아님"))?;
    let map: Value = serde_json::from_str(inner)?;
    let object = map
        .as_object()
        .ok_or_else(|| malformed("가사 본문이 객체가 아님"))?;

    // 객체 키 순서는 사전순이므로 밀리초 값으로 다시 정렬한다
    let mut lines: Vec<(u64, &str)> = object
        .iter()
        .filter_map(|(ms, text)| Some((ms.parse().ok()?, text.as_str()?)))
        .collect();
    lines.sort_by_key(|(ms, _)| *ms);

    let lrc = lines
        .iter()
        .map(|(ms, text)| format!("{}{}", meta::lrc_timestamp(*ms), text))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Some(Lyrics::Timed(lrc)))
}

impl Provider for GenieClient {
    fn name(&self) -> &'static str {
        "Genie"
    }

    fn http(&self) -> &Client {
        &self.client
    }

    fn fetch_release(&self, album_id: &str) -> Result<ReleaseMeta> {
        let response = self.call("app", "song/j_AlbumSongList.json", &[("axnm", album_id)])?;
        Self::normalize_release(&response)
    }

    fn fetch_artist_albums(&self, artist_id: &str) -> Result<Vec<AlbumRef>> {
        let artist: i64 = artist_id
            .parse()
            .map_err(|_| Error::InvalidUrl(artist_id.to_string()))?;
        let response = self.call(
            "app",
            "song/j_ArtistAlbumList.json",
            &[("xxnm", artist_id), ("pgsize", "500")],
        )?;
        let albums = response["DataSet"]["DATA"]
            .as_array()
            .ok_or_else(|| malformed("디스코그래피 목록 없음"))?;
        Ok(albums
            .iter()
            .filter_map(|album| {
                Some(AlbumRef {
                    id: value_str(&album["ALBUM_ID"])?,
                    title: meta::percent_decode(&value_str(&album["ALBUM_NAME"]).unwrap_or_default()),
                    contribution: value_i64(&album["ARTIST_ID"])
                        .map(|album_artist| meta::contribution_check(artist, album_artist))
                        .unwrap_or(false),
                })
            })
            .collect())
    }

    fn fetch_stream(&self, track: &TrackMeta) -> Result<Resolved> {
        debug!("스트림 해석: {}", track.id);
        let response = self.call(
            "stm",
            "player/j_StmInfo.json",
            &[
                ("xgnm", track.id.as_str()),
                ("bitrate", "24bit"),
                ("itn", "Y"),
                ("apvn", APP_VER),
            ],
        )?;
        match response["Result"]["RetCode"].as_str() {
            Some("0") => {}
            // 기기 등록 한도 초과. 릴리스 전체를 중단해야 한다.
            Some("A00003") => {
                return Err(Error::Auth(
                    "등록된 기기가 아닙니다. 기기 관리에서 해제 후 다시 시도하세요".to_string(),
                ))
            }
            Some("S00001") => return Ok(Resolved::Unavailable),
            _ => return Err(malformed("스트림 정보 조회 실패")),
        }
        let info = response["DataSet"]["DATA"]
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| malformed("스트림 정보(DataSet) 없음"))?;
        let declared = match info["FILE_EXT"].as_str() {
            Some("MP3") => ContainerKind::Mp3,
            _ => ContainerKind::Flac,
        };
        let url = meta::percent_decode(
            &value_str(&info["STREAMING_MP3_URL"])
                .ok_or_else(|| malformed("스트림 URL 없음"))?,
        );
        Ok(Resolved::Available(StreamDescriptor {
            url,
            declared,
            length: value_str(&info["FILE_SIZE"]).and_then(|s| s.parse().ok()),
            post_process: PostProcess::None,
        }))
    }

    fn fetch_lyrics(&self, track: &TrackMeta, prefer_timed: bool) -> Result<Option<Lyrics>> {
        let body = self
            .client
            .get(format!(
                "https://dn.genie.co.kr/app/purchase/get_msl.asp?songid={}&callback=GenieCallBack",
                track.id
            ))
            .send()?
            .error_for_status()?
            .text()?;
        let timed = parse_timed_lyrics(&body)?;
        if prefer_timed {
            return Ok(timed);
        }
        // 싱크를 원하지 않으면 타임스탬프만 벗겨 평문으로 만든다
        Ok(timed.map(|l| {
            Lyrics::Plain(
                l.text()
                    .lines()
                    .map(|line| line.splitn(2, ']').nth(1).unwrap_or(line))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timed_lyrics_sorts_numerically() {
        // 사전순으로는 10000이 2000보다 앞서므로 숫자 정렬을 검증한다
        let body = r#"GenieCallBack({"10000": "두 번째 줄", "2000": "첫 줄"});"#;
        let lyrics = parse_timed_lyrics(body).unwrap().unwrap();
        assert_eq!(lyrics.text(), "[00:02.00]첫 줄\n[00:10.00]두 번째 줄");
    }

    #[test]
    fn test_parse_timed_lyrics_not_found() {
        assert!(parse_timed_lyrics("NOT FOUND LYRICS").unwrap().is_none());
    }

    #[test]
    fn test_parse_timed_lyrics_rejects_garbage() {
        assert!(parse_timed_lyrics("<html>err</html>").is_err());
    }

    #[test]
    fn test_normalize_release_decodes_percent_fields() {
        let response = serde_json::json!({
            "DATA0": {"DATA": [{
                "ALBUM_NAME": "%EC%82%AC%EB%9E%91",
                "ARTIST_NAME": "%EC%95%84%EC%9D%B4%EC%9C%A0",
                "ARTIST_ID": "80219706",
                "ALBUM_PLANNER": "EDAM",
                "ALBUM_RELEASE_DT": "20210325",
                "ALBUM_IMG_PATH_600": "https://image.genie.co.kr/Y/IMAGE/600.jpg"
            }]},
            "DATA1": {"DATA": [
                {"SONG_ID": "93", "SONG_NAME": "%EB%9D%BC%EC%9D%BC%EB%9D%BD",
                 "ARTIST_NAME": "IU", "ALBUM_CD_NO": "1", "ALBUM_TRACK_NO": "1"}
            ]}
        });
        let release = GenieClient::normalize_release(&response).unwrap();
        assert_eq!(release.album, "사랑");
        assert_eq!(release.album_artist, "아이유");
        assert_eq!(release.release_date, "2021.03.25");
        assert_eq!(release.tracks[0].title, "라일락");
        assert_eq!(release.tracks[0].track_total, 1);
        // 장르 필드가 없으면 비어 있어야 한다
        assert!(release.genre.is_empty());
    }
}
