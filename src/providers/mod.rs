pub mod bugs;
pub mod genie;
pub mod kkbox;

use reqwest::blocking::Client;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{AlbumRef, Lyrics, ReleaseMeta, Resolved, TrackMeta};

/// 음원 서비스 클라이언트 트레이트.
/// Bugs, Genie, KKBOX 등 서비스를 이 트레이트로 추상화한다.
/// 구현체는 생성 시점에 인증을 마친 세션을 보유한다.
pub trait Provider: Sync {
    fn name(&self) -> &'static str;

    /// 인증된 세션 클라이언트. 스트림과 커버 다운로드에 그대로 쓴다.
    fn http(&self) -> &Client;

    /// 앨범 메타데이터를 가져와 정규화한다. 트랙 순서는 서비스가 준 그대로다.
    fn fetch_release(&self, album_id: &str) -> Result<ReleaseMeta>;

    /// 아티스트 디스코그래피. 참여 여부 판정까지 끝낸 상태로 반환한다.
    fn fetch_artist_albums(&self, artist_id: &str) -> Result<Vec<AlbumRef>>;

    /// 단일 트랙이 속한 앨범 ID를 조회한다.
    fn resolve_track_album(&self, _track_id: &str) -> Result<String> {
        Err(Error::UnsupportedTarget(format!(
            "{}는 단일 트랙 다운로드를 지원하지 않습니다",
            self.name()
        )))
    }

    /// 트랙의 스트림 위치를 해석한다. 시도마다 새로 해석하며 캐시하지 않는다.
    fn fetch_stream(&self, track: &TrackMeta) -> Result<Resolved>;

    /// 트랙 가사. 없으면 None. 싱크 가사는 LRC 텍스트로 정규화해 돌려준다.
    fn fetch_lyrics(&self, track: &TrackMeta, prefer_timed: bool) -> Result<Option<Lyrics>>;
}

/// 숫자로도 문자열로도 올 수 있는 JSON 필드를 문자열로 읽는다.
pub(crate) fn value_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn malformed(what: impl Into<String>) -> Error {
    Error::MalformedResponse(what.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_helpers() {
        assert_eq!(value_str(&json!(123)), Some("123".to_string()));
        assert_eq!(value_str(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_str(&json!(null)), None);
        assert_eq!(value_u32(&json!("07")), Some(7));
        assert_eq!(value_u32(&json!(7)), Some(7));
        assert_eq!(value_i64(&json!("80219706")), Some(80219706));
    }
}
