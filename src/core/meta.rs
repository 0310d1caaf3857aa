use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::TrackMeta;

/// 발매일을 YYYY.MM.DD로 정규화한다.
/// 서비스에 따라 "20230115", "202301", "2023", "2012-08-10" 형태가 섞여 들어오며,
/// 월/일이 빠진 경우 01로 채운다. 숫자로 해석할 수 없으면 DateFormat 에러.
pub fn format_date(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let full = match digits.len() {
        8 => digits,
        6 => format!("{digits}01"),
        4 => format!("{digits}0101"),
        _ => return Err(Error::DateFormat(raw.to_string())),
    };
    let date = NaiveDate::parse_from_str(&full, "%Y%m%d")
        .map_err(|_| Error::DateFormat(raw.to_string()))?;
    Ok(date.format("%Y.%m.%d").to_string())
}

/// 디스크 번호별로 트랙을 묶어 track_total을 다시 계산한다.
/// 서비스가 주는 총 트랙 수는 부정확한 경우가 있어 사용하지 않는다.
pub fn insert_total_tracks(tracks: &mut [TrackMeta]) {
    let mut totals: HashMap<u32, u32> = HashMap::new();
    for track in tracks.iter() {
        *totals.entry(track.disc_number).or_insert(0) += 1;
    }
    for track in tracks.iter_mut() {
        track.track_total = totals[&track.disc_number];
    }
}

/// 디스크 총수. 서비스는 트랙을 디스크/트랙 번호순으로 정렬해 주므로
/// 재정렬 없이 마지막 트랙의 디스크 번호를 읽는다.
pub fn disc_total(tracks: &[TrackMeta]) -> u32 {
    tracks.last().map(|t| t.disc_number).unwrap_or(1)
}

/// 일괄 다운로드를 시작한 아티스트와 앨범의 대표 아티스트가 다르면 참여 앨범이다.
pub fn contribution_check(batch_artist_id: i64, album_artist_id: i64) -> bool {
    batch_artist_id != album_artist_id
}

/// 퍼센트 인코딩된 필드를 디코딩한다. Genie는 제목/아티스트를 인코딩해서 준다.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|v| v as u8)
}

/// 밀리초를 LRC 타임스탬프 [MM:SS.cc]로 변환한다.
pub fn lrc_timestamp(ms: u64) -> String {
    let min = ms / 60_000;
    let sec = (ms / 1000) % 60;
    let centis = (ms % 1000) / 10;
    format!("[{min:02}:{sec:02}.{centis:02}]")
}
