/// 릴리스(앨범/아티스트/트랙) 다운로드 대상 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Artist,
    Album,
    Track,
}

/// 오디오 컨테이너 종류. 태깅 전략과 파일 확장자를 결정한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerKind {
    Flac,
    #[default]
    Mp3,
    Mp4,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 3] = [ContainerKind::Flac, ContainerKind::Mp3, ContainerKind::Mp4];

    pub fn ext(self) -> &'static str {
        match self {
            ContainerKind::Flac => "flac",
            ContainerKind::Mp3 => "mp3",
            ContainerKind::Mp4 => "m4a",
        }
    }

    /// 확장자 문자열로 컨테이너를 판별한다. aac는 m4a 컨테이너로 교정한다.
    pub fn from_ext(ext: &str) -> Option<ContainerKind> {
        match ext.to_ascii_lowercase().as_str() {
            "flac" => Some(ContainerKind::Flac),
            "mp3" => Some(ContainerKind::Mp3),
            "m4a" | "aac" | "mp4" => Some(ContainerKind::Mp4),
            _ => None,
        }
    }
}

/// 트랙에 가사가 존재하는지, 어떤 형태로 존재하는지에 대한 서비스 응답 힌트.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LyricsHint {
    #[default]
    None,
    Plain,
    Timed,
}

/// 태깅에 쓸 가사. 싱크 가사는 LRC 형식 텍스트로 정규화되어 있다.
#[derive(Debug, Clone)]
pub enum Lyrics {
    Timed(String),
    Plain(String),
}

impl Lyrics {
    pub fn text(&self) -> &str {
        match self {
            Lyrics::Timed(s) | Lyrics::Plain(s) => s,
        }
    }
}

/// 정규화된 트랙 메타데이터. 릴리스 하나에 속한다.
#[derive(Debug, Clone, Default)]
pub struct TrackMeta {
    /// 서비스 내부 트랙 ID
    pub id: String,
    pub title: String,
    /// 트랙 아티스트. 참여 아티스트인 경우 앨범 아티스트와 다를 수 있다.
    pub artist: String,
    pub disc_number: u32,
    pub track_number: u32,
    /// 같은 디스크에 속한 트랙 수. 서비스 값이 아니라 재계산한 값이다.
    pub track_total: u32,
    pub lyrics: LyricsHint,
    /// 요청 시점에 서비스가 선언한 포맷. 실제 확장자는 응답 URL에서 다시 판별한다.
    pub declared: ContainerKind,
    /// 음질 협상용 서비스 원본 값 (KKBOX audio_quality 등)
    pub quality: Option<String>,
}

/// 커버 아트 URL. full은 앨범 디렉토리에 영구 저장,
/// embed는 임베드 전용 저해상도 사본으로 릴리스 완료 후 삭제된다.
#[derive(Debug, Clone, Default)]
pub struct CoverArt {
    pub full_url: String,
    pub embed_url: Option<String>,
}

/// 정규화된 릴리스(앨범) 메타데이터. 구성 이후에는 변경하지 않는다.
#[derive(Debug, Clone, Default)]
pub struct ReleaseMeta {
    pub album: String,
    pub album_artist: String,
    /// 기여(참여) 판정에 쓰는 서비스 내부 아티스트 ID
    pub artist_id: Option<i64>,
    /// 복수 장르는 "; "로 연결
    pub genre: String,
    /// 복수 레이블은 "; "로 연결
    pub label: String,
    /// YYYY.MM.DD
    pub release_date: String,
    pub cover: CoverArt,
    /// 서비스 순서 기준 마지막 트랙의 디스크 번호
    pub disc_total: u32,
    /// 서비스가 준 순서 그대로 보존한다. 재정렬하지 않는다.
    pub tracks: Vec<TrackMeta>,
}

/// 아티스트 디스코그래피의 앨범 항목.
#[derive(Debug, Clone)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
    /// 일괄 다운로드를 시작한 아티스트가 이 앨범의 대표 아티스트가 아니면 true
    pub contribution: bool,
}

/// 다운로드 후 적용할 스트림 후처리.
#[derive(Debug, Clone)]
pub enum PostProcess {
    None,
    /// DRM 래핑 스트림: 고정 길이 헤더를 건너뛰고
    /// 키스트림 일부를 버린 스트림 암호로 복호화한다.
    StripDrm {
        header_len: u64,
        keystream_discard: usize,
        key: Vec<u8>,
    },
}

/// 트랙 하나의 해석된 다운로드 위치와 선언된 포맷.
/// 스트림 URL은 만료될 수 있으므로 다운로드 시도마다 새로 해석한다.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub url: String,
    pub declared: ContainerKind,
    pub length: Option<u64>,
    pub post_process: PostProcess,
}

/// 스트림 해석 결과. 이용권 미보유 등은 에러가 아니라 명시적 상태다.
#[derive(Debug, Clone)]
pub enum Resolved {
    Available(StreamDescriptor),
    Unavailable,
}
