use std::path::PathBuf;

use thiserror::Error;

/// 다운로드 파이프라인 전체에서 쓰는 에러 타입.
/// 트랙 단위로 격리되는 에러와 릴리스/실행 전체를 중단시키는 에러를 구분한다.
#[derive(Debug, Error)]
pub enum Error {
    /// 인증 실패. 실행 전체를 중단한다.
    #[error("인증에 실패했습니다: {0}")]
    Auth(String),

    /// 서비스 응답에 필요한 필드가 없거나 형식이 다름. 해당 릴리스를 중단한다.
    #[error("응답 형식이 올바르지 않습니다: {0}")]
    MalformedResponse(String),

    #[error("지원하지 않는 날짜 형식입니다: {0}")]
    DateFormat(String),

    /// OS 경로 길이 제한 초과. 호출자가 대체 이름으로 한 번 재시도한다.
    #[error("경로가 너무 깁니다: {}", .0.display())]
    PathTooLong(PathBuf),

    #[error("지원하지 않는 URL입니다: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    UnsupportedTarget(String),

    #[error("스레드 풀 생성에 실패했습니다: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Id3(#[from] id3::Error),

    #[error(transparent)]
    Lofty(#[from] lofty::error::LoftyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
