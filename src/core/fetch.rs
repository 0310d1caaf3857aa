use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::core::path::is_name_too_long;
use crate::core::rc4::Rc4;
use crate::error::{Error, Result};
use crate::models::{ContainerKind, PostProcess, StreamDescriptor};

/// 스트리밍 쓰기 버퍼 크기.
const CHUNK_SIZE: usize = 32 * 1024;

/// 진행 중인 다운로드를 표시하는 예약 확장자.
pub const PARTIAL_EXT: &str = "partial";

/// 트랙 하나에 대한 다운로드 결과.
#[derive(Debug)]
pub enum FetchStatus {
    /// 새로 받아서 최종 이름으로 확정함
    Done(PathBuf, ContainerKind),
    /// 최종 파일이 이미 있어 네트워크 요청 없이 건너뜀
    AlreadyExists(PathBuf, ContainerKind),
    /// 서비스가 이 계정으로는 스트림을 제공하지 않음. 에러가 아니다.
    Unavailable,
}

/// 확장자 없는 base 경로에 확장자를 붙인다.
/// 트랙 이름에 `.`이 들어갈 수 있어 Path::with_extension은 쓰지 않는다.
pub fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// base에 대해 이미 확정된 파일이 있는지 확인한다. `.partial`은 제외.
pub fn existing_final(base: &Path) -> Option<(PathBuf, ContainerKind)> {
    for kind in ContainerKind::ALL {
        let candidate = with_ext(base, kind.ext());
        if candidate.exists() {
            return Some((candidate, kind));
        }
    }
    None
}

/// 최종 컨테이너를 판별한다. 요청 시점 메타데이터는 신뢰하지 않는다:
/// FLAC을 요청해도 이용권에 따라 MP3나 AAC URL로 리다이렉트될 수 있으므로
/// 해석된 응답 URL의 확장자를 먼저 보고, 없을 때만 선언된 포맷을 쓴다.
pub fn resolve_extension(resolved_url: &str, declared: ContainerKind) -> ContainerKind {
    let path = resolved_url
        .split(['?', '#'])
        .next()
        .unwrap_or(resolved_url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) => ContainerKind::from_ext(ext).unwrap_or(declared),
        None => declared,
    }
}

/// `.partial` 파일에 이미 기록된 바이트 수. 없으면 0.
pub fn resume_offset(partial: &Path) -> u64 {
    fs::metadata(partial).map(|m| m.len()).unwrap_or(0)
}

/// 트랙 오디오 바이트를 base 경로로 내려받는다.
///
/// 순서: 존재 확인 → 이어받기 오프셋 계산 → 범위 요청 → 스트리밍 쓰기 →
/// 최종 확장자로 개명. 중단된 다운로드의 `.partial` 파일은 그대로 남아
/// 다음 실행에서 `[현재 크기, 끝)` 범위 요청으로 이어받는다.
pub fn fetch(client: &Client, desc: &StreamDescriptor, base: &Path) -> Result<FetchStatus> {
    if let Some((path, kind)) = existing_final(base) {
        debug!("{} 이미 존재함", path.display());
        return Ok(FetchStatus::AlreadyExists(path, kind));
    }

    let partial = with_ext(base, PARTIAL_EXT);
    let on_disk = resume_offset(&partial);
    let header_len = match &desc.post_process {
        PostProcess::StripDrm { header_len, .. } => *header_len,
        PostProcess::None => 0,
    };

    // 이미 받은 바이트는 다시 요청하지 않는다. DRM 헤더는 범위 시작으로 건너뛴다.
    let start = header_len + on_disk;
    let mut request = client.get(&desc.url);
    if start > 0 {
        request = request.header(RANGE, format!("bytes={start}-"));
    }
    let response = request.send()?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(FetchStatus::Unavailable);
    }
    // 끝까지 받아 둔 .partial에 대한 범위 요청은 416으로 돌아온다.
    // 받을 것이 없다는 뜻이므로 바로 개명 단계로 간다.
    if on_disk > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
        debug!("{} 이미 전부 받음", partial.display());
        let kind = resolve_extension(response.url().as_str(), desc.declared);
        return finalize(&partial, base, kind);
    }
    let response = response.error_for_status()?;

    let kind = resolve_extension(response.url().as_str(), desc.declared);
    let final_path = with_ext(base, kind.ext());
    if final_path.exists() {
        debug!("{} 이미 존재함", final_path.display());
        return Ok(FetchStatus::AlreadyExists(final_path, kind));
    }

    // 범위 요청을 무시하고 전체 본문을 200으로 돌려주는 서버가 있다.
    // 그대로 이어 쓰면 파일이 깨지므로 처음부터 다시 쓰고,
    // 본문에 포함된 DRM 헤더는 기록 전에 버린다.
    let range_ignored = start > 0 && response.status() != StatusCode::PARTIAL_CONTENT;
    let (on_disk, mut body_skip) = if range_ignored {
        if on_disk > 0 {
            warn!("서버가 범위 요청을 무시함, 처음부터 다시 받습니다: {}", partial.display());
        }
        (0, header_len)
    } else {
        (on_disk, 0)
    };
    if on_disk > 0 {
        info!("{}바이트부터 이어받기: {}", on_disk, partial.display());
    }

    let mut cipher = match &desc.post_process {
        PostProcess::StripDrm {
            keystream_discard, key, ..
        } => {
            let mut c = Rc4::new(key);
            c.skip(keystream_discard + on_disk as usize);
            Some(c)
        }
        PostProcess::None => None,
    };

    let mut file = open_partial(&partial, range_ignored)?;
    let mut reader = response;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut offset = 0;
        if body_skip > 0 {
            offset = body_skip.min(n as u64) as usize;
            body_skip -= offset as u64;
        }
        if offset == n {
            continue;
        }
        let chunk = &mut buf[offset..n];
        if let Some(c) = cipher.as_mut() {
            c.apply(chunk);
        }
        file.write_all(chunk)?;
    }
    file.flush()?;
    drop(file);

    finalize(&partial, base, kind)
}

/// `.partial`을 최종 이름으로 확정한다.
/// 동시 중복 시도에 대한 마지막 존재 확인을 하고, 먼저 쓴 쪽을 유지한다.
fn finalize(partial: &Path, base: &Path, kind: ContainerKind) -> Result<FetchStatus> {
    let final_path = with_ext(base, kind.ext());
    if final_path.exists() {
        fs::remove_file(partial)?;
        return Ok(FetchStatus::AlreadyExists(final_path, kind));
    }
    fs::rename(partial, &final_path)?;
    Ok(FetchStatus::Done(final_path, kind))
}

fn open_partial(path: &Path, truncate: bool) -> Result<fs::File> {
    let mut opts = OpenOptions::new();
    opts.create(true);
    if truncate {
        opts.write(true).truncate(true);
    } else {
        opts.append(true);
    }
    opts.open(path).map_err(|e| {
        if is_name_too_long(&e) {
            Error::PathTooLong(path.to_path_buf())
        } else {
            e.into()
        }
    })
}

/// 커버 아트를 내려받는다. 이미 있으면 건너뛴다.
pub fn download_cover(client: &Client, url: &str, path: &Path) -> Result<()> {
    if path.exists() {
        debug!("{} 이미 존재함", path.display());
        return Ok(());
    }
    let mut response = client.get(url).send()?.error_for_status()?;
    let mut file = fs::File::create(path)?;
    response.copy_to(&mut file)?;
    info!("커버 아트 저장: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::TcpListener;

    /// 요청 한 번을 받아 지정한 상태 줄과 본문으로 응답하는 스텁 서버.
    fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);
                let head = format!(
                    "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}/t/01.mp3")
    }

    fn plain_desc(url: String) -> StreamDescriptor {
        StreamDescriptor {
            url,
            declared: ContainerKind::Mp3,
            length: None,
            post_process: PostProcess::None,
        }
    }

    #[test]
    fn test_with_ext_keeps_dotted_name() {
        // "01. 제목" 같은 base에서 Path::with_extension은 이름을 망가뜨린다
        let base = PathBuf::from("/a/01. Strawberry Moon");
        assert_eq!(
            with_ext(&base, "mp3"),
            PathBuf::from("/a/01. Strawberry Moon.mp3")
        );
        assert_eq!(
            with_ext(&base, PARTIAL_EXT),
            PathBuf::from("/a/01. Strawberry Moon.partial")
        );
    }

    #[test]
    fn test_resolve_extension_redirect_downgrade() {
        // FLAC 요청이 MP3 URL로 리다이렉트된 경우
        assert_eq!(
            resolve_extension("https://cdn.example.com/stream/abc123.mp3", ContainerKind::Flac),
            ContainerKind::Mp3
        );
    }

    #[test]
    fn test_resolve_extension_query_string() {
        assert_eq!(
            resolve_extension(
                "https://cdn.example.com/t/abc.flac?token=x.y&expires=1",
                ContainerKind::Mp3
            ),
            ContainerKind::Flac
        );
    }

    #[test]
    fn test_resolve_extension_aac_corrects_to_m4a() {
        let kind = resolve_extension("https://cdn.example.com/t/abc.aac", ContainerKind::Flac);
        assert_eq!(kind, ContainerKind::Mp4);
        assert_eq!(kind.ext(), "m4a");
    }

    #[test]
    fn test_resolve_extension_uninformative_url() {
        // 확장자가 없으면 선언된 포맷을 쓴다
        assert_eq!(
            resolve_extension("https://stm.example.com/listen/12345", ContainerKind::Flac),
            ContainerKind::Flac
        );
        assert_eq!(
            resolve_extension("https://stm.example.com/listen/12345?q=hi", ContainerKind::Mp3),
            ContainerKind::Mp3
        );
    }

    #[test]
    fn test_existing_final_detects_any_container() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        assert!(existing_final(&base).is_none());

        fs::write(with_ext(&base, "m4a"), b"x").unwrap();
        let (path, kind) = existing_final(&base).unwrap();
        assert_eq!(kind, ContainerKind::Mp4);
        assert!(path.ends_with("01. Title.m4a"));
    }

    #[test]
    fn test_existing_final_ignores_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        fs::write(with_ext(&base, PARTIAL_EXT), b"half").unwrap();
        assert!(existing_final(&base).is_none());
    }

    #[test]
    fn test_resume_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let partial = tmp.path().join("01. Title.partial");
        assert_eq!(resume_offset(&partial), 0);
        fs::write(&partial, vec![0u8; 777]).unwrap();
        assert_eq!(resume_offset(&partial), 777);
    }

    #[test]
    fn test_resume_appends_on_partial_content() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        fs::write(with_ext(&base, PARTIAL_EXT), b"0123456789").unwrap();

        let url = serve_once("HTTP/1.1 206 Partial Content", b"abcdefghij".to_vec());
        match fetch(&Client::new(), &plain_desc(url), &base).unwrap() {
            FetchStatus::Done(path, kind) => {
                assert_eq!(kind, ContainerKind::Mp3);
                assert_eq!(fs::read(path).unwrap(), b"0123456789abcdefghij");
            }
            other => panic!("Done이 아님: {other:?}"),
        }
    }

    #[test]
    fn test_resume_restarts_when_server_ignores_range() {
        // 범위 요청을 무시하고 전체 본문을 200으로 주는 서버:
        // 이어 쓰면 partial + 전체가 합쳐진 깨진 파일이 된다
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        let full = b"0123456789abcdefghij";
        fs::write(with_ext(&base, PARTIAL_EXT), &full[..10]).unwrap();

        let url = serve_once("HTTP/1.1 200 OK", full.to_vec());
        match fetch(&Client::new(), &plain_desc(url), &base).unwrap() {
            FetchStatus::Done(path, _) => {
                assert_eq!(fs::read(path).unwrap(), full);
            }
            other => panic!("Done이 아님: {other:?}"),
        }
    }

    #[test]
    fn test_complete_partial_finalized_on_416() {
        // flush와 rename 사이에서 중단된, 끝까지 받아 둔 partial.
        // 범위 요청이 416으로 돌아와도 재시도는 개명으로 수렴해야 한다.
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        let content = b"0123456789abcdefghij";
        fs::write(with_ext(&base, PARTIAL_EXT), content).unwrap();

        let url = serve_once("HTTP/1.1 416 Range Not Satisfiable", Vec::new());
        match fetch(&Client::new(), &plain_desc(url), &base).unwrap() {
            FetchStatus::Done(path, _) => {
                assert_eq!(fs::read(path).unwrap(), content);
                assert!(!with_ext(&base, PARTIAL_EXT).exists());
            }
            other => panic!("Done이 아님: {other:?}"),
        }
    }

    #[test]
    fn test_drm_header_stripped_from_unranged_body() {
        // DRM 스트림에 200 전체 본문이 온 경우: 헤더를 버리고 복호화해야 한다
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("01. Title");
        let plaintext = b"decrypted audio payload".to_vec();

        let mut encrypted = plaintext.clone();
        let mut cipher = Rc4::new(b"lic-key");
        cipher.skip(512);
        cipher.apply(&mut encrypted);
        let mut body = vec![0u8; 1024];
        body.extend_from_slice(&encrypted);

        let url = serve_once("HTTP/1.1 200 OK", body);
        let desc = StreamDescriptor {
            url,
            declared: ContainerKind::Mp3,
            length: None,
            post_process: PostProcess::StripDrm {
                header_len: 1024,
                keystream_discard: 512,
                key: b"lic-key".to_vec(),
            },
        };
        match fetch(&Client::new(), &desc, &base).unwrap() {
            FetchStatus::Done(path, _) => {
                assert_eq!(fs::read(path).unwrap(), plaintext);
            }
            other => panic!("Done이 아님: {other:?}"),
        }
    }
}
