/// RC4 스트림 암호.
///
/// KKBOX의 kc1 응답 봉투와 kkdrm 스트림 복호화에 쓴다. 세션 키 길이가
/// 로그인 시점에야 정해지므로 컴파일 타임 키 길이를 요구하는 registry
/// 구현 대신 직접 구현한다.
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Rc4 {
        debug_assert!(!key.is_empty());
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Rc4 { s, i: 0, j: 0 }
    }

    /// 키스트림 n바이트를 버린다. kkdrm은 첫 512바이트를 버리고 시작하며,
    /// 이어받기 시에는 이미 기록된 바이트 수만큼 추가로 버려 위치를 맞춘다.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.next_byte();
        }
    }

    /// 버퍼를 제자리에서 암호화/복호화한다.
    pub fn apply(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b ^= self.next_byte();
        }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let mut cipher = Rc4::new(b"Key");
        let mut data = b"Plaintext".to_vec();
        cipher.apply(&mut data);
        assert_eq!(hex::encode_upper(&data), "BBF316E8D940AF0AD3");
    }

    #[test]
    fn test_known_vector_wiki() {
        let mut cipher = Rc4::new(b"Wiki");
        let mut data = b"pedia".to_vec();
        cipher.apply(&mut data);
        assert_eq!(hex::encode_upper(&data), "1021BF0420");
    }

    #[test]
    fn test_roundtrip() {
        let mut enc = Rc4::new(b"session-key");
        let mut dec = Rc4::new(b"session-key");
        let original = b"some audio bytes".to_vec();
        let mut data = original.clone();
        enc.apply(&mut data);
        assert_ne!(data, original);
        dec.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_skip_aligns_resumed_stream() {
        // 전체를 한 번에 복호화한 결과와, 중간부터 skip으로 위치를 맞춰
        // 복호화한 결과가 일치해야 이어받기가 성립한다.
        let payload = vec![0x5au8; 1024];

        let mut full = Rc4::new(b"lic-content-key");
        full.skip(512);
        let mut whole = payload.clone();
        full.apply(&mut whole);

        let mut resumed = Rc4::new(b"lic-content-key");
        resumed.skip(512 + 700);
        let mut tail = payload[700..].to_vec();
        resumed.apply(&mut tail);

        assert_eq!(&whole[700..], &tail[..]);
    }
}
