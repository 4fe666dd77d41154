use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// multihash 前缀：sha2-256，摘要长度32字节
const MULTIHASH_SHA2_256: [u8; 2] = [0x12, 0x20];

/// 任务ID生成器
pub trait TaskIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 对16字节随机数做 sha2-256 multihash，再以URL安全的base64编码
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTaskIdGenerator;

impl RandomTaskIdGenerator {
    pub fn encode(seed: &[u8]) -> String {
        let digest = Sha256::digest(seed);
        let mut multihash = Vec::with_capacity(MULTIHASH_SHA2_256.len() + digest.len());
        multihash.extend_from_slice(&MULTIHASH_SHA2_256);
        multihash.extend_from_slice(&digest);
        URL_SAFE_NO_PAD.encode(multihash)
    }
}

impl TaskIdGenerator for RandomTaskIdGenerator {
    fn generate(&self) -> String {
        let seed: [u8; 16] = rand::random();
        Self::encode(&seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_encoding_is_deterministic_and_url_safe() {
        let a = RandomTaskIdGenerator::encode(b"0123456789abcdef");
        let b = RandomTaskIdGenerator::encode(b"0123456789abcdef");
        assert_eq!(a, b);
        // 34字节 → 46个base64字符
        assert_eq!(a.len(), 46);
        assert!(a.starts_with("EiA"));
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let generator = RandomTaskIdGenerator;
        let ids: HashSet<String> = (0..256).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 256);
    }
}
