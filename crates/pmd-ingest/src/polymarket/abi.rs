//! ABI word decoding for event logs
//!
//! Event data is a sequence of 32-byte big-endian words; indexed
//! parameters are single-word topics. Only static types are needed here.

/// Size of one ABI word in bytes
pub const WORD: usize = 32;

/// Decode `0x`-prefixed hex into bytes
pub fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|e| format!("invalid hex '{}': {}", value, e))
}

/// Split log data into words, requiring at least `count` of them
pub fn words(data: &str, count: usize) -> Result<Vec<[u8; WORD]>, String> {
    let bytes = decode_hex(data)?;
    if bytes.len() < count * WORD {
        return Err(format!(
            "log data has {} bytes, expected at least {}",
            bytes.len(),
            count * WORD
        ));
    }
    Ok(bytes
        .chunks_exact(WORD)
        .take(count)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Decode a topic into a single word
pub fn topic_word(topic: &str) -> Result<[u8; WORD], String> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != WORD {
        return Err(format!("topic '{}' is {} bytes, expected {}", topic, bytes.len(), WORD));
    }
    let mut word = [0u8; WORD];
    word.copy_from_slice(&bytes);
    Ok(word)
}

/// Lowercase `0x` address held in the low 20 bytes of a word
pub fn word_to_address(word: &[u8; WORD]) -> String {
    format!("0x{}", hex::encode(&word[12..]))
}

/// Full word as a `0x` hex string (hashes, ids)
pub fn word_to_hex(word: &[u8; WORD]) -> String {
    format!("0x{}", hex::encode(word))
}

/// `uint256` narrowed to `u64`; `None` if the value does not fit
pub fn word_to_u64(word: &[u8; WORD]) -> Option<u64> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    Some(u64::from_be_bytes(tail))
}

/// `uint256` as a base-10 string
pub fn word_to_decimal(word: &[u8; WORD]) -> String {
    let mut value = *word;
    let mut digits = Vec::with_capacity(78);

    while value.iter().any(|b| *b != 0) {
        let mut rem = 0u32;
        for byte in value.iter_mut() {
            let cur = (rem << 8) | u32::from(*byte);
            *byte = (cur / 10) as u8;
            rem = cur % 10;
        }
        digits.push(char::from(b'0' + rem as u8));
    }

    if digits.is_empty() {
        return "0".to_string();
    }
    digits.iter().rev().collect()
}
