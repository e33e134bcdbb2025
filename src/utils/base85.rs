//! Base-85 text codec (RFC 1924 alphabet).
//!
//! Used to embed precompiled program images in assembly text through the
//! `.include_zstd` directive. Input is processed in 4-byte big-endian groups;
//! a partial trailing group is zero-padded on encode and the padding
//! characters are dropped from the output.

use asim_derive::Error;

const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

/// Errors raised while decoding base-85 text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base85Error {
    #[error("invalid base85 character {character:?} at offset {offset}")]
    InvalidCharacter { character: char, offset: usize },
    #[error("base85 group ending at offset {offset} overflows 32 bits")]
    Overflow { offset: usize },
}

fn digit(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u32)
}

/// Encodes bytes as base-85 text.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(4) * 5);
    for chunk in data.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut word = u32::from_be_bytes(group);

        let mut chars = [0u8; 5];
        for c in chars.iter_mut().rev() {
            *c = ALPHABET[(word % 85) as usize];
            word /= 85;
        }
        for &c in &chars[..chunk.len() + 1] {
            out.push(c as char);
        }
    }
    out
}

/// Decodes base-85 text. Surrounding whitespace is ignored.
pub fn decode(text: &str) -> Result<Vec<u8>, Base85Error> {
    let text = text.trim().as_bytes();
    let mut out = Vec::with_capacity(text.len() / 5 * 4 + 4);

    for (index, chunk) in text.chunks(5).enumerate() {
        let mut word: u64 = 0;
        for i in 0..5 {
            // A short final group is padded with the highest digit.
            let value = match chunk.get(i) {
                Some(&c) => digit(c).ok_or(Base85Error::InvalidCharacter {
                    character: c as char,
                    offset: index * 5 + i,
                })?,
                None => 84,
            };
            word = word * 85 + value as u64;
        }
        let word = u32::try_from(word).map_err(|_| Base85Error::Overflow {
            offset: index * 5 + chunk.len() - 1,
        })?;
        let bytes = word.to_be_bytes();
        // A one-character group carries no data.
        out.extend_from_slice(&bytes[..chunk.len().saturating_sub(1)]);
    }
    Ok(out)
}
