//! Encoding spec strings describing how a record was encoded
//!
//! Grammar of the strings the writer produces:
//!
//! ```text
//! spec   = token | "b:{" block ("," block)* "}"
//! block  = size "*=" token
//! size   = "256K" | <n> "K" | <n>
//! token  = "n" | "z" | "z:{" level "}" | "z:{" level ",mpq}" | "e:{" key "," iv "," token "}"
//! ```

use std::fmt;

use super::emap::{DEFAULT_ZLIB_LEVEL, EncodingMap};
use super::error::{BlteError, BlteResult};

/// Blocks of at least this size all use the `256K` label
pub const LARGE_BLOCK_SIZE: usize = 256 * 1024;

/// Size label for a block of `size` decoded bytes
pub fn size_label(size: usize) -> String {
    if size >= LARGE_BLOCK_SIZE {
        "256K".to_string()
    } else if size > 1024 {
        format!("{}K", size / 1024)
    } else {
        size.to_string()
    }
}

/// Encryption layer named in a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecEncryption {
    /// Key name
    pub key_name: u64,
    /// Stored IV
    pub iv: [u8; 4],
}

/// Encoding of one block as named in a spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecBlock {
    /// Size label, absent for single-block specs
    pub size: Option<String>,
    /// Compression applied to the block
    pub map: EncodingMap,
    /// Encryption layer, if any
    pub encryption: Option<SpecEncryption>,
}

impl SpecBlock {
    fn token(&self) -> String {
        let inner = self.map.spec_token();
        match self.encryption {
            Some(enc) => format!("e:{{{:016X},{},{inner}}}", enc.key_name, hex::encode(enc.iv)),
            None => inner,
        }
    }
}

/// Parsed encoding spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingSpec {
    /// Blocks in stream order
    pub blocks: Vec<SpecBlock>,
}

impl EncodingSpec {
    /// Parse a spec string
    pub fn parse(input: &str) -> BlteResult<Self> {
        let spec_error = |reason: &str| BlteError::InvalidSpec {
            spec: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(spec_error("empty input"));
        }

        let Some(body) = input.strip_prefix("b:{") else {
            let (map, encryption) = parse_token(input).ok_or_else(|| spec_error("bad token"))?;
            return Ok(Self {
                blocks: vec![SpecBlock {
                    size: None,
                    map,
                    encryption,
                }],
            });
        };

        let body = body
            .strip_suffix('}')
            .ok_or_else(|| spec_error("unterminated block list"))?;

        let mut blocks = Vec::new();
        for item in split_top_level(body) {
            let (size, token) = item
                .split_once("*=")
                .ok_or_else(|| spec_error("block without size"))?;

            let digits = size.strip_suffix('K').unwrap_or(size);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(spec_error("bad block size"));
            }

            let (map, encryption) = parse_token(token).ok_or_else(|| spec_error("bad token"))?;
            blocks.push(SpecBlock {
                size: Some(size.to_string()),
                map,
                encryption,
            });
        }

        if blocks.is_empty() {
            return Err(spec_error("no blocks"));
        }

        Ok(Self { blocks })
    }
}

impl fmt::Display for EncodingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.blocks.as_slice() {
            [single] if single.size.is_none() => write!(f, "{}", single.token()),
            blocks => {
                write!(f, "b:{{")?;
                for (i, block) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    let size = block.size.as_deref().unwrap_or("");
                    write!(f, "{size}*={}", block.token())?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn parse_token(token: &str) -> Option<(EncodingMap, Option<SpecEncryption>)> {
    match token {
        "n" => return Some((EncodingMap::None, None)),
        "z" => {
            return Some((
                EncodingMap::ZLib {
                    level: DEFAULT_ZLIB_LEVEL,
                },
                None,
            ));
        }
        _ => {}
    }

    if let Some(args) = token.strip_prefix("z:{").and_then(|t| t.strip_suffix('}')) {
        let (level, mpq) = match args.split_once(',') {
            Some((level, "mpq")) => (level, true),
            Some(_) => return None,
            None => (args, false),
        };
        let level: u8 = level.parse().ok().filter(|l| (1..=9).contains(l))?;
        let map = if mpq {
            EncodingMap::Mpq { level }
        } else {
            EncodingMap::ZLib { level }
        };
        return Some((map, None));
    }

    let args = token.strip_prefix("e:{")?.strip_suffix('}')?;
    let mut parts = args.splitn(3, ',');
    let key_name = u64::from_str_radix(parts.next()?, 16).ok()?;
    let mut iv = [0u8; 4];
    hex::decode_to_slice(parts.next()?, &mut iv).ok()?;
    let (map, nested) = parse_token(parts.next()?)?;
    if nested.is_some() {
        return None;
    }

    Some((map, Some(SpecEncryption { key_name, iv })))
}

/// Split on commas that are not inside braces
fn split_top_level(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&body[start..]);
    items
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_size_labels() {
        assert_eq!(size_label(0), "0");
        assert_eq!(size_label(1024), "1024");
        assert_eq!(size_label(1025), "1K");
        assert_eq!(size_label(10_000), "9K");
        assert_eq!(size_label(262_143), "255K");
        assert_eq!(size_label(262_144), "256K");
        assert_eq!(size_label(10_000_000), "256K");
    }

    #[test]
    fn test_parse_single_token() {
        let spec = EncodingSpec::parse("z").unwrap();
        assert_eq!(spec.blocks.len(), 1);
        assert_eq!(spec.blocks[0].map, EncodingMap::zlib(9));
        assert_eq!(spec.to_string(), "z");
    }

    #[test]
    fn test_parse_block_table() {
        let input = "b:{256K*=z:{6},2500*=n,9K*=z:{9,mpq}}";
        let spec = EncodingSpec::parse(input).unwrap();
        assert_eq!(spec.blocks.len(), 3);
        assert_eq!(spec.blocks[0].map, EncodingMap::zlib(6));
        assert_eq!(spec.blocks[1].size.as_deref(), Some("2500"));
        assert_eq!(spec.blocks[2].map, EncodingMap::mpq(9));
        assert_eq!(spec.to_string(), input);
    }

    #[test]
    fn test_parse_encrypted_block() {
        let input = "b:{1K*=e:{FA505078126ACB3E,01020304,z},20*=n}";
        let spec = EncodingSpec::parse(input).unwrap();
        let enc = spec.blocks[0].encryption.expect("encrypted block");
        assert_eq!(enc.key_name, 0xFA50_5078_126A_CB3E);
        assert_eq!(enc.iv, [1, 2, 3, 4]);
        assert_eq!(spec.to_string(), input);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "x", "b:{", "b:{}", "b:{1K=z}", "b:{AK*=z}", "z:{0}", "z:{5,lz4}"] {
            assert!(
                matches!(EncodingSpec::parse(bad), Err(BlteError::InvalidSpec { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
