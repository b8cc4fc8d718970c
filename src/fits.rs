//! Minimal FITS image codec.
//!
//! Reads the primary HDU, or the first `IMAGE` extension when the primary
//! array is empty (the layout most level-1 solar archives use), and decodes
//! 2-D big-endian data of any standard `BITPIX` into physical `f64` values
//! (`BZERO + BSCALE * raw`, integer `BLANK` → NaN).
//!
//! Headers are sequences of 80-byte cards in 2880-byte blocks, terminated by
//! `END`. Tile-compressed images (binary tables with `ZIMAGE = T`) are not
//! supported.

use std::fmt;
use std::path::Path;

use crate::error::{HelioError, Result};

pub const BLOCK_LEN: usize = 2880;
const CARD_LEN: usize = 80;
const CARDS_PER_BLOCK: usize = BLOCK_LEN / CARD_LEN;

/// Keys the encoder writes itself and never copies from a caller's header.
const STRUCTURAL_KEYS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BSCALE", "BZERO",
    "BLANK", "END", "XTENSION", "PCOUNT", "GCOUNT",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Commentary cards (`COMMENT`, `HISTORY`, blank keys) and empty values.
    None,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: String,
    pub value: Value,
    pub comment: Option<String>,
}

impl Card {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into().to_ascii_uppercase(),
            value,
            comment: None,
        }
    }

    fn is_commentary(&self) -> bool {
        matches!(self.key.as_str(), "COMMENT" | "HISTORY" | "")
    }
}

/// Ordered header cards with typed lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Replace the first card with this key, or append a new one.
    pub fn set(&mut self, key: &str, value: Value) {
        let key = key.to_ascii_uppercase();
        match self.cards.iter_mut().find(|c| c.key == key) {
            Some(card) => card.value = value,
            None => self.cards.push(Card::new(key, value)),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cards
            .iter()
            .find(|c| !c.is_commentary() && c.key.eq_ignore_ascii_case(key))
            .map(|c| &c.value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int(i) => Some(*i),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Cards from `fallback` whose keys this header lacks, appended at the end.
    fn inherit(&mut self, fallback: &Header) {
        for card in &fallback.cards {
            if card.is_commentary() || STRUCTURAL_KEYS.contains(&card.key.as_str()) {
                continue;
            }
            if !self.contains(&card.key) {
                self.cards.push(card.clone());
            }
        }
    }
}

/// A decoded 2-D image: `data[y * width + x]`, row 0 first as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FitsImage {
    pub header: Header,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

struct Hdu {
    header: Header,
    data_start: usize,
    data_len: usize,
    /// Offset of the next HDU (data padded to a whole block).
    next: usize,
}

pub fn read_image(path: &Path) -> Result<FitsImage> {
    let bytes = std::fs::read(path).map_err(|e| HelioError::io(path, e))?;
    decode_image(&bytes, path)
}

/// True when `bytes` begin like a FITS primary header.
pub fn looks_like_fits(bytes: &[u8]) -> bool {
    bytes.starts_with(b"SIMPLE  =")
}

/// Decode the first image in a FITS byte stream. `path` is only used for
/// error messages.
pub fn decode_image(bytes: &[u8], path: &Path) -> Result<FitsImage> {
    if !looks_like_fits(bytes) {
        return Err(HelioError::unsupported(
            path,
            "missing SIMPLE keyword; not a FITS file",
        ));
    }

    let primary = read_hdu(bytes, 0, path)?;
    if primary.header.get_bool("SIMPLE") != Some(true) {
        return Err(HelioError::unsupported(
            path,
            "SIMPLE = F; non-conforming FITS is not supported",
        ));
    }

    if naxis(&primary.header, path)? > 0 {
        return image_from_hdu(bytes, &primary, path);
    }

    let mut offset = primary.next;
    while offset < bytes.len() {
        let mut hdu = read_hdu(bytes, offset, path)?;
        let xtension = hdu.header.get_str("XTENSION").unwrap_or_default().trim();
        if xtension.eq_ignore_ascii_case("IMAGE") && naxis(&hdu.header, path)? > 0 {
            hdu.header.inherit(&primary.header);
            return image_from_hdu(bytes, &hdu, path);
        }
        if hdu.header.get_bool("ZIMAGE") == Some(true) {
            return Err(HelioError::unsupported(
                path,
                "tile-compressed images are not supported",
            ));
        }
        offset = hdu.next;
    }

    Err(HelioError::corrupt(path, "no image data in any HDU"))
}

fn read_hdu(bytes: &[u8], offset: usize, path: &Path) -> Result<Hdu> {
    let mut header = Header::new();
    let mut pos = offset;
    let mut ended = false;

    while !ended {
        let block = bytes
            .get(pos..pos + BLOCK_LEN)
            .ok_or_else(|| HelioError::corrupt(path, "header ends before END card"))?;
        for raw in block.chunks_exact(CARD_LEN) {
            match parse_card(raw, path)? {
                Some(card) => header.push(card),
                None => {
                    ended = true;
                    break;
                }
            }
        }
        pos += BLOCK_LEN;
    }

    let data_len = data_len(&header, path)?;
    let next = data_len
        .div_ceil(BLOCK_LEN)
        .checked_mul(BLOCK_LEN)
        .and_then(|padded| pos.checked_add(padded))
        .ok_or_else(|| HelioError::corrupt(path, "data size overflows"))?;
    if bytes.len() - pos < data_len {
        return Err(HelioError::corrupt(
            path,
            format!(
                "data truncated: expected {} bytes at offset {}, file has {}",
                data_len,
                pos,
                bytes.len().saturating_sub(pos)
            ),
        ));
    }

    Ok(Hdu {
        header,
        data_start: pos,
        data_len,
        next,
    })
}

fn naxis(header: &Header, path: &Path) -> Result<usize> {
    let n = header
        .get_i64("NAXIS")
        .ok_or_else(|| HelioError::corrupt(path, "missing NAXIS"))?;
    if !(0..=999).contains(&n) {
        return Err(HelioError::corrupt(path, format!("invalid NAXIS = {}", n)));
    }
    Ok(n as usize)
}

fn axes(header: &Header, path: &Path) -> Result<Vec<usize>> {
    (1..=naxis(header, path)?)
        .map(|i| {
            let key = format!("NAXIS{}", i);
            match header.get_i64(&key) {
                Some(n) if n >= 0 => Ok(n as usize),
                _ => Err(HelioError::corrupt(path, format!("missing or invalid {}", key))),
            }
        })
        .collect()
}

fn bitpix(header: &Header, path: &Path) -> Result<i64> {
    match header.get_i64("BITPIX") {
        Some(b @ (8 | 16 | 32 | 64 | -32 | -64)) => Ok(b),
        Some(b) => Err(HelioError::corrupt(path, format!("invalid BITPIX = {}", b))),
        None => Err(HelioError::corrupt(path, "missing BITPIX")),
    }
}

fn data_len(header: &Header, path: &Path) -> Result<usize> {
    let bytes_per = (bitpix(header, path)?.unsigned_abs() / 8) as usize;
    let shape = axes(header, path)?;
    if shape.is_empty() {
        return Ok(0);
    }
    let pcount = header.get_i64("PCOUNT").unwrap_or(0).max(0) as usize;
    let gcount = header.get_i64("GCOUNT").unwrap_or(1).max(1) as usize;
    let elements = shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .and_then(|n| n.checked_add(pcount))
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bytes_per))
        .ok_or_else(|| HelioError::corrupt(path, "data size overflows"))?;
    Ok(elements)
}

fn image_from_hdu(bytes: &[u8], hdu: &Hdu, path: &Path) -> Result<FitsImage> {
    let shape = axes(&hdu.header, path)?;
    let (width, height) = match shape.as_slice() {
        [w, h] => (*w, *h),
        [w, h, rest @ ..] if rest.iter().all(|&n| n == 1) => (*w, *h),
        other => {
            return Err(HelioError::corrupt(
                path,
                format!("expected a 2-D image, found shape {:?}", other),
            ))
        }
    };
    if width == 0 || height == 0 {
        return Err(HelioError::corrupt(path, "image has a zero-length axis"));
    }

    let bitpix = bitpix(&hdu.header, path)?;
    let bscale = hdu.header.get_f64("BSCALE").unwrap_or(1.0);
    let bzero = hdu.header.get_f64("BZERO").unwrap_or(0.0);
    let blank = hdu.header.get_i64("BLANK");

    let raw = &bytes[hdu.data_start..hdu.data_start + hdu.data_len];
    let data = decode_data(raw, bitpix, bscale, bzero, blank);
    if data.len() != width * height {
        return Err(HelioError::corrupt(
            path,
            format!("decoded {} pixels, expected {}", data.len(), width * height),
        ));
    }

    Ok(FitsImage {
        header: hdu.header.clone(),
        width,
        height,
        data,
    })
}

fn decode_data(raw: &[u8], bitpix: i64, bscale: f64, bzero: f64, blank: Option<i64>) -> Vec<f64> {
    let scale = |v: f64| bzero + bscale * v;
    let int = |v: i64| {
        if Some(v) == blank {
            f64::NAN
        } else {
            scale(v as f64)
        }
    };
    match bitpix {
        8 => raw.iter().map(|&b| int(b as i64)).collect(),
        16 => raw
            .chunks_exact(2)
            .map(|c| int(i16::from_be_bytes([c[0], c[1]]) as i64))
            .collect(),
        32 => raw
            .chunks_exact(4)
            .map(|c| int(i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as i64))
            .collect(),
        64 => raw
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                int(i64::from_be_bytes(b))
            })
            .collect(),
        -32 => raw
            .chunks_exact(4)
            .map(|c| scale(f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64))
            .collect(),
        -64 => raw
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                scale(f64::from_be_bytes(b))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse one 80-byte card. `Ok(None)` marks the `END` card.
fn parse_card(raw: &[u8], path: &Path) -> Result<Option<Card>> {
    if !raw.iter().all(|b| (0x20..=0x7e).contains(b)) {
        return Err(HelioError::corrupt(path, "header contains non-ASCII bytes"));
    }
    // All bytes are printable ASCII, so this cannot fail.
    let text = std::str::from_utf8(raw).map_err(|e| HelioError::corrupt(path, e.to_string()))?;

    let key = text[..8].trim_end().to_string();
    if key == "END" {
        return Ok(None);
    }
    if &text[8..10] != "= " {
        let rest = text[8..].trim_end();
        return Ok(Some(Card {
            key,
            value: Value::None,
            comment: (!rest.is_empty()).then(|| rest.trim_start().to_string()),
        }));
    }

    let (value, comment) = parse_value(&text[10..])
        .ok_or_else(|| HelioError::corrupt(path, format!("unterminated string in card {}", key)))?;
    Ok(Some(Card {
        key,
        value,
        comment,
    }))
}

fn parse_value(field: &str) -> Option<(Value, Option<String>)> {
    let trimmed = field.trim_start();
    if let Some(body) = trimmed.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        let mut close = None;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    out.push('\'');
                    chars.next();
                } else {
                    close = Some(i);
                    break;
                }
            } else {
                out.push(c);
            }
        }
        let close = close?;
        let rest = &body[close + 1..];
        let comment = rest
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return Some((Value::Str(out.trim_end().to_string()), comment));
    }

    let (raw, comment) = match trimmed.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (trimmed.trim(), None),
    };
    let value = match raw {
        "" => Value::None,
        "T" => Value::Bool(true),
        "F" => Value::Bool(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(x) = raw.replace(['D', 'd'], "E").parse::<f64>() {
                Value::Float(x)
            } else {
                Value::Str(raw.to_string())
            }
        }
    };
    Some((value, comment))
}

fn format_card(card: &Card) -> String {
    let mut line = if card.is_commentary() {
        format!(
            "{:<8}{}",
            card.key,
            card.comment.as_deref().unwrap_or_default()
        )
    } else {
        let value = match &card.value {
            Value::Str(s) => format!("{:<20}", format!("'{:<8}'", s.replace('\'', "''"))),
            Value::Bool(b) => format!("{:>20}", if *b { "T" } else { "F" }),
            Value::Int(i) => format!("{:>20}", i),
            Value::Float(x) => format!("{:>20}", format!("{:?}", x).to_ascii_uppercase()),
            Value::None => " ".repeat(20),
        };
        let mut line = format!("{:<8}= {}", card.key, value);
        if let Some(comment) = &card.comment {
            line.push_str(" / ");
            line.push_str(comment);
        }
        line
    };
    line.retain(|c| (' '..='~').contains(&c));
    line.truncate(CARD_LEN);
    format!("{:<80}", line)
}

fn encode_header(cards: &[Card]) -> Vec<u8> {
    let mut out = String::with_capacity(BLOCK_LEN);
    for card in cards {
        out.push_str(&format_card(card));
    }
    out.push_str(&format!("{:<80}", "END"));
    let blocks = (cards.len() + 1).div_ceil(CARDS_PER_BLOCK);
    let mut bytes = out.into_bytes();
    bytes.resize(blocks * BLOCK_LEN, b' ');
    bytes
}

/// Encode a 2-D `BITPIX = -32` primary HDU. Structural keys in `header`
/// are ignored; everything else is copied after them.
pub fn encode_image(header: &Header, width: usize, height: usize, data: &[f64]) -> Result<Vec<u8>> {
    if width == 0 || height == 0 || data.len() != width * height {
        return Err(HelioError::InvalidQuery(format!(
            "image of {}x{} cannot hold {} values",
            width,
            height,
            data.len()
        )));
    }
    let mut cards = vec![
        Card::new("SIMPLE", Value::Bool(true)),
        Card::new("BITPIX", Value::Int(-32)),
        Card::new("NAXIS", Value::Int(2)),
        Card::new("NAXIS1", Value::Int(width as i64)),
        Card::new("NAXIS2", Value::Int(height as i64)),
    ];
    cards.extend(
        header
            .cards()
            .iter()
            .filter(|c| !STRUCTURAL_KEYS.contains(&c.key.as_str()))
            .filter(|c| !matches!(c.value, Value::Float(x) if !x.is_finite()))
            .cloned(),
    );

    let mut bytes = encode_header(&cards);
    let data_start = bytes.len();
    for v in data {
        bytes.extend_from_slice(&(*v as f32).to_be_bytes());
    }
    let data_len = bytes.len() - data_start;
    bytes.resize(data_start + data_len.div_ceil(BLOCK_LEN) * BLOCK_LEN, 0);
    Ok(bytes)
}

pub fn write_image(
    path: &Path,
    header: &Header,
    width: usize,
    height: usize,
    data: &[f64],
) -> Result<()> {
    let bytes = encode_image(header, width, height, data)?;
    std::fs::write(path, bytes).map_err(|e| HelioError::io(path, e))
}
