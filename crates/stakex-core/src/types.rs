use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::MAX_ASSET_AMOUNT;
use crate::error::StakexError;

/// Chain time in unix seconds (UTC).
pub type Timestamp = i64;

// ── AccountName ──────────────────────────────────────────────────────────────

const NAME_CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

const fn name_char_value(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

/// Account identifier packed into 64 bits: up to twelve base-32 characters
/// (`.12345a-z`) plus an optional thirteenth character restricted to
/// `.1-5a-j`. Ordering is by the packed value, which is also the byte order
/// of the big-endian encoding used for storage keys.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountName(pub u64);

impl AccountName {
    /// Packs a name at compile time. Only for well-known names of at most
    /// twelve characters; panics on anything else.
    pub const fn constant(s: &str) -> Self {
        let bytes = s.as_bytes();
        assert!(bytes.len() <= 12, "constant account names are at most 12 chars");
        let mut value = 0u64;
        let mut i = 0;
        while i < bytes.len() {
            let v = match name_char_value(bytes[i]) {
                Some(v) => v,
                None => panic!("invalid character in account name"),
            };
            value |= (v & 0x1f) << (64 - 5 * (i + 1));
            i += 1;
        }
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(Self(u64::from_be_bytes(arr)))
    }

    /// Length of the textual form.
    pub fn length(&self) -> usize {
        self.to_string().len()
    }

    /// The last dot-separated component, e.g. `alice.stx` -> `stx`.
    /// A name without dots is its own suffix.
    pub fn suffix(&self) -> AccountName {
        let text = self.to_string();
        match text.rsplit_once('.') {
            Some((_, tail)) => tail.parse().unwrap_or(*self),
            None => *self,
        }
    }
}

impl FromStr for AccountName {
    type Err = StakexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(StakexError::InvalidName(format!("{s}: longer than 13 characters")));
        }
        if bytes.last() == Some(&b'.') {
            return Err(StakexError::InvalidName(format!("{s}: trailing dot")));
        }
        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let v = name_char_value(c)
                .ok_or_else(|| StakexError::InvalidName(format!("{s}: invalid character {:?}", c as char)))?;
            if i < 12 {
                value |= (v & 0x1f) << (64 - 5 * (i + 1));
            } else {
                if v > 0x0f {
                    return Err(StakexError::InvalidName(format!(
                        "{s}: thirteenth character must be one of .1-5a-j"
                    )));
                }
                value |= v;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
            out[12 - i] = NAME_CHARMAP[(tmp & mask) as usize];
            tmp >>= shift;
        }
        let len = out.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // The charmap is ASCII, so every byte is a valid char.
        let text: String = out[..len].iter().map(|&c| c as char).collect();
        f.write_str(&text)
    }
}

impl fmt::Debug for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountName({self})")
    }
}

impl Serialize for AccountName {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            s.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for AccountName {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let text = String::deserialize(d)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            Ok(Self(u64::deserialize(d)?))
        }
    }
}

// ── Symbol ───────────────────────────────────────────────────────────────────

/// Token symbol: precision in the low byte, up to seven upper-case code
/// letters in the remaining bytes (little-endian).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u64);

impl Symbol {
    pub const fn constant(code: &str, precision: u8) -> Self {
        let bytes = code.as_bytes();
        assert!(!bytes.is_empty() && bytes.len() <= 7, "symbol code must be 1..=7 chars");
        let mut raw = 0u64;
        let mut i = 0;
        while i < bytes.len() {
            assert!(bytes[i].is_ascii_uppercase(), "symbol code must be upper-case");
            raw |= (bytes[i] as u64) << (8 * (i + 1));
            i += 1;
        }
        Self(raw | precision as u64)
    }

    pub fn new(code: &str, precision: u8) -> Result<Self, StakexError> {
        let bytes = code.as_bytes();
        if bytes.is_empty() || bytes.len() > 7 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(StakexError::InvalidSymbol(format!("{precision},{code}")));
        }
        if precision > 18 {
            return Err(StakexError::InvalidSymbol(format!("{precision},{code}: precision above 18")));
        }
        let raw = bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * (i + 1)));
        Ok(Self(raw | precision as u64))
    }

    pub fn precision(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn code(&self) -> String {
        let mut code = String::new();
        let mut tmp = self.0 >> 8;
        while tmp > 0 {
            code.push((tmp & 0xff) as u8 as char);
            tmp >>= 8;
        }
        code
    }
}

impl FromStr for Symbol {
    type Err = StakexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| StakexError::InvalidSymbol(s.to_string()))?;
        let precision: u8 = precision
            .trim()
            .parse()
            .map_err(|_| StakexError::InvalidSymbol(s.to_string()))?;
        Symbol::new(code.trim(), precision)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision(), self.code())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({self})")
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            s.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let text = String::deserialize(d)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            Ok(Self(u64::deserialize(d)?))
        }
    }
}

// ── Asset ────────────────────────────────────────────────────────────────────

/// Fixed-point token amount. `amount` is in the smallest unit of `symbol`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    pub fn new(amount: i64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    pub fn zero(symbol: Symbol) -> Self {
        Self { amount: 0, symbol }
    }

    pub fn is_valid(&self) -> bool {
        (-MAX_ASSET_AMOUNT..=MAX_ASSET_AMOUNT).contains(&self.amount)
    }

    fn same_symbol(&self, other: &Asset) -> Result<(), StakexError> {
        if self.symbol != other.symbol {
            return Err(StakexError::SymbolMismatch {
                expected: self.symbol,
                got: other.symbol,
            });
        }
        Ok(())
    }

    fn bounded(amount: Option<i64>, symbol: Symbol) -> Result<Asset, StakexError> {
        match amount {
            Some(a) if (-MAX_ASSET_AMOUNT..=MAX_ASSET_AMOUNT).contains(&a) => Ok(Asset::new(a, symbol)),
            _ => Err(StakexError::AmountOverflow),
        }
    }

    pub fn checked_add(&self, other: Asset) -> Result<Asset, StakexError> {
        self.same_symbol(&other)?;
        Self::bounded(self.amount.checked_add(other.amount), self.symbol)
    }

    pub fn checked_sub(&self, other: Asset) -> Result<Asset, StakexError> {
        self.same_symbol(&other)?;
        Self::bounded(self.amount.checked_sub(other.amount), self.symbol)
    }

    pub fn checked_neg(&self) -> Result<Asset, StakexError> {
        Self::bounded(self.amount.checked_neg(), self.symbol)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.symbol.precision() as u32;
        let sign = if self.amount < 0 { "-" } else { "" };
        let magnitude = self.amount.unsigned_abs();
        if precision == 0 {
            return write!(f, "{sign}{magnitude} {}", self.symbol.code());
        }
        let p10 = 10u64.pow(precision);
        write!(
            f,
            "{sign}{}.{:0width$} {}",
            magnitude / p10,
            magnitude % p10,
            self.symbol.code(),
            width = precision as usize
        )
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({self})")
    }
}

impl FromStr for Asset {
    type Err = StakexError;

    /// Parses `"10.0000 SYS"`; the number of fraction digits is the precision.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || StakexError::InvalidAsset(s.to_string());
        let (number, code) = s.trim().split_once(' ').ok_or_else(bad)?;
        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) || frac_part.len() > 18 {
            return Err(bad());
        }
        let symbol = Symbol::new(code.trim(), frac_part.len() as u8)?;
        let joined = format!("{int_part}{frac_part}");
        let magnitude: i64 = joined.parse().map_err(|_| StakexError::AmountOverflow)?;
        let amount = if negative { -magnitude } else { magnitude };
        Asset::bounded(Some(amount), symbol)
    }
}

#[derive(Serialize, Deserialize)]
struct RawAsset {
    amount: i64,
    symbol: Symbol,
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            RawAsset { amount: self.amount, symbol: self.symbol }.serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let text = String::deserialize(d)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            let raw = RawAsset::deserialize(d)?;
            Ok(Asset::new(raw.amount, raw.symbol))
        }
    }
}

// ── ProducerKey ──────────────────────────────────────────────────────────────

/// Opaque block-signing key of a producer. Empty means "no key".
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ProducerKey(pub Vec<u8>);

impl ProducerKey {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }
}

impl fmt::Display for ProducerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ProducerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ProducerKey({})", &hex[..hex.len().min(16)])
    }
}

impl Serialize for ProducerKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for ProducerKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let text = String::deserialize(d)?;
            ProducerKey::from_hex(&text).map_err(serde::de::Error::custom)
        } else {
            Ok(Self(Vec::<u8>::deserialize(d)?))
        }
    }
}

// ── ResourceKind ─────────────────────────────────────────────────────────────

/// The two rentable resources. Each has its own loan book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Net,
}

impl ResourceKind {
    pub fn tag(&self) -> u8 {
        match self {
            ResourceKind::Cpu => 0,
            ResourceKind::Net => 1,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => f.write_str("cpu"),
            ResourceKind::Net => f.write_str("net"),
        }
    }
}
