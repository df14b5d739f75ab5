//! # Ethereumアドレス
//!
//! 20バイトのアカウントアドレスと、EIP-55チェックサム形式での表示・解析。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{keccak256, strip_0x, CryptoError};

/// 20バイトのEthereumアドレス。表示は常にEIP-55チェックサム形式。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// バイト列から構築する。
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// 20バイト表現
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// ABIエンコード用の32バイト表現（左ゼロ埋め）。
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// EIP-55チェックサム付き文字列。
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    /// `0x` 付き40桁のhexを受け付ける。
    ///
    /// 大文字小文字が混在する場合はEIP-55チェックサムとして検証する。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = strip_0x(trimmed);
        if body.len() != 40 {
            return Err(CryptoError::InvalidAddress(format!(
                "40桁のhexである必要があります: {trimmed}"
            )));
        }
        let bytes = hex::decode(body).map_err(|e| {
            CryptoError::InvalidAddress(format!("{trimmed}: {e}"))
        })?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        let address = Self(arr);

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *body {
            return Err(CryptoError::InvalidAddress(format!(
                "EIP-55チェックサムが一致しません: {trimmed}"
            )));
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
