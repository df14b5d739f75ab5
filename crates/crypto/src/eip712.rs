//! # EIP-712 型付きデータハッシュ
//!
//! ドメイン区切り値と構造体ハッシュから署名対象ダイジェスト
//! `keccak256(0x19 0x01 || domainSeparator || hashStruct(message))` を計算する。
//!
//! 扱うフィールド型は `uint256` / `address` / `string` のみ。

use crate::{keccak256, Address, Digest32};

/// EIP-712ドメイン。
///
/// 省略されたフィールドは `EIP712Domain` の型文字列からも除外される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    /// ドメイン名
    pub name: String,
    /// ドメインバージョン
    pub version: String,
    /// チェーンID
    pub chain_id: Option<u64>,
    /// 検証コントラクトアドレス
    pub verifying_contract: Option<Address>,
}

impl Eip712Domain {
    /// `EIP712Domain(...)` の型文字列
    pub fn type_string(&self) -> String {
        let mut fields = vec!["string name", "string version"];
        if self.chain_id.is_some() {
            fields.push("uint256 chainId");
        }
        if self.verifying_contract.is_some() {
            fields.push("address verifyingContract");
        }
        format!("EIP712Domain({})", fields.join(","))
    }

    /// ドメイン区切り値を計算する。
    pub fn separator(&self) -> Digest32 {
        let mut words = vec![
            keccak256(self.type_string().as_bytes()),
            encode_string(&self.name),
            encode_string(&self.version),
        ];
        if let Some(chain_id) = self.chain_id {
            words.push(encode_uint(chain_id as u128));
        }
        if let Some(contract) = &self.verifying_contract {
            words.push(contract.to_word());
        }
        keccak256(&words.concat())
    }
}

/// EIP-712で署名される構造体。
pub trait TypedStruct {
    /// `Name(type1 field1,...)` 形式の型文字列
    const TYPE: &'static str;

    /// 各フィールドを型文字列の順に32バイトへエンコードする。
    fn encode_fields(&self) -> Vec<[u8; 32]>;

    /// `hashStruct(message)`
    fn struct_hash(&self) -> Digest32 {
        let mut words = vec![keccak256(Self::TYPE.as_bytes())];
        words.extend(self.encode_fields());
        keccak256(&words.concat())
    }
}

/// `uint256` のエンコード（ビッグエンディアン、左ゼロ埋め）。
pub fn encode_uint(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `string` のエンコード（内容のKeccak-256）。
pub fn encode_string(value: &str) -> [u8; 32] {
    keccak256(value.as_bytes())
}

/// 署名対象ダイジェストを計算する。
pub fn signing_digest<T: TypedStruct>(domain: &Eip712Domain, message: &T) -> Digest32 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(&domain.separator());
    buf.extend_from_slice(&message.struct_hash());
    keccak256(&buf)
}
