//! # Dropper 暗号処理
//!
//! Ethereum互換の署名・アドレス・型付きデータハッシュと、
//! 署名サーバーとのチャネル認証に用いるEd25519を提供する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | バウチャー署名 | secp256k1 ECDSA（復元可能、`v` = 27/28） |
//! | ハッシュ | Keccak-256 |
//! | 型付きデータ | EIP-712 |
//! | 鍵保管 | Web3 Secret Storage（keystore v3） |
//! | チャネル認証 | Ed25519 |

pub mod address;
pub mod eip712;
pub mod keystore;

use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

pub use address::Address;
pub use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};
pub use k256::ecdsa::SigningKey as Secp256k1SigningKey;

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 署名の形式が不正（長さ・`v`値・r/s範囲）
    #[error("署名の形式が不正です: {0}")]
    MalformedSignature(String),
    /// 公開鍵の復元に失敗
    #[error("署名から公開鍵を復元できません")]
    RecoveryFailed,
    /// ECDSA署名に失敗
    #[error("ECDSA署名に失敗しました: {0}")]
    SigningFailed(String),
    /// アドレスの形式が不正
    #[error("アドレスの形式が不正です: {0}")]
    InvalidAddress(String),
    /// hex文字列の形式が不正
    #[error("hexデコードに失敗しました: {0}")]
    InvalidHex(String),
    /// 秘密鍵の形式が不正
    #[error("秘密鍵の形式が不正です")]
    InvalidPrivateKey,
    /// keystoreの復号に失敗
    #[error("keystoreの復号に失敗しました: {0}")]
    Keystore(String),
    /// Ed25519署名検証エラー
    #[error("Ed25519署名検証に失敗しました")]
    SignatureVerifyError,
}

/// 32バイトのメッセージダイジェスト
pub type Digest32 = [u8; 32];

/// Keccak-256ハッシュ計算。
pub fn keccak256(data: &[u8]) -> Digest32 {
    Keccak256::digest(data).into()
}

/// `0x` 接頭辞を取り除く。
pub(crate) fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// `0x` 付きhex文字列に変換する。
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// `0x` 付き（省略可）hex文字列を32バイトダイジェストとしてデコードする。
pub fn decode_digest(s: &str) -> Result<Digest32, CryptoError> {
    let bytes = hex::decode(strip_0x(s)).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidHex("ダイジェストは32バイトである必要があります".into()))
}

// ---------------------------------------------------------------------------
// 復元可能署名
// ---------------------------------------------------------------------------

/// 65バイトの復元可能secp256k1署名（`r || s || v`）。
///
/// `v` は常に27または28に正規化して保持する。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; 65]);

impl RecoverableSignature {
    /// バイト列から構築する。`v` が0/1の場合は27/28に補正する。
    ///
    /// 長さ不正、`v` 不正、r/s がスカラー範囲外、high-s の署名は拒否する。
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut buf: [u8; 65] = bytes.try_into().map_err(|_| {
            CryptoError::MalformedSignature(format!(
                "署名は65バイトである必要があります（実際: {}バイト）",
                bytes.len()
            ))
        })?;
        buf[64] = match buf[64] {
            0 | 1 => buf[64] + 27,
            27 | 28 => buf[64],
            v => {
                return Err(CryptoError::MalformedSignature(format!(
                    "v値が不正です: {v}"
                )))
            }
        };
        let sig = Signature::from_slice(&buf[..64])
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
        if sig.normalize_s().is_some() {
            return Err(CryptoError::MalformedSignature(
                "s値が曲線位数の半分を超えています".into(),
            ));
        }
        Ok(Self(buf))
    }

    /// `0x` 付き（省略可）hex文字列から構築する。
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes =
            hex::decode(strip_0x(s)).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// 65バイト表現を返す。
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// `v` 値（27または28）
    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// `0x` 付きhex文字列
    pub fn to_hex(&self) -> String {
        to_hex_prefixed(&self.0)
    }

    fn parts(&self) -> Result<(Signature, RecoveryId), CryptoError> {
        let sig = Signature::from_slice(&self.0[..64])
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
        let recid = RecoveryId::from_byte(self.0[64] - 27)
            .ok_or_else(|| CryptoError::MalformedSignature("v値が不正です".into()))?;
        Ok((sig, recid))
    }
}

impl std::fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecoverableSignature")
            .field(&self.to_hex())
            .finish()
    }
}

impl std::fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for RecoverableSignature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// secp256k1公開鍵からEthereumアドレスを導出する。
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let point = verifying_key.to_encoded_point(false);
    // 先頭の0x04を除いた64バイトをハッシュし、末尾20バイトを取る
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::from_bytes(out)
}

/// 秘密鍵に対応するEthereumアドレス。
pub fn signer_address(signing_key: &SigningKey) -> Address {
    address_of(signing_key.verifying_key())
}

/// 秘密鍵バイト列（32バイト）からsecp256k1署名鍵を構築する。
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey, CryptoError> {
    SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)
}

/// 32バイトダイジェストに復元可能署名を付与する。
pub fn sign_digest(
    signing_key: &SigningKey,
    digest: &Digest32,
) -> Result<RecoverableSignature, CryptoError> {
    let (sig, recid) = signing_key
        .sign_prehash_recoverable(digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    let mut buf = [0u8; 65];
    buf[..64].copy_from_slice(&sig.to_bytes());
    buf[64] = recid.to_byte() + 27;
    Ok(RecoverableSignature(buf))
}

/// ダイジェストと署名から署名者アドレスを復元する。
pub fn recover_address(
    digest: &Digest32,
    signature: &RecoverableSignature,
) -> Result<Address, CryptoError> {
    let (sig, recid) = signature.parts()?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_of(&key))
}

// ---------------------------------------------------------------------------
// Ed25519（チャネル認証）
// ---------------------------------------------------------------------------

/// Ed25519による署名。
pub fn ed25519_sign(signing_key: &Ed25519SigningKey, message: &[u8]) -> Ed25519Signature {
    signing_key.sign(message)
}

/// Ed25519による署名検証。
pub fn ed25519_verify(
    verifying_key: &Ed25519VerifyingKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    verifying_key
        .verify(message, signature)
        .map_err(|_| CryptoError::SignatureVerifyError)
}

/// hex文字列（32バイト）からEd25519秘密鍵を復元する。
pub fn ed25519_signing_key_from_hex(s: &str) -> Result<Ed25519SigningKey, CryptoError> {
    let bytes = decode_digest(s)?;
    Ok(Ed25519SigningKey::from_bytes(&bytes))
}

/// hex文字列（32バイト）からEd25519公開鍵を復元する。
pub fn ed25519_verifying_key_from_hex(s: &str) -> Result<Ed25519VerifyingKey, CryptoError> {
    let bytes = decode_digest(s)?;
    Ed25519VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)
}
