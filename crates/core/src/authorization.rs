//! # 期限付き認可プロトコル
//!
//! アドレスの所有者であることを期限付きで証明する汎用バウチャーを発行・検証する。
//! メッセージはEIP-712の型付きデータ
//! `MoonstreamAuthorization(address address,uint256 deadline)` で、
//! ドメインは名前とバージョンのみを持つ。
//!
//! 検証は純粋関数であり、リプレイ防止は行わない。

use base64::Engine;

use dropper_crypto::eip712::{self, encode_uint, Eip712Domain, TypedStruct};
use dropper_crypto::{recover_address, Address, CryptoError, RecoverableSignature};
use dropper_types::AuthorizationPayload;

use crate::signer::{channel::unix_now, sign_verified, Signer, SignerError};

/// 認可ドメイン名の既定値
pub const DEFAULT_AUTH_DOMAIN_NAME: &str = "MoonstreamAuthorization";
/// 認可ドメインバージョンの既定値
pub const DEFAULT_AUTH_DOMAIN_VERSION: &str = "0.1.0";
/// `authorize` の既定の有効期間（秒）
pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Authorizationヘッダのスキーム
pub const AUTH_HEADER_SCHEME: &str = "moonstream";

/// 認可・クレームバウチャーの検証エラー。
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// 復元された署名者が宣言と一致しない
    #[error("署名者が一致しません: 宣言 {declared}, 復元 {recovered}")]
    SignerMismatch {
        /// 宣言されたアドレス
        declared: Address,
        /// 署名から復元されたアドレス
        recovered: Address,
    },
    /// 期限切れ
    #[error("認可の有効期限が切れています: 期限 {deadline}, 現在 {now}")]
    AuthorizationExpired {
        /// 期限
        deadline: u64,
        /// 検証時点の時刻またはブロック番号
        now: u64,
    },
    /// 署名の形式が不正
    #[error("署名の形式が不正です: {0}")]
    MalformedSignature(String),
    /// アドレスの形式が不正
    #[error("アドレスの形式が不正です: {0}")]
    InvalidAddress(String),
    /// Authorizationヘッダの形式が不正
    #[error("Authorizationヘッダの形式が不正です: {0}")]
    InvalidHeader(String),
    /// クレームの内容がドメインバージョンと合わない
    #[error("クレームの内容が不正です: {0}")]
    InvalidClaim(String),
    /// 署名バックエンドのエラー
    #[error(transparent)]
    Signer(#[from] SignerError),
}

pub(crate) fn parse_address(s: &str) -> Result<Address, AuthorizationError> {
    s.parse()
        .map_err(|e: CryptoError| AuthorizationError::InvalidAddress(e.to_string()))
}

pub(crate) fn parse_signature(s: &str) -> Result<RecoverableSignature, AuthorizationError> {
    RecoverableSignature::from_hex(s)
        .map_err(|e| AuthorizationError::MalformedSignature(e.to_string()))
}

/// 認可ドメイン（名前とバージョン）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDomain {
    /// ドメイン名
    pub name: String,
    /// ドメインバージョン
    pub version: String,
}

impl Default for AuthorizationDomain {
    fn default() -> Self {
        Self {
            name: DEFAULT_AUTH_DOMAIN_NAME.to_string(),
            version: DEFAULT_AUTH_DOMAIN_VERSION.to_string(),
        }
    }
}

impl AuthorizationDomain {
    /// 環境変数 `AUTH_DOMAIN_NAME` / `AUTH_DOMAIN_VERSION` から読み込む。
    pub fn from_env() -> Self {
        Self {
            name: std::env::var("AUTH_DOMAIN_NAME")
                .unwrap_or_else(|_| DEFAULT_AUTH_DOMAIN_NAME.to_string()),
            version: std::env::var("AUTH_DOMAIN_VERSION")
                .unwrap_or_else(|_| DEFAULT_AUTH_DOMAIN_VERSION.to_string()),
        }
    }

    fn eip712(&self) -> Eip712Domain {
        Eip712Domain {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: None,
            verifying_contract: None,
        }
    }
}

/// 署名対象の認可メッセージ。永続化しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationMessage {
    /// 認可対象のアドレス
    pub address: Address,
    /// 有効期限（Unix秒）
    pub deadline: u64,
}

impl TypedStruct for AuthorizationMessage {
    const TYPE: &'static str = "MoonstreamAuthorization(address address,uint256 deadline)";

    fn encode_fields(&self) -> Vec<[u8; 32]> {
        vec![self.address.to_word(), encode_uint(self.deadline as u128)]
    }
}

impl AuthorizationMessage {
    /// 署名対象ダイジェスト
    pub fn digest(&self, domain: &AuthorizationDomain) -> [u8; 32] {
        eip712::signing_digest(&domain.eip712(), self)
    }
}

/// 署名者のアドレスに対する認可バウチャーを発行する。
pub async fn authorize(
    signer: &dyn Signer,
    domain: &AuthorizationDomain,
    deadline: u64,
) -> Result<AuthorizationPayload, AuthorizationError> {
    let message = AuthorizationMessage {
        address: signer.address(),
        deadline,
    };
    let signature = sign_verified(signer, &message.digest(domain)).await?;
    Ok(AuthorizationPayload {
        address: message.address.to_string(),
        deadline,
        signature: signature.to_hex(),
    })
}

/// 認可バウチャーを検証し、認可されたアドレスを返す。
///
/// `now >= deadline` なら [`AuthorizationError::AuthorizationExpired`]、
/// 復元された署名者が `address` と異なれば [`AuthorizationError::SignerMismatch`]。
pub fn verify(
    payload: &AuthorizationPayload,
    domain: &AuthorizationDomain,
    now: u64,
) -> Result<Address, AuthorizationError> {
    if now >= payload.deadline {
        return Err(AuthorizationError::AuthorizationExpired {
            deadline: payload.deadline,
            now,
        });
    }

    let declared = parse_address(&payload.address)?;
    let signature = parse_signature(&payload.signature)?;
    let message = AuthorizationMessage {
        address: declared,
        deadline: payload.deadline,
    };
    let recovered = recover_address(&message.digest(domain), &signature)
        .map_err(|e| AuthorizationError::MalformedSignature(e.to_string()))?;

    if recovered != declared {
        return Err(AuthorizationError::SignerMismatch {
            declared,
            recovered,
        });
    }
    Ok(declared)
}

/// 現在時刻で検証する。
pub fn verify_now(
    payload: &AuthorizationPayload,
    domain: &AuthorizationDomain,
) -> Result<Address, AuthorizationError> {
    verify(payload, domain, unix_now())
}

/// バウチャーをBase64エンコードされたJSONに変換する。
pub fn encode_payload(payload: &AuthorizationPayload) -> Result<String, AuthorizationError> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| AuthorizationError::InvalidHeader(format!("シリアライズに失敗: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Base64エンコードされたJSONからバウチャーを復元する。
pub fn decode_payload(encoded: &str) -> Result<AuthorizationPayload, AuthorizationError> {
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthorizationError::InvalidHeader(format!("Base64デコードに失敗: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| AuthorizationError::InvalidHeader(format!("JSONのパースに失敗: {e}")))
}

/// `Authorization` ヘッダ値 `moonstream <base64(JSON)>` を構築する。
pub fn encode_header(payload: &AuthorizationPayload) -> Result<String, AuthorizationError> {
    Ok(format!("{AUTH_HEADER_SCHEME} {}", encode_payload(payload)?))
}

/// `Authorization` ヘッダ値を解析する。スキームは大文字小文字を区別しない。
pub fn decode_header(value: &str) -> Result<AuthorizationPayload, AuthorizationError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [scheme, encoded] if scheme.eq_ignore_ascii_case(AUTH_HEADER_SCHEME) => {
            decode_payload(encoded)
        }
        _ => Err(AuthorizationError::InvalidHeader(format!(
            "'{AUTH_HEADER_SCHEME} <base64_encoded_json_payload>' の形式が必要です"
        ))),
    }
}
