//! # 署名サーバー向けクライアント認証
//!
//! リクエスト内容と発行時刻をクライアントのEd25519秘密鍵で署名し、
//! [`ClientAuthWrapper`] として送信する。

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use dropper_crypto::{ed25519_sign, Ed25519SigningKey};
use dropper_types::{ClientAuthSignTarget, ClientAuthWrapper};

use super::SignerError;

/// Base64エンジン（Standard）
pub fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// 現在のUnix時刻（秒）
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// 署名対象のバイト列。サーバー側の検証でも同じ関数を使う。
pub fn sign_target_bytes(target: &ClientAuthSignTarget) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(target)
}

/// クライアント認証ラッパーを構築する。
pub fn build_client_auth_wrapper(
    signing_key: &Ed25519SigningKey,
    method: &str,
    path: &str,
    body: serde_json::Value,
    issued_at: u64,
) -> Result<ClientAuthWrapper, SignerError> {
    let sign_target = ClientAuthSignTarget {
        method: method.to_string(),
        path: path.to_string(),
        body: body.clone(),
        issued_at,
    };

    let sign_bytes = sign_target_bytes(&sign_target)
        .map_err(|e| SignerError::Signing(format!("署名対象のシリアライズに失敗: {e}")))?;

    let signature = ed25519_sign(signing_key, &sign_bytes);

    Ok(ClientAuthWrapper {
        method: method.to_string(),
        path: path.to_string(),
        body,
        issued_at,
        client_signature: b64().encode(signature.to_bytes()),
    })
}
