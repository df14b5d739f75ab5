//! # クライアント認証検証ユーティリティ
//!
//! 署名サーバー側でクライアントのEd25519署名と発行時刻を検証し、
//! リクエスト本文を取り出す。登録されたクライアント（配布エンジン・CLI）からの
//! リクエストのみを受け付ける。

use axum::http::StatusCode;
use base64::Engine;

use dropper_core::signer::channel::{b64, sign_target_bytes};
use dropper_crypto::{Ed25519Signature, Ed25519VerifyingKey};
use dropper_types::{ClientAuthSignTarget, ClientAuthWrapper};

/// 発行時刻の許容幅のデフォルト（秒）
pub const DEFAULT_AUTH_WINDOW_SECS: u64 = 60;

/// クライアント認証を検証し、内部のリクエストボディを返す。
///
/// - `client_pubkey` が `Some` の場合: 認証が必須。署名なしは401、不正署名は403、
///   発行時刻が `now ± window_secs` の外なら401。
/// - `client_pubkey` が `None` の場合: 認証をスキップ（開発環境用）。
///
/// ラッパーの `path` は `expected_path` と一致しなければならない。
pub fn verify_client_auth(
    client_pubkey: Option<&Ed25519VerifyingKey>,
    expected_path: &str,
    body: &serde_json::Value,
    now: u64,
    window_secs: u64,
) -> Result<serde_json::Value, (StatusCode, String)> {
    if body.get("client_signature").is_none() {
        // 直接リクエスト形式
        if client_pubkey.is_some() {
            return Err((
                StatusCode::UNAUTHORIZED,
                "クライアント認証が必要です。client_signatureを含むラッパー形式で送信してください"
                    .to_string(),
            ));
        }
        return Ok(body.clone());
    }

    let wrapper: ClientAuthWrapper = serde_json::from_value(body.clone()).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("ClientAuthWrapperのパースに失敗: {e}"),
        )
    })?;

    let Some(pubkey) = client_pubkey else {
        return Ok(wrapper.body);
    };

    let sign_target = ClientAuthSignTarget {
        method: wrapper.method.clone(),
        path: wrapper.path.clone(),
        body: wrapper.body.clone(),
        issued_at: wrapper.issued_at,
    };
    let sign_bytes = sign_target_bytes(&sign_target).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("署名対象のシリアライズに失敗: {e}"),
        )
    })?;

    let sig_bytes = b64().decode(&wrapper.client_signature).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("client_signatureのBase64デコードに失敗: {e}"),
        )
    })?;
    let sig_arr: [u8; 64] = sig_bytes.try_into().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "client_signatureは64バイトである必要があります".to_string(),
        )
    })?;
    let signature = Ed25519Signature::from_bytes(&sig_arr);

    dropper_crypto::ed25519_verify(pubkey, &sign_bytes, &signature).map_err(|_| {
        (
            StatusCode::FORBIDDEN,
            "クライアント署名の検証に失敗しました".to_string(),
        )
    })?;

    if wrapper.path != expected_path {
        return Err((
            StatusCode::FORBIDDEN,
            format!("署名されたパス {} はこのエンドポイントと一致しません", wrapper.path),
        ));
    }

    if now.abs_diff(wrapper.issued_at) > window_secs {
        return Err((
            StatusCode::UNAUTHORIZED,
            format!(
                "リクエストの発行時刻が許容範囲外です: issued_at={}, now={now}",
                wrapper.issued_at
            ),
        ));
    }

    Ok(wrapper.body)
}
