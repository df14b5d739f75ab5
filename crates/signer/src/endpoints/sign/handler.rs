//! /sign, /batch-sign ハンドラ実装

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use dropper_crypto::{decode_digest, to_hex_prefixed, Digest32};
use dropper_types::{BatchSignRequest, BatchSignResponse, SignRequest, SignResponse};

use crate::config::SignerAppState;
use crate::error::SignerServerError;

fn parse_digest(raw: &str) -> Result<Digest32, SignerServerError> {
    decode_digest(raw).map_err(|e| SignerServerError::BadRequest(format!("ダイジェスト {raw}: {e}")))
}

/// /sign エンドポイントハンドラ。
pub async fn handle_sign(
    State(state): State<Arc<SignerAppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SignResponse>, SignerServerError> {
    let inner_body = state.authenticate("/sign", &body)?;
    let request: SignRequest = serde_json::from_value(inner_body)
        .map_err(|e| SignerServerError::BadRequest(format!("SignRequestのパースに失敗: {e}")))?;

    let digest = parse_digest(&request.digest)?;
    let signature = state
        .runtime
        .sign(&digest)
        .map_err(|e| SignerServerError::Internal(e.to_string()))?;

    tracing::info!(digest = %to_hex_prefixed(&digest), "ダイジェストに署名しました");
    Ok(Json(SignResponse {
        signature: signature.to_hex(),
    }))
}

/// /batch-sign エンドポイントハンドラ。
///
/// レスポンスのキーは正規化したダイジェスト（小文字hex、`0x` 付き）。
pub async fn handle_batch_sign(
    State(state): State<Arc<SignerAppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<BatchSignResponse>, SignerServerError> {
    let inner_body = state.authenticate("/batch-sign", &body)?;
    let request: BatchSignRequest = serde_json::from_value(inner_body).map_err(|e| {
        SignerServerError::BadRequest(format!("BatchSignRequestのパースに失敗: {e}"))
    })?;

    if request.digests.len() > state.max_batch_size {
        return Err(SignerServerError::PayloadTooLarge(format!(
            "{} > {}",
            request.digests.len(),
            state.max_batch_size
        )));
    }

    let mut signatures = BTreeMap::new();
    for raw in &request.digests {
        let digest = parse_digest(raw)?;
        let signature = state
            .runtime
            .sign(&digest)
            .map_err(|e| SignerServerError::Internal(e.to_string()))?;
        signatures.insert(to_hex_prefixed(&digest), signature.to_hex());
    }

    tracing::info!(count = signatures.len(), "一括署名しました");
    Ok(Json(BatchSignResponse { signatures }))
}
