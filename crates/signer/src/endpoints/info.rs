//! # /info エンドポイント

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use dropper_types::SignerInfo;

use crate::config::SignerAppState;

/// 鍵アドレスとランタイム情報を返す。認証不要。
pub async fn handle_info(State(state): State<Arc<SignerAppState>>) -> Json<SignerInfo> {
    Json(SignerInfo {
        address: state.runtime.address().to_string(),
        runtime: state.runtime.runtime_type().to_string(),
        max_batch_size: state.max_batch_size,
    })
}
