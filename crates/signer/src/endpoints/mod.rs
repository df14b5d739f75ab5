//! # 署名サーバーのエンドポイント
//!
//! | メソッド | パス | 内容 |
//! |---------|------|------|
//! | POST | `/sign` | ダイジェスト1件に署名 |
//! | POST | `/batch-sign` | 複数ダイジェストに一括署名 |
//! | GET | `/info` | 鍵アドレスとランタイム情報 |

pub mod info;
pub mod sign;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use crate::config::SignerAppState;

pub use info::handle_info;
pub use sign::{handle_batch_sign, handle_sign};

/// ルーターを構築する。
pub fn router(state: Arc<SignerAppState>) -> axum::Router {
    axum::Router::new()
        .route("/sign", axum::routing::post(handle_sign))
        .route("/batch-sign", axum::routing::post(handle_batch_sign))
        .route("/info", axum::routing::get(handle_info))
        .with_state(state)
}
