//! # 署名サーバーのエラー型
//!
//! 全エンドポイントで共通のエラー型。

use axum::http::StatusCode;

/// 署名サーバーのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum SignerServerError {
    /// 不正なリクエスト（パース失敗、不正なダイジェスト）
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
    /// クライアント認証がない、または期限切れ
    #[error("クライアント認証に失敗: {0}")]
    Unauthorized(String),
    /// クライアント署名が不正
    #[error("{0}")]
    Forbidden(String),
    /// ダイジェスト数が上限を超えている
    #[error("ダイジェスト数が上限を超えています: {0}")]
    PayloadTooLarge(String),
    /// 内部エラー（署名失敗、シリアライズ失敗）
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for SignerServerError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            SignerServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SignerServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SignerServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            SignerServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            SignerServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "リクエストの処理に失敗しました");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "リクエストを拒否しました");
        }
        (status, self.to_string()).into_response()
    }
}
