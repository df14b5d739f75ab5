//! # エンドポイントテスト用共通ヘルパー

use std::sync::Arc;

use crate::config::SignerAppState;
use crate::infra::client_auth::DEFAULT_AUTH_WINDOW_SECS;
use crate::runtime::mock::MockRuntime;

/// モックランタイムの共有状態を構築する。
pub fn mock_state(
    client_pubkey: Option<dropper_crypto::Ed25519VerifyingKey>,
    max_batch_size: usize,
) -> Arc<SignerAppState> {
    Arc::new(SignerAppState {
        runtime: Box::new(MockRuntime::new()),
        client_pubkey,
        max_batch_size,
        auth_window_secs: DEFAULT_AUTH_WINDOW_SECS,
    })
}

/// テスト用に署名サーバーを起動し、ポート番号を返す。
pub async fn start_signer_server(state: Arc<SignerAppState>) -> u16 {
    let app = super::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    port
}
