//! # Dropper 署名サーバー
//!
//! 一時的な署名インスタンス上で動作し、登録されたクライアントからの
//! ダイジェストに署名する。
//!
//! ## 起動シーケンス
//! 1. 鍵ランタイムの初期化（keystoreの復号、またはモック鍵の生成）
//! 2. クライアント認証用公開鍵の読み込み
//! 3. `/sign`, `/batch-sign`, `/info` の受付開始
//!
//! 鍵はメモリ内にのみ保持され、インスタンスの停止とともに失われる。

mod config;
mod endpoints;
mod error;
mod infra;
mod runtime;

use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env()?;
    let state = Arc::new(config.state);
    tracing::info!(
        address = %state.runtime.address(),
        runtime = state.runtime.runtime_type(),
        max_batch_size = state.max_batch_size,
        "署名鍵の準備が完了しました"
    );

    let app = endpoints::router(state);

    tracing::info!("署名サーバーを {} で起動します", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
