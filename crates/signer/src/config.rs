//! # 署名サーバーの設定・共有状態
//!
//! | 変数 | 用途 |
//! |------|------|
//! | `SIGNER_RUNTIME` | `keystore`（既定）または `mock` |
//! | `SIGNER_KEYSTORE` | keystoreファイルのパス |
//! | `SIGNER_PASSWORD` / `SIGNER_PASSWORD_FILE` | keystoreのパスフレーズ |
//! | `SIGNER_CLIENT_PUBKEY` | クライアント認証用Ed25519公開鍵（hex）。未設定なら認証をスキップ |
//! | `SIGNER_BIND_ADDR` | 待ち受けアドレス（既定 `0.0.0.0:17181`） |
//! | `SIGNER_MAX_BATCH` | `/batch-sign` の最大ダイジェスト数（既定 1000） |
//! | `SIGNER_AUTH_WINDOW_SECS` | クライアント認証の発行時刻許容幅（既定 60秒） |

use std::path::Path;

use anyhow::Context;
use axum::http::StatusCode;
use secrecy::SecretString;

use dropper_core::signer::channel::unix_now;
use dropper_crypto::{ed25519_verifying_key_from_hex, keystore, Ed25519VerifyingKey};

use crate::error::SignerServerError;
use crate::infra::client_auth::{verify_client_auth, DEFAULT_AUTH_WINDOW_SECS};
use crate::runtime::keystore::KeystoreRuntime;
use crate::runtime::mock::MockRuntime;
use crate::runtime::KeyRuntime;

/// 既定の待ち受けアドレス
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:17181";

/// `/batch-sign` の最大ダイジェスト数の既定値
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// 署名サーバーの共有状態。
pub struct SignerAppState {
    /// 鍵ランタイム実装
    pub runtime: Box<dyn KeyRuntime>,
    /// クライアント認証用Ed25519公開鍵。
    /// Noneの場合はクライアント認証をスキップ（開発環境用）
    pub client_pubkey: Option<Ed25519VerifyingKey>,
    /// `/batch-sign` の最大ダイジェスト数
    pub max_batch_size: usize,
    /// クライアント認証の発行時刻許容幅（秒）
    pub auth_window_secs: u64,
}

impl SignerAppState {
    /// クライアント認証を検証し、リクエスト本文を返す。
    pub fn authenticate(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, SignerServerError> {
        verify_client_auth(
            self.client_pubkey.as_ref(),
            path,
            body,
            unix_now(),
            self.auth_window_secs,
        )
        .map_err(|(status, msg)| match status {
            StatusCode::FORBIDDEN => SignerServerError::Forbidden(msg),
            StatusCode::BAD_REQUEST => SignerServerError::BadRequest(msg),
            StatusCode::INTERNAL_SERVER_ERROR => SignerServerError::Internal(msg),
            _ => SignerServerError::Unauthorized(msg),
        })
    }
}

/// 環境変数から読み込んだサーバー設定。
pub struct ServerConfig {
    /// 待ち受けアドレス
    pub bind_addr: String,
    /// 共有状態
    pub state: SignerAppState,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} が不正です: {v}")),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// 環境変数から設定を読み込み、鍵ランタイムを初期化する。
    pub fn from_env() -> anyhow::Result<Self> {
        // ランタイム選択: SIGNER_RUNTIME=mock ならモック、それ以外はkeystore
        let runtime: Box<dyn KeyRuntime> =
            if std::env::var("SIGNER_RUNTIME").unwrap_or_default() == "mock" {
                tracing::info!("MockRuntimeで起動します");
                Box::new(MockRuntime::new())
            } else {
                tracing::info!("KeystoreRuntimeで起動します");
                let path = std::env::var("SIGNER_KEYSTORE")
                    .context("SIGNER_KEYSTORE が設定されていません")?;
                let passphrase = match std::env::var("SIGNER_PASSWORD") {
                    Ok(p) => SecretString::from(p),
                    Err(_) => {
                        let file = std::env::var("SIGNER_PASSWORD_FILE").context(
                            "SIGNER_PASSWORD または SIGNER_PASSWORD_FILE が設定されていません",
                        )?;
                        keystore::read_password_file(Path::new(&file))?
                    }
                };
                Box::new(KeystoreRuntime::open(Path::new(&path), &passphrase)?)
            };

        let client_pubkey = match std::env::var("SIGNER_CLIENT_PUBKEY") {
            Ok(hex) => Some(
                ed25519_verifying_key_from_hex(&hex)
                    .context("SIGNER_CLIENT_PUBKEY のデコードに失敗")?,
            ),
            Err(_) => {
                tracing::warn!("SIGNER_CLIENT_PUBKEY が未設定のためクライアント認証を行いません");
                None
            }
        };

        Ok(Self {
            bind_addr: std::env::var("SIGNER_BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            state: SignerAppState {
                runtime,
                client_pubkey,
                max_batch_size: env_or("SIGNER_MAX_BATCH", DEFAULT_MAX_BATCH_SIZE)?,
                auth_window_secs: env_or("SIGNER_AUTH_WINDOW_SECS", DEFAULT_AUTH_WINDOW_SECS)?,
            },
        })
    }
}
