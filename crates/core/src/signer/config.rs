//! # 署名者の設定
//!
//! 環境変数から署名バックエンドを選択する。選択は起動時に一度だけ行う。
//!
//! | 変数 | 用途 |
//! |------|------|
//! | `SIGNER_BACKEND` | `local`（既定）または `remote` |
//! | `SIGNER_KEYSTORE` | keystoreファイルのパス |
//! | `SIGNER_PASSWORD` / `SIGNER_PASSWORD_FILE` | keystoreのパスフレーズ |
//! | `SIGNER_PRIVATE_KEY_FILE` | 生の秘密鍵ファイル（keystoreの代替） |
//! | `REMOTE_SIGNER_URL` | 署名サーバーのベースURL |
//! | `REMOTE_SIGNER_ADDRESS` | 署名インスタンスの鍵アドレス |
//! | `REMOTE_SIGNER_CLIENT_KEY` | チャネル認証用Ed25519秘密鍵（hex） |
//! | `REMOTE_SIGNER_TIMEOUT_SECS` | 1リクエストのタイムアウト（既定10秒） |

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use dropper_crypto::{ed25519_signing_key_from_hex, keystore, Address, Ed25519SigningKey};

use super::{LocalSigner, RemoteSigner, Signer, SignerError};

/// リモート署名のデフォルトタイムアウト（秒）
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// 署名バックエンドの設定。
pub enum SignerConfig {
    /// 暗号化keystore + パスフレーズ
    Keystore {
        /// keystoreファイル
        path: PathBuf,
        /// パスフレーズ
        passphrase: SecretString,
    },
    /// 生の秘密鍵ファイル
    PrivateKeyFile {
        /// 秘密鍵ファイル
        path: PathBuf,
    },
    /// 稼働中の署名インスタンス
    Remote {
        /// ベースURL
        endpoint: String,
        /// 署名インスタンスの鍵アドレス
        address: Address,
        /// チャネル認証用Ed25519秘密鍵
        client_key: Ed25519SigningKey,
        /// 1リクエストのタイムアウト
        timeout: Duration,
    },
}

impl SignerConfig {
    /// 環境変数から設定を読み込む。
    pub fn from_env() -> Result<Self, SignerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の変数ルックアップから設定を読み込む。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SignerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name).ok_or_else(|| SignerError::Config(format!("{name} が設定されていません")))
        };

        let backend = lookup("SIGNER_BACKEND").unwrap_or_else(|| "local".to_string());
        match backend.as_str() {
            "local" => {
                let keystore_path = lookup("SIGNER_KEYSTORE");
                let private_key_path = lookup("SIGNER_PRIVATE_KEY_FILE");
                match (keystore_path, private_key_path) {
                    (Some(path), None) => {
                        let passphrase = match lookup("SIGNER_PASSWORD") {
                            Some(p) => SecretString::from(p),
                            None => {
                                let file = require("SIGNER_PASSWORD_FILE")?;
                                keystore::read_password_file(Path::new(&file))
                                    .map_err(|e| SignerError::Config(e.to_string()))?
                            }
                        };
                        Ok(Self::Keystore {
                            path: path.into(),
                            passphrase,
                        })
                    }
                    (None, Some(path)) => Ok(Self::PrivateKeyFile { path: path.into() }),
                    (Some(_), Some(_)) => Err(SignerError::Config(
                        "SIGNER_KEYSTORE と SIGNER_PRIVATE_KEY_FILE は同時に指定できません".into(),
                    )),
                    (None, None) => Err(SignerError::Config(
                        "SIGNER_KEYSTORE または SIGNER_PRIVATE_KEY_FILE が必要です".into(),
                    )),
                }
            }
            "remote" => {
                let endpoint = require("REMOTE_SIGNER_URL")?;
                let address: Address = require("REMOTE_SIGNER_ADDRESS")?
                    .parse()
                    .map_err(|e: dropper_crypto::CryptoError| SignerError::Config(e.to_string()))?;
                let client_key = ed25519_signing_key_from_hex(&require("REMOTE_SIGNER_CLIENT_KEY")?)
                    .map_err(|e| SignerError::Config(format!("REMOTE_SIGNER_CLIENT_KEY: {e}")))?;
                let timeout_secs = match lookup("REMOTE_SIGNER_TIMEOUT_SECS") {
                    Some(v) => v.parse().map_err(|_| {
                        SignerError::Config(format!("REMOTE_SIGNER_TIMEOUT_SECS が不正です: {v}"))
                    })?,
                    None => DEFAULT_REMOTE_TIMEOUT_SECS,
                };
                Ok(Self::Remote {
                    endpoint,
                    address,
                    client_key,
                    timeout: Duration::from_secs(timeout_secs),
                })
            }
            other => Err(SignerError::Config(format!(
                "SIGNER_BACKEND が不正です: {other}（local または remote）"
            ))),
        }
    }

    /// 設定から署名者を構築する。
    pub fn build(self) -> Result<Box<dyn Signer>, SignerError> {
        match self {
            Self::Keystore { path, passphrase } => {
                Ok(Box::new(LocalSigner::from_keystore(&path, &passphrase)?))
            }
            Self::PrivateKeyFile { path } => Ok(Box::new(LocalSigner::from_private_key_file(&path)?)),
            Self::Remote {
                endpoint,
                address,
                client_key,
                timeout,
            } => {
                tracing::info!(endpoint = %endpoint, address = %address, "リモート署名者を使用します");
                Ok(Box::new(RemoteSigner::new(endpoint, address, client_key, timeout)?))
            }
        }
    }
}
