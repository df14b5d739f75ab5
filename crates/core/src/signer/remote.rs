//! # リモート署名者
//!
//! 稼働中の署名インスタンスへダイジェストを転送して署名を得る。
//! インスタンスの起動は行わない。タイムアウトした呼び出しは失敗として返し、
//! 別インスタンスへの再試行はしない。

use std::time::Duration;

use serde::de::DeserializeOwned;

use dropper_crypto::{
    to_hex_prefixed, Address, Digest32, Ed25519SigningKey, RecoverableSignature,
};
use dropper_types::{BatchSignRequest, BatchSignResponse, SignRequest, SignResponse, SignerInfo};

use super::channel::{build_client_auth_wrapper, unix_now};
use super::{ensure_signed_by, Signer, SignerError};

/// 署名インスタンスのHTTPクライアント。
pub struct RemoteSigner {
    /// 署名サーバーのベースURL（例: `http://10.0.0.12:17181`）
    endpoint: String,
    /// 署名インスタンスが保持する鍵のアドレス
    address: Address,
    /// チャネル認証用Ed25519秘密鍵
    client_key: Ed25519SigningKey,
    /// HTTPクライアント（タイムアウト設定済み）
    http_client: reqwest::Client,
}

fn map_transport(e: reqwest::Error) -> SignerError {
    if e.is_timeout() {
        SignerError::Timeout
    } else {
        SignerError::Transport(e.to_string())
    }
}

impl RemoteSigner {
    /// リモート署名者を構築する。`timeout` は1リクエスト全体の上限。
    pub fn new(
        endpoint: impl Into<String>,
        address: Address,
        client_key: Ed25519SigningKey,
        timeout: Duration,
    ) -> Result<Self, SignerError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignerError::Config(format!("HTTPクライアントの構築に失敗: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            address,
            client_key,
            http_client,
        })
    }

    /// 署名サーバーの情報を取得する。
    pub async fn info(&self) -> Result<SignerInfo, SignerError> {
        let url = format!("{}/info", self.endpoint);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(map_transport)?;
        Self::read_json(response).await
    }

    /// 認証ラッパー付きでPOSTし、JSONレスポンスをパースする。
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, SignerError> {
        let wrapper = build_client_auth_wrapper(&self.client_key, "POST", path, body, unix_now())?;

        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .http_client
            .post(&url)
            .json(&wrapper)
            .send()
            .await
            .map_err(map_transport)?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SignerError> {
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(SignerError::Remote {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text)
            .map_err(|e| SignerError::Transport(format!("レスポンスのパースに失敗: {e}")))
    }
}

#[async_trait::async_trait]
impl Signer for RemoteSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, SignerError> {
        let body = serde_json::to_value(SignRequest {
            digest: to_hex_prefixed(digest),
        })
        .map_err(|e| SignerError::Signing(format!("リクエストのシリアライズに失敗: {e}")))?;

        let response: SignResponse = self.post("/sign", body).await?;
        let signature = RecoverableSignature::from_hex(&response.signature)
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
        ensure_signed_by(digest, &signature, self.address)?;
        Ok(signature)
    }

    async fn batch_sign(
        &self,
        digests: &[Digest32],
    ) -> Result<Vec<RecoverableSignature>, SignerError> {
        let body = serde_json::to_value(BatchSignRequest {
            digests: digests.iter().map(|d| to_hex_prefixed(d)).collect(),
        })
        .map_err(|e| SignerError::Signing(format!("リクエストのシリアライズに失敗: {e}")))?;

        let response: BatchSignResponse = self.post("/batch-sign", body).await?;
        tracing::debug!(count = digests.len(), "リモート一括署名を受信");

        digests
            .iter()
            .map(|digest| {
                let key = to_hex_prefixed(digest);
                let raw = response.signatures.get(&key).ok_or_else(|| {
                    SignerError::InvalidSignature(format!("{key} の署名が応答に含まれていません"))
                })?;
                let signature = RecoverableSignature::from_hex(raw)
                    .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
                ensure_signed_by(digest, &signature, self.address)?;
                Ok(signature)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::routing::post;
    use axum::Json;
    use dropper_crypto::{decode_digest, keccak256, sign_digest, signer_address, Secp256k1SigningKey};
    use dropper_types::ClientAuthWrapper;

    /// 受け取ったダイジェストを `key` で署名して返すモック署名サーバー。
    async fn start_mock_signer(key: Secp256k1SigningKey, delay: Duration) -> u16 {
        let key = Arc::new(key);
        let sign_key = key.clone();
        let app = axum::Router::new()
            .route(
                "/sign",
                post(move |Json(wrapper): Json<ClientAuthWrapper>| {
                    let key = sign_key.clone();
                    async move {
                        tokio::time::sleep(delay).await;
                        let req: SignRequest = serde_json::from_value(wrapper.body).unwrap();
                        let digest = decode_digest(&req.digest).unwrap();
                        let sig = sign_digest(&key, &digest).unwrap();
                        Json(SignResponse {
                            signature: sig.to_hex(),
                        })
                    }
                }),
            )
            .route(
                "/batch-sign",
                post(move |Json(wrapper): Json<ClientAuthWrapper>| {
                    let key = key.clone();
                    async move {
                        let req: BatchSignRequest = serde_json::from_value(wrapper.body).unwrap();
                        let mut signatures = BTreeMap::new();
                        for d in req.digests {
                            let digest = decode_digest(&d).unwrap();
                            signatures.insert(d, sign_digest(&key, &digest).unwrap().to_hex());
                        }
                        Json(BatchSignResponse { signatures })
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        port
    }

    fn client_key() -> Ed25519SigningKey {
        Ed25519SigningKey::generate(&mut rand::rngs::OsRng)
    }

    #[tokio::test]
    async fn test_remote_sign_roundtrip() {
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        let address = signer_address(&key);
        let port = start_mock_signer(key, Duration::ZERO).await;

        let signer = RemoteSigner::new(
            format!("http://127.0.0.1:{port}/"),
            address,
            client_key(),
            Duration::from_secs(5),
        )
        .unwrap();

        let digest = keccak256(b"remote");
        let sig = signer.sign(&digest).await.unwrap();
        assert_eq!(dropper_crypto::recover_address(&digest, &sig).unwrap(), address);
    }

    #[tokio::test]
    async fn test_remote_batch_sign() {
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        let address = signer_address(&key);
        let port = start_mock_signer(key, Duration::ZERO).await;
        let signer = RemoteSigner::new(
            format!("http://127.0.0.1:{port}"),
            address,
            client_key(),
            Duration::from_secs(5),
        )
        .unwrap();

        let digests = vec![keccak256(b"a"), keccak256(b"b")];
        let sigs = signer.batch_sign(&digests).await.unwrap();
        assert_eq!(sigs.len(), 2);
    }

    /// インスタンスが宣言と異なる鍵を持っている場合はハードエラー
    #[tokio::test]
    async fn test_remote_sign_rejects_unexpected_key() {
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        let port = start_mock_signer(key, Duration::ZERO).await;
        let signer = RemoteSigner::new(
            format!("http://127.0.0.1:{port}"),
            Address::from_bytes([0x42; 20]),
            client_key(),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = signer.sign(&keccak256(b"x")).await;
        assert!(matches!(result, Err(SignerError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_remote_sign_timeout() {
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        let address = signer_address(&key);
        let port = start_mock_signer(key, Duration::from_secs(2)).await;
        let signer = RemoteSigner::new(
            format!("http://127.0.0.1:{port}"),
            address,
            client_key(),
            Duration::from_millis(200),
        )
        .unwrap();

        let result = signer.sign(&keccak256(b"slow")).await;
        assert!(matches!(result, Err(SignerError::Timeout)));
    }

    #[tokio::test]
    async fn test_remote_sign_unreachable() {
        let signer = RemoteSigner::new(
            "http://127.0.0.1:1",
            Address::default(),
            client_key(),
            Duration::from_secs(2),
        )
        .unwrap();
        let result = signer.sign(&keccak256(b"x")).await;
        assert!(matches!(
            result,
            Err(SignerError::Transport(_)) | Err(SignerError::Timeout)
        ));
    }
}
