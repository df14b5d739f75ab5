//! # チェーン連携
//!
//! Dropper / Lootbox コントラクトへのバッチ配布トランザクションを送信する。
//! ノード側で管理されたアカウントから `eth_sendTransaction` で送信し、
//! レシートをポーリングして確定を待つ。
//!
//! 汎用のノードRPCクライアントではなく、配布に必要な呼び出しのみを扱う。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use dropper_crypto::eip712::encode_uint;
use dropper_crypto::{keccak256, to_hex_prefixed, Address};
use dropper_types::DistributionId;

use crate::distribution::{BatchMinter, MintError, TxStatus};

/// バッチ配布関数のシグネチャ
pub const BATCH_MINT_SIGNATURE: &str = "batchMintLootboxesConstant(uint256,address[],uint256)";

/// レシートのポーリング間隔のデフォルト
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// レシート待機のタイムアウトのデフォルト
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// JSON-RPCのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// 通信に失敗
    #[error("JSON-RPCの通信に失敗: {0}")]
    Transport(String),
    /// ノードがエラーを返した
    #[error("JSON-RPCエラー {code}: {message}")]
    Rpc {
        /// エラーコード
        code: i64,
        /// メッセージ
        message: String,
    },
    /// レスポンスの形式が不正
    #[error("JSON-RPCレスポンスが不正です: {0}")]
    InvalidResponse(String),
}

/// 関数セレクタ（シグネチャのkeccak256の先頭4バイト）
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `batchMintLootboxesConstant(uint256,address[],uint256)` のcalldataを組み立てる。
pub fn encode_batch_mint(
    distribution_id: DistributionId,
    recipients: &[Address],
    amount: u128,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * (4 + recipients.len()));
    data.extend_from_slice(&selector(BATCH_MINT_SIGNATURE));
    data.extend_from_slice(&encode_uint(distribution_id as u128));
    // 動的配列はヘッダ3ワードの後ろに置く
    data.extend_from_slice(&encode_uint(0x60));
    data.extend_from_slice(&encode_uint(amount));
    data.extend_from_slice(&encode_uint(recipients.len() as u128));
    for recipient in recipients {
        data.extend_from_slice(&recipient.to_word());
    }
    data
}

fn parse_quantity(value: &str) -> Result<u64, RpcError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| RpcError::InvalidResponse(format!("数値として解釈できません: {value}")))
}

// ---------------------------------------------------------------------------
// クライアント
// ---------------------------------------------------------------------------

/// 最小限のJSON-RPCクライアント。
pub struct JsonRpcClient {
    url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// クライアントを構築する。
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(format!("HTTPクライアントの構築に失敗: {e}")))?;
        Ok(Self {
            url: url.into(),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    /// JSON-RPCメソッドを呼び出す。
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("レスポンスのパースに失敗: {e}")))?;

        if let Some(error) = body.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse("resultがありません".to_string()))?;
        serde_json::from_value(result).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// 現在のブロック番号
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&hex)
    }

    /// ノード管理アカウントからトランザクションを送信し、ハッシュを返す。
    pub async fn send_transaction(
        &self,
        from: &Address,
        to: &Address,
        data: &[u8],
    ) -> Result<String, RpcError> {
        self.call(
            "eth_sendTransaction",
            json!([{
                "from": from.to_string(),
                "to": to.to_string(),
                "data": to_hex_prefixed(data),
            }]),
        )
        .await
    }

    /// トランザクションのレシート（未確定なら `None`）
    pub async fn transaction_receipt(&self, tx: &str) -> Result<Option<Value>, RpcError> {
        self.call("eth_getTransactionReceipt", json!([tx])).await
    }
}

// ---------------------------------------------------------------------------
// ミンター
// ---------------------------------------------------------------------------

/// JSON-RPC経由のバッチ配布。
pub struct JsonRpcMinter {
    client: JsonRpcClient,
    contract: Address,
    from: Address,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcMinter {
    /// ミンターを構築する。`from` はノードが署名できるアカウント。
    pub fn new(client: JsonRpcClient, contract: Address, from: Address) -> Self {
        Self {
            client,
            contract,
            from,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }

    /// レシート待機の間隔とタイムアウトを変更する。
    pub fn with_receipt_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.receipt_timeout = timeout;
        self
    }

    async fn wait_for_receipt(&self, tx: &str) -> Result<Value, MintError> {
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self.client.transaction_receipt(tx).await.map_err(|e| {
                MintError::ReceiptUnavailable {
                    tx: tx.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MintError::ReceiptTimeout { tx: tx.to_string() });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait::async_trait]
impl BatchMinter for JsonRpcMinter {
    async fn batch_mint(
        &self,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
    ) -> Result<String, MintError> {
        let data = encode_batch_mint(distribution_id, recipients, amount);
        let tx = self
            .client
            .send_transaction(&self.from, &self.contract, &data)
            .await
            .map_err(|e| MintError::Submit(e.to_string()))?;
        tracing::debug!(tx = %tx, distribution_id, "トランザクションを送信しました");

        let receipt = self.wait_for_receipt(&tx).await?;
        match receipt_status(&receipt) {
            TxStatus::Confirmed => Ok(tx),
            _ => Err(MintError::Reverted { tx }),
        }
    }

    async fn tx_status(&self, tx: &str) -> Result<TxStatus, MintError> {
        let receipt = self.client.transaction_receipt(tx).await.map_err(|e| {
            MintError::ReceiptUnavailable {
                tx: tx.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(receipt.as_ref().map_or(TxStatus::Pending, receipt_status))
    }
}

fn receipt_status(receipt: &Value) -> TxStatus {
    match receipt.get("status").and_then(Value::as_str) {
        Some("0x1") => TxStatus::Confirmed,
        _ => TxStatus::Reverted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const CONTRACT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const FROM: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    /// テスト用JSON-RPCノードを起動する。`handler` はメソッド名とparamsからレスポンス全体を返す。
    async fn start_mock_node<F>(handler: F) -> (u16, Arc<Mutex<Vec<Value>>>)
    where
        F: Fn(&str, &Value) -> Value + Clone + Send + Sync + 'static,
    {
        use axum::routing::post;

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let app = axum::Router::new().route(
            "/",
            post(move |axum::Json(request): axum::Json<Value>| {
                let handler = handler.clone();
                let recorded = recorded.clone();
                async move {
                    let method = request["method"].as_str().unwrap_or_default().to_string();
                    let mut response = handler(&method, &request["params"]);
                    response["jsonrpc"] = json!("2.0");
                    response["id"] = request["id"].clone();
                    recorded.lock().unwrap().push(request);
                    axum::Json(response)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        (port, requests)
    }

    fn minter(port: u16) -> JsonRpcMinter {
        let client =
            JsonRpcClient::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(5)).unwrap();
        JsonRpcMinter::new(client, CONTRACT.parse().unwrap(), FROM.parse().unwrap())
            .with_receipt_polling(Duration::from_millis(10), Duration::from_millis(200))
    }

    #[test]
    fn test_encode_batch_mint_layout() {
        let a: Address = CONTRACT.parse().unwrap();
        let b: Address = FROM.parse().unwrap();
        let data = encode_batch_mint(7, &[a, b], 5);

        assert_eq!(data.len(), 4 + 32 * 6);
        assert_eq!(&data[..4], &keccak256(BATCH_MINT_SIGNATURE.as_bytes())[..4]);
        assert_eq!(data[4 + 31], 7);
        assert_eq!(data[4 + 32 + 31], 0x60);
        assert_eq!(data[4 + 64 + 31], 5);
        assert_eq!(data[4 + 96 + 31], 2);
        assert_eq!(&data[4 + 128 + 12..4 + 160], a.as_bytes());
        assert_eq!(&data[4 + 160 + 12..], b.as_bytes());
    }

    #[tokio::test]
    async fn test_batch_mint_waits_for_receipt() {
        let polls = Arc::new(Mutex::new(0u32));
        let counter = polls.clone();
        let (port, requests) = start_mock_node(move |method, _| match method {
            "eth_sendTransaction" => json!({"result": "0xabc"}),
            "eth_getTransactionReceipt" => {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n < 2 {
                    json!({"result": null})
                } else {
                    json!({"result": {"status": "0x1", "transactionHash": "0xabc"}})
                }
            }
            _ => json!({"error": {"code": -32601, "message": "method not found"}}),
        })
        .await;

        let recipient: Address = FROM.parse().unwrap();
        let tx = minter(port).batch_mint(3, &[recipient], 5).await.unwrap();
        assert_eq!(tx, "0xabc");

        let requests = requests.lock().unwrap();
        let send = &requests[0];
        assert_eq!(send["method"], "eth_sendTransaction");
        assert_eq!(send["params"][0]["to"], CONTRACT);
        let data = send["params"][0]["data"].as_str().unwrap();
        assert_eq!(data, to_hex_prefixed(&encode_batch_mint(3, &[recipient], 5)));
        assert_eq!(*polls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_mint_error() {
        let (port, _) = start_mock_node(|method, _| match method {
            "eth_sendTransaction" => json!({"result": "0xdef"}),
            _ => json!({"result": {"status": "0x0"}}),
        })
        .await;

        let result = minter(port).batch_mint(1, &[FROM.parse().unwrap()], 1).await;
        assert!(matches!(result, Err(MintError::Reverted { tx }) if tx == "0xdef"));
    }

    /// 残高不足などのノードエラーは送信失敗として返る
    #[tokio::test]
    async fn test_rpc_error_is_submit_error() {
        let (port, _) = start_mock_node(|_, _| {
            json!({"error": {"code": -32000, "message": "insufficient funds for gas"}})
        })
        .await;

        let result = minter(port).batch_mint(1, &[FROM.parse().unwrap()], 1).await;
        match result {
            Err(MintError::Submit(message)) => assert!(message.contains("insufficient funds")),
            other => panic!("送信失敗になるはず: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_receipt_timeout() {
        let (port, _) = start_mock_node(|method, _| match method {
            "eth_sendTransaction" => json!({"result": "0x123"}),
            _ => json!({"result": null}),
        })
        .await;

        let result = minter(port).batch_mint(1, &[FROM.parse().unwrap()], 1).await;
        assert!(matches!(result, Err(MintError::ReceiptTimeout { .. })));
    }

    /// レシート取得のRPCエラーはトランザクションハッシュを保持する
    #[tokio::test]
    async fn test_receipt_rpc_error_keeps_tx() {
        let (port, _) = start_mock_node(|method, _| match method {
            "eth_sendTransaction" => json!({"result": "0x456"}),
            _ => json!({"error": {"code": -32603, "message": "internal error"}}),
        })
        .await;

        let result = minter(port).batch_mint(1, &[FROM.parse().unwrap()], 1).await;
        let error = result.unwrap_err();
        assert!(matches!(&error, MintError::ReceiptUnavailable { tx, .. } if tx == "0x456"));
        assert_eq!(error.pending_tx(), Some("0x456"));
    }

    #[tokio::test]
    async fn test_tx_status_from_receipt() {
        let (port, requests) = start_mock_node(|_, params| match params[0].as_str() {
            Some("0xok") => json!({"result": {"status": "0x1"}}),
            Some("0xbad") => json!({"result": {"status": "0x0"}}),
            _ => json!({"result": null}),
        })
        .await;

        let minter = minter(port);
        assert_eq!(minter.tx_status("0xok").await.unwrap(), TxStatus::Confirmed);
        assert_eq!(minter.tx_status("0xbad").await.unwrap(), TxStatus::Reverted);
        assert_eq!(minter.tx_status("0xnone").await.unwrap(), TxStatus::Pending);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests
            .iter()
            .all(|r| r["method"] == "eth_getTransactionReceipt"));
    }

    #[tokio::test]
    async fn test_block_number() {
        let (port, _) = start_mock_node(|_, _| json!({"result": "0x2625a00"})).await;
        let client =
            JsonRpcClient::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(5)).unwrap();
        assert_eq!(client.block_number().await.unwrap(), 40_000_000);
    }
}
