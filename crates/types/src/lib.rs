//! # Dropper 共有型定義
//!
//! 署名サーバー・CLI・配布エンジンの間で受け渡されるデータ構造を
//! Rust構造体として提供する。
//!
//! ## エンコーディング規則
//! - Hex（`0x` 接頭辞付き）: Ethereumアドレス、ダイジェスト、secp256k1署名
//! - Base64: Ed25519チャネル署名、Authorizationヘッダ
//! - 10進整数: 数量・ID・期限（JSONの数値として表現）

use serde::{Deserialize, Serialize};

/// 配布ID（オンチェーンのアイテム種別ID）。
pub type DistributionId = u64;

// ---------------------------------------------------------------------------
// 認可バウチャー
// ---------------------------------------------------------------------------

/// 汎用認可バウチャー。`authorize` の出力であり、`verify` の入力。
///
/// `Authorization: moonstream <base64(JSON)>` ヘッダとして送信される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationPayload {
    /// 署名者として宣言されたアドレス（EIP-55形式）
    pub address: String,
    /// 有効期限（Unix秒）
    pub deadline: u64,
    /// 65バイトの復元可能署名（hex、`v` は27/28）
    #[serde(alias = "signed_message")]
    pub signature: String,
}

/// クレームバウチャー。Dropperコントラクトの `claim` にそのまま渡せる形式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimVoucher {
    /// 受取人アドレス（EIP-55形式）
    pub claimant_address: String,
    /// 受取数量
    pub amount: u128,
    /// クレームID（0.2.0 ではドロップID）
    pub claim_id: u64,
    /// リクエストID（ドメインバージョン 0.2.0 のみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u128>,
    /// 有効期限（ブロック番号）
    #[serde(alias = "claim_block_deadline")]
    pub block_deadline: u64,
    /// 65バイトの復元可能署名（hex）
    pub signature: String,
}

// ---------------------------------------------------------------------------
// 署名サーバー API
// ---------------------------------------------------------------------------

/// POST /sign のリクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    /// 署名対象の32バイトダイジェスト（hex）
    pub digest: String,
}

/// POST /sign のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    /// 65バイトの復元可能署名（hex）
    pub signature: String,
}

/// POST /batch-sign のリクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSignRequest {
    /// 署名対象ダイジェストの一覧（hex）
    pub digests: Vec<String>,
}

/// POST /batch-sign のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSignResponse {
    /// ダイジェスト（hex）→ 署名（hex）
    pub signatures: std::collections::BTreeMap<String, String>,
}

/// GET /info のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerInfo {
    /// 署名鍵に対応するアドレス（EIP-55形式）
    pub address: String,
    /// 鍵ランタイム種別（"keystore" or "mock"）
    pub runtime: String,
    /// 1リクエストあたりの最大ダイジェスト数
    pub max_batch_size: usize,
}

// ---------------------------------------------------------------------------
// クライアント認証チャネル
// ---------------------------------------------------------------------------

/// クライアント認証の署名対象。
/// `client_signature` を除いた部分をJSONシリアライズしたバイト列に署名する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthSignTarget {
    /// HTTPメソッド
    pub method: String,
    /// リクエストパス
    pub path: String,
    /// リクエストボディ
    pub body: serde_json::Value,
    /// 発行時刻（Unix秒）
    pub issued_at: u64,
}

/// 署名サーバーへ送るリクエストのラッパー。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthWrapper {
    /// HTTPメソッド
    pub method: String,
    /// リクエストパス
    pub path: String,
    /// リクエストボディ
    pub body: serde_json::Value,
    /// 発行時刻（Unix秒）
    pub issued_at: u64,
    /// Base64エンコードされたEd25519署名
    pub client_signature: String,
}

// ---------------------------------------------------------------------------
// 署名インスタンスのライフサイクル
// ---------------------------------------------------------------------------

/// 署名インスタンスの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// 存在しない
    Absent,
    /// 起動中
    Starting,
    /// 稼働中
    Running,
    /// 停止処理中
    Stopping,
    /// 終了済み
    Terminated,
}

/// 署名インスタンスの概要。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInstanceInfo {
    /// クラウド側のインスタンスID
    pub instance_id: String,
    /// 現在の状態
    pub state: InstanceState,
    /// プライベートIPアドレス（起動直後は未割り当ての場合あり）
    pub private_ip_address: Option<String>,
    /// 起動時刻（RFC 3339）
    pub launch_time: Option<String>,
}

/// `signer wakeup` / `signer sleep` の出力。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesResponse {
    /// 対象となったインスタンスID
    pub instances: Vec<String>,
}

/// `signer list` の出力。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceListResponse {
    /// 稼働中の署名インスタンス
    pub instances: Vec<SigningInstanceInfo>,
}

// ---------------------------------------------------------------------------
// 配布スナップショット
// ---------------------------------------------------------------------------

/// チェックポイントの1エントリ。JSONでは `[quantity, tx_reference]`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry(pub u128, pub String);

/// エラーログの1エントリ。JSONでは `[distribution_id, [recipients...], quantity]`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry(pub DistributionId, pub Vec<String>, pub u128);

/// 配布ジョブの実行結果サマリ。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// 成功したバッチ数
    pub batches_succeeded: usize,
    /// 失敗したバッチ数
    pub batches_failed: usize,
    /// 配布済みとして記録された（受取人, 数量）の合計数量
    pub quantity_delivered: u128,
}
