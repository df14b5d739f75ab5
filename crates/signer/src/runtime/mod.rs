//! # 鍵ランタイム抽象化
//!
//! 署名鍵の保持と署名を抽象化するトレイト。
//! 環境変数 `SIGNER_RUNTIME` で実装を切り替える。
//!
//! 現在のランタイム実装:
//! - `mock`: ローカル開発・テスト用（起動時にメモリ内で鍵生成）
//! - `keystore`: 暗号化keystoreを起動時に復号してメモリ内に保持

pub mod keystore;
pub mod mock;

use dropper_crypto::{Address, CryptoError, Digest32, RecoverableSignature};

/// 鍵ランタイムのトレイト。
pub trait KeyRuntime: Send + Sync {
    /// ランタイム種別（`/info` の `runtime` フィールド）
    fn runtime_type(&self) -> &str;

    /// 署名鍵に対応するアドレス
    fn address(&self) -> Address;

    /// ダイジェストに署名する。
    fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, CryptoError>;
}
