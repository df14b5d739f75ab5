//! # 署名バックエンド
//!
//! 準備済みの32バイトダイジェストに対して、管理下の鍵で復元可能署名を付与する。
//!
//! 実装:
//! - `local`: 暗号化keystore（または生の秘密鍵ファイル）から読み込んだ鍵で署名
//! - `remote`: 稼働中の署名インスタンスへ認証付きチャネルで転送
//!
//! 実装は起動時に [`config::SignerConfig`] から一度だけ選択される。

pub mod channel;
pub mod config;
pub mod local;
pub mod remote;

use dropper_crypto::{recover_address, Address, Digest32, RecoverableSignature};

pub use config::SignerConfig;
pub use local::LocalSigner;
pub use remote::RemoteSigner;

/// 署名バックエンドのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// 署名処理そのものに失敗
    #[error("署名に失敗: {0}")]
    Signing(String),
    /// 署名が不正（形式不正、または宣言された署名者に復元されない）。再試行しない。
    #[error("不正な署名: {0}")]
    InvalidSignature(String),
    /// リモート署名者への送信に失敗
    #[error("リモート署名者への送信に失敗: {0}")]
    Transport(String),
    /// リモート署名者が制限時間内に応答しなかった
    #[error("リモート署名者がタイムアウトしました")]
    Timeout,
    /// リモート署名者がエラーを返した
    #[error("リモート署名者がエラーを返しました: HTTP {status} - {body}")]
    Remote {
        /// HTTPステータス
        status: u16,
        /// レスポンス本文
        body: String,
    },
    /// 署名者の設定が不正
    #[error("署名者の設定が不正: {0}")]
    Config(String),
}

/// 署名バックエンドのトレイト。
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    /// 署名鍵に対応するアドレス。
    fn address(&self) -> Address;

    /// ダイジェストに署名する。
    async fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, SignerError>;

    /// 複数のダイジェストに署名する。結果は入力と同じ順序で返す。
    async fn batch_sign(
        &self,
        digests: &[Digest32],
    ) -> Result<Vec<RecoverableSignature>, SignerError> {
        let mut signatures = Vec::with_capacity(digests.len());
        for digest in digests {
            signatures.push(self.sign(digest).await?);
        }
        Ok(signatures)
    }
}

/// 署名が `expected` に復元されることを確認する。
pub fn ensure_signed_by(
    digest: &Digest32,
    signature: &RecoverableSignature,
    expected: Address,
) -> Result<(), SignerError> {
    let recovered = recover_address(digest, signature)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    if recovered != expected {
        return Err(SignerError::InvalidSignature(format!(
            "署名者 {expected} ではなく {recovered} に復元されました"
        )));
    }
    Ok(())
}

/// 署名し、宣言された署名者に復元されることを確認してから返す。
pub async fn sign_verified(
    signer: &dyn Signer,
    digest: &Digest32,
) -> Result<RecoverableSignature, SignerError> {
    let signature = signer.sign(digest).await?;
    ensure_signed_by(digest, &signature, signer.address())?;
    Ok(signature)
}

/// 一括署名し、全署名を検証してから返す。
pub async fn batch_sign_verified(
    signer: &dyn Signer,
    digests: &[Digest32],
) -> Result<Vec<RecoverableSignature>, SignerError> {
    let signatures = signer.batch_sign(digests).await?;
    if signatures.len() != digests.len() {
        return Err(SignerError::InvalidSignature(format!(
            "署名数が一致しません: 要求 {}, 応答 {}",
            digests.len(),
            signatures.len()
        )));
    }
    let address = signer.address();
    for (digest, signature) in digests.iter().zip(&signatures) {
        ensure_signed_by(digest, signature, address)?;
    }
    Ok(signatures)
}
