//! # 署名インスタンスのライフサイクル管理
//!
//! 秘密鍵をメモリ上に保持する一時的な署名インスタンスの起動・停止を行う。
//!
//! ## 安全策
//! - `confirmed=false` の呼び出しはクラウドAPIを一切呼ばない
//! - `dry_run=true` は権限検証のみを行い、結果は必ず [`LifecycleError::DryRun`] で返す
//! - 停止対象として解決されたインスタンスが2台以上なら何も停止しない
//!
//! 自動リトライは行わない。

pub mod config;
pub mod provider;

use std::fmt;

use dropper_types::SigningInstanceInfo;

pub use config::{LifecycleConfig, ProviderKind};
pub use provider::{ComputeProvider, MockProvider, ProviderError};

#[cfg(feature = "vendor-aws")]
pub use provider::Ec2Provider;

/// 1回の `sleep` で停止できるインスタンス数の上限
pub const TERMINATION_LIMIT: usize = 1;

/// ドライランの結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunOutcome {
    /// 本実行すれば成功する
    WouldSucceed,
    /// 権限がない
    PermissionDenied,
    /// その他の失敗
    Failed(String),
}

impl fmt::Display for DryRunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldSucceed => write!(f, "本実行は成功する見込みです"),
            Self::PermissionDenied => write!(f, "権限がありません"),
            Self::Failed(reason) => write!(f, "失敗: {reason}"),
        }
    }
}

impl From<ProviderError> for DryRunOutcome {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::DryRunOperation => Self::WouldSucceed,
            ProviderError::Unauthorized(_) => Self::PermissionDenied,
            ProviderError::Api(reason) => Self::Failed(reason),
        }
    }
}

/// ライフサイクル操作のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// 確認フラグなしで呼ばれた（何もしていない）
    #[error("確認されていないため実行しません（--confirmed が必要です）")]
    NotConfirmed,
    /// ドライランの結果（状態は変更していない）
    #[error("ドライラン: {0}")]
    DryRun(DryRunOutcome),
    /// 停止対象のIDが指定されていない
    #[error("停止するインスタンスが指定されていません")]
    NoInstancesSpecified,
    /// インスタンスの照会に失敗
    #[error("インスタンスの照会に失敗: {0}")]
    DescribeInstancesFailed(String),
    /// 署名タグを持つ稼働中インスタンスが見つからない
    #[error("署名インスタンスが見つかりません")]
    SigningInstancesNotFound,
    /// 停止対象が上限を超えている
    #[error("停止対象のインスタンスが多すぎます: {found} 台（上限 {TERMINATION_LIMIT} 台）")]
    TerminationLimitExceeded {
        /// 解決されたインスタンス数
        found: usize,
    },
    /// インスタンスの起動に失敗
    #[error("インスタンスの起動に失敗: {0}")]
    RunInstancesFailed(String),
    /// インスタンスの停止に失敗
    #[error("インスタンスの停止に失敗: {0}")]
    TerminateInstancesFailed(String),
}

/// ライフサイクルコントローラ。
pub struct InstanceLifecycleController<P: ComputeProvider> {
    provider: P,
}

impl<P: ComputeProvider> InstanceLifecycleController<P> {
    /// コントローラを構築する。
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// プロバイダへの参照
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// 署名インスタンスを1台起動する。
    ///
    /// - `confirmed=false`: 何もせず空のリストを返す
    /// - `dry_run=true`: 権限検証のみ。結果は [`LifecycleError::DryRun`]
    /// - それ以外: 起動したインスタンスIDを返す
    pub async fn wake_up(
        &self,
        confirmed: bool,
        dry_run: bool,
    ) -> Result<Vec<String>, LifecycleError> {
        if !confirmed {
            tracing::info!("確認されていないため署名インスタンスを起動しません");
            return Ok(Vec::new());
        }

        if dry_run {
            let outcome = match self.provider.run_instance(true).await {
                Ok(id) => DryRunOutcome::Failed(format!("ドライランが起動結果を返しました: {id}")),
                Err(e) => DryRunOutcome::from(e),
            };
            tracing::info!(outcome = %outcome, "起動のドライランが完了しました");
            return Err(LifecycleError::DryRun(outcome));
        }

        let instance_id = self
            .provider
            .run_instance(false)
            .await
            .map_err(|e| LifecycleError::RunInstancesFailed(e.to_string()))?;
        tracing::info!(instance_id = %instance_id, "署名インスタンスを起動しました");
        Ok(vec![instance_id])
    }

    /// 署名インスタンスを停止する。
    ///
    /// 指定IDを署名タグ付きの稼働中インスタンスに解決し、ちょうど1台の場合のみ停止する。
    pub async fn sleep(
        &self,
        instance_ids: &[String],
        confirmed: bool,
        dry_run: bool,
    ) -> Result<Vec<String>, LifecycleError> {
        if instance_ids.is_empty() {
            return Err(LifecycleError::NoInstancesSpecified);
        }
        if !confirmed {
            tracing::info!(
                instances = ?instance_ids,
                "確認されていないため署名インスタンスを停止しません"
            );
            return Err(LifecycleError::NotConfirmed);
        }

        let resolved = self
            .provider
            .describe_signing_instances(instance_ids)
            .await
            .map_err(|e| LifecycleError::DescribeInstancesFailed(e.to_string()))?;
        if resolved.is_empty() {
            return Err(LifecycleError::SigningInstancesNotFound);
        }
        if resolved.len() > TERMINATION_LIMIT {
            tracing::warn!(found = resolved.len(), "停止対象が上限を超えています");
            return Err(LifecycleError::TerminationLimitExceeded {
                found: resolved.len(),
            });
        }
        let targets: Vec<String> = resolved.into_iter().map(|i| i.instance_id).collect();

        if dry_run {
            let outcome = match self.provider.terminate_instances(&targets, true).await {
                Ok(ids) => DryRunOutcome::Failed(format!("ドライランが停止結果を返しました: {ids:?}")),
                Err(e) => DryRunOutcome::from(e),
            };
            tracing::info!(outcome = %outcome, "停止のドライランが完了しました");
            return Err(LifecycleError::DryRun(outcome));
        }

        let terminated = self
            .provider
            .terminate_instances(&targets, false)
            .await
            .map_err(|e| LifecycleError::TerminateInstancesFailed(e.to_string()))?;
        tracing::info!(instances = ?terminated, "署名インスタンスを停止しました");
        Ok(terminated)
    }

    /// 稼働中の署名インスタンスを一覧する。`instance_ids` が空なら全件。
    pub async fn list(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<SigningInstanceInfo>, LifecycleError> {
        self.provider
            .describe_signing_instances(instance_ids)
            .await
            .map_err(|e| LifecycleError::DescribeInstancesFailed(e.to_string()))
    }
}
