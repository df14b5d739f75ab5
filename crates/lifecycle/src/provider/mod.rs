//! # コンピュートプロバイダ
//!
//! 署名インスタンスをホストするクラウドAPIの抽象インターフェース。
//! EC2実装は `ec2` サブモジュールを参照。

#[cfg(feature = "vendor-aws")]
pub mod ec2;
pub mod mock;

#[cfg(feature = "vendor-aws")]
pub use ec2::Ec2Provider;
pub use mock::MockProvider;

use dropper_types::SigningInstanceInfo;

/// プロバイダ呼び出しのエラー型。
///
/// ドライランの結果もエラーとして返る（EC2の `DryRunOperation` に相当）。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// ドライランの要求は本実行なら成功する
    #[error("ドライラン要求は成功する見込みです")]
    DryRunOperation,
    /// 権限がない
    #[error("権限がありません: {0}")]
    Unauthorized(String),
    /// その他のAPIエラー
    #[error("{0}")]
    Api(String),
}

/// 署名インスタンスをホストするクラウドAPI。
#[async_trait::async_trait]
pub trait ComputeProvider: Send + Sync {
    /// 署名インスタンスを1台起動し、IDを返す。
    async fn run_instance(&self, dry_run: bool) -> Result<String, ProviderError>;

    /// 指定IDのうち、署名タグを持ち稼働中（起動中を含む）のインスタンスを返す。
    /// `instance_ids` が空なら該当する全件。存在しないIDが含まれる場合はエラー。
    async fn describe_signing_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<SigningInstanceInfo>, ProviderError>;

    /// インスタンスを停止し、停止処理に入ったIDを返す。
    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, ProviderError>;
}

/// 起動時に選択したプロバイダをそのまま使うための委譲実装
#[async_trait::async_trait]
impl ComputeProvider for Box<dyn ComputeProvider> {
    async fn run_instance(&self, dry_run: bool) -> Result<String, ProviderError> {
        (**self).run_instance(dry_run).await
    }

    async fn describe_signing_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<SigningInstanceInfo>, ProviderError> {
        (**self).describe_signing_instances(instance_ids).await
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, ProviderError> {
        (**self).terminate_instances(instance_ids, dry_run).await
    }
}
