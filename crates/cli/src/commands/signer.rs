//! # signer サブコマンド
//!
//! 署名インスタンスのライフサイクル操作。
//!
//! - `dropper signer list [--instance ID ...]`
//! - `dropper signer wakeup [--confirmed] [--dry-run false]`
//! - `dropper signer sleep --instance ID [--confirmed] [--dry-run false]`
//! - `dropper signer client-key`
//!
//! `--dry-run` は既定で有効。実際に起動・停止するには `--confirmed --dry-run false`
//! の両方が必要。

use clap::{ArgAction, Args, Subcommand};
use serde::Serialize;

use dropper_crypto::Ed25519SigningKey;
use dropper_lifecycle::config::{LifecycleConfig, ProviderKind};
use dropper_lifecycle::{
    ComputeProvider, InstanceLifecycleController, LifecycleError, MockProvider,
};
use dropper_types::{InstanceListResponse, InstancesResponse};

use super::print_json;

/// signer コマンドグループ
#[derive(Debug, Args)]
pub struct SignerCommand {
    #[command(subcommand)]
    pub subcommand: SignerSubcommand,
}

/// signer サブコマンド
#[derive(Debug, Subcommand)]
pub enum SignerSubcommand {
    /// 稼働中の署名インスタンスを一覧する
    List(ListArgs),
    /// 署名インスタンスを1台起動する
    Wakeup(GuardArgs),
    /// 署名インスタンスを停止する
    Sleep(SleepArgs),
    /// チャネル認証用のEd25519鍵ペアを生成する
    ClientKey,
}

/// `signer list` の引数
#[derive(Debug, Args)]
pub struct ListArgs {
    /// 対象を絞り込むインスタンスID（複数指定可）
    #[arg(long = "instance")]
    pub instances: Vec<String>,
}

/// 状態を変更する操作の確認フラグ
#[derive(Debug, Args)]
pub struct GuardArgs {
    /// 操作を確認する。指定しない場合は何もしない
    #[arg(long)]
    pub confirmed: bool,

    /// 権限の検証のみ行う
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub dry_run: bool,
}

/// `signer sleep` の引数
#[derive(Debug, Args)]
pub struct SleepArgs {
    /// 停止するインスタンスID（複数指定可）
    #[arg(long = "instance", required = true)]
    pub instances: Vec<String>,

    #[command(flatten)]
    pub guard: GuardArgs,
}

#[derive(Serialize)]
struct ClientKeyPair {
    /// `REMOTE_SIGNER_CLIENT_KEY` に設定する秘密鍵
    client_key: String,
    /// `SIGNER_CLIENT_PUBKEY` に設定する公開鍵
    client_pubkey: String,
}

/// signer コマンドを実行する。
pub async fn run_signer(cmd: SignerCommand) -> anyhow::Result<()> {
    match cmd.subcommand {
        SignerSubcommand::List(args) => {
            let controller = InstanceLifecycleController::new(build_provider().await?);
            let instances = controller.list(&args.instances).await?;
            print_json(&InstanceListResponse { instances })
        }
        SignerSubcommand::Wakeup(guard) => {
            let controller = InstanceLifecycleController::new(build_provider().await?);
            report(controller.wake_up(guard.confirmed, guard.dry_run).await)
        }
        SignerSubcommand::Sleep(args) => {
            let controller = InstanceLifecycleController::new(build_provider().await?);
            let result = controller
                .sleep(&args.instances, args.guard.confirmed, args.guard.dry_run)
                .await;
            report(result)
        }
        SignerSubcommand::ClientKey => {
            let key = Ed25519SigningKey::generate(&mut rand::rngs::OsRng);
            print_json(&ClientKeyPair {
                client_key: hex::encode(key.to_bytes()),
                client_pubkey: hex::encode(key.verifying_key().to_bytes()),
            })
        }
    }
}

/// 確認待ち・ドライランは想定内の結果として終了コード0で返す。
fn report(result: Result<Vec<String>, LifecycleError>) -> anyhow::Result<()> {
    match result {
        Ok(instances) => print_json(&InstancesResponse { instances }),
        Err(LifecycleError::NotConfirmed) => {
            tracing::warn!("--confirmed が指定されていないため何もしませんでした");
            print_json(&InstancesResponse { instances: vec![] })
        }
        Err(LifecycleError::DryRun(outcome)) => {
            tracing::warn!(outcome = %outcome, "ドライランのため状態は変更していません");
            print_json(&InstancesResponse { instances: vec![] })
        }
        Err(e) => Err(e.into()),
    }
}

async fn build_provider() -> anyhow::Result<Box<dyn ComputeProvider>> {
    let config = LifecycleConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    match config.provider {
        ProviderKind::Mock => {
            tracing::warn!("モックプロバイダを使用します（状態はプロセス内のみ）");
            Ok(Box::new(MockProvider::new()))
        }
        #[cfg(feature = "vendor-aws")]
        ProviderKind::Aws => {
            let provider = dropper_lifecycle::Ec2Provider::from_config(&config).await?;
            Ok(Box::new(provider))
        }
        #[cfg(not(feature = "vendor-aws"))]
        ProviderKind::Aws => anyhow::bail!(
            "AWSプロバイダを使うには vendor-aws フィーチャを有効にしてビルドしてください"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_treats_guards_as_success() {
        let controller = InstanceLifecycleController::new(
            Box::new(MockProvider::new()) as Box<dyn ComputeProvider>
        );
        assert!(report(controller.wake_up(true, true).await).is_ok());
        assert!(report(controller.sleep(&["i-1".to_string()], false, true).await).is_ok());
        assert!(report(controller.sleep(&[], true, false).await).is_err());
    }
}
