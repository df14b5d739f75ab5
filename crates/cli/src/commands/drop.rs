//! # drop サブコマンド
//!
//! 配布ジョブの作成と、チェックポイント付きバッチ配布の実行。
//!
//! | コマンド | 内容 |
//! |---------|------|
//! | `make` | 配布対象CSVからジョブファイル（JSON）を作成 |
//! | `execute` | 未配布分をバッチ送信（`--plan-only` で送信せず計画のみ表示） |
//! | `retry` | エラーログに残る失敗バッチを再送 |
//! | `status` | 配布済み数量と未解決の失敗バッチを表示 |
//! | `compact` | ジャーナルをスナップショットに圧縮 |
//! | `export` / `import` | チェックポイント・エラーログのJSONを書き出し／取り込み |

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;

use dropper_core::chain::{JsonRpcClient, JsonRpcMinter};
use dropper_core::distribution::{
    plan, DistributionEngine, EligibilityMatrix, JournalStore, PlannedBatch,
};
use dropper_crypto::Address;
use dropper_types::RunReport;

use super::{open_input, open_output, print_json};

/// drop コマンドグループ
#[derive(Debug, Args)]
pub struct DropCommand {
    #[command(subcommand)]
    pub subcommand: DropSubcommand,
}

/// drop サブコマンド
#[derive(Debug, Subcommand)]
pub enum DropSubcommand {
    /// 配布対象CSVからジョブファイルを作成する
    Make(MakeArgs),
    /// 未配布分を送信する
    Execute(ExecuteArgs),
    /// 失敗したバッチを再送する
    Retry(ExecuteArgs),
    /// 配布状況を表示する
    Status(StatusArgs),
    /// ジャーナルをスナップショットに圧縮する
    Compact(StoreArgs),
    /// チェックポイントとエラーログをJSONで書き出す
    Export(ExportArgs),
    /// チェックポイントとエラーログのJSONを取り込む
    Import(ImportArgs),
}

/// `drop make` の引数
#[derive(Debug, Args)]
pub struct MakeArgs {
    /// `address,<配布ID>,...` 形式のCSV
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// 出力先。指定しない場合は標準出力
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// 配布状態の保存先
#[derive(Debug, Args)]
pub struct StoreArgs {
    /// ジャーナルとスナップショットを置くディレクトリ（なければ作成）
    #[arg(long, short = 's')]
    pub store: PathBuf,
}

/// `drop execute` / `drop retry` の引数
#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// ジョブファイル（JSON）
    #[arg(long, short = 'i')]
    pub job: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    /// 1トランザクションあたりの受取人数
    #[arg(long, short = 'N')]
    pub batch_size: usize,

    /// 配布コントラクトのアドレス
    #[arg(long, env = "DROPPER_CONTRACT_ADDRESS")]
    pub contract: Option<Address>,

    /// 送信元アカウント（ノード管理）
    #[arg(long, env = "DROPPER_SENDER_ADDRESS")]
    pub from: Option<Address>,

    /// JSON-RPCエンドポイント
    #[arg(long, env = "JSON_RPC_URI")]
    pub rpc: Option<String>,

    /// トランザクションの確定を待つ上限（秒）
    #[arg(long, default_value_t = 300)]
    pub receipt_timeout: u64,

    /// 送信せず、送信予定のバッチだけを表示する
    #[arg(long)]
    pub plan_only: bool,
}

/// `drop status` の引数
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// ジョブファイル（JSON）
    #[arg(long, short = 'i')]
    pub job: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// `drop export` の引数
#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// チェックポイントの出力先
    #[arg(long, short = 'c')]
    pub checkpoint: PathBuf,

    /// エラーログの出力先
    #[arg(long, short = 'e')]
    pub errors: PathBuf,
}

/// `drop import` の引数
#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// 取り込むチェックポイント
    #[arg(long, short = 'c')]
    pub checkpoint: Option<PathBuf>,

    /// 取り込むエラーログ
    #[arg(long, short = 'e')]
    pub errors: Option<PathBuf>,
}

#[derive(Serialize)]
struct PlannedBatchOutput {
    distribution_id: u64,
    amount: String,
    recipients: Vec<String>,
}

impl From<&PlannedBatch> for PlannedBatchOutput {
    fn from(batch: &PlannedBatch) -> Self {
        Self {
            distribution_id: batch.distribution_id,
            amount: batch.amount.to_string(),
            recipients: batch.recipients.iter().map(Address::to_string).collect(),
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    distribution_id: u64,
    recipients: usize,
    owed: String,
    delivered: String,
    outstanding: String,
}

/// drop コマンドを実行する。
pub async fn run_drop(cmd: DropCommand) -> anyhow::Result<()> {
    match cmd.subcommand {
        DropSubcommand::Make(args) => {
            let matrix = EligibilityMatrix::from_csv_reader(open_input(&args.input)?)?;
            tracing::info!(entries = matrix.entry_count(), "ジョブファイルを作成しました");
            let mut out = open_output(args.output.as_deref())?;
            serde_json::to_writer_pretty(&mut out, &matrix)?;
            writeln!(out)?;
            Ok(())
        }
        DropSubcommand::Execute(args) => run_engine(args, false).await,
        DropSubcommand::Retry(args) => run_engine(args, true).await,
        DropSubcommand::Status(args) => {
            let matrix = load_job(&args.job)?;
            let store = open_store(&args.store.store)?;
            print_json(&status(&matrix, &store))
        }
        DropSubcommand::Compact(args) => {
            let mut store = open_store(&args.store)?;
            store.compact()?;
            tracing::info!(dir = %args.store.display(), "ジャーナルを圧縮しました");
            Ok(())
        }
        DropSubcommand::Export(args) => {
            let store = open_store(&args.store.store)?;
            store.export(&args.checkpoint, &args.errors)?;
            tracing::info!(
                checkpoint = %args.checkpoint.display(),
                errors = %args.errors.display(),
                "配布状態を書き出しました"
            );
            Ok(())
        }
        DropSubcommand::Import(args) => {
            if args.checkpoint.is_none() && args.errors.is_none() {
                anyhow::bail!("--checkpoint または --errors を指定してください");
            }
            let mut store = open_store(&args.store.store)?;
            store.import(args.checkpoint.as_deref(), args.errors.as_deref())?;
            store.compact()?;
            tracing::info!(
                unresolved = store.state().unresolved().len(),
                "配布状態を取り込みました"
            );
            Ok(())
        }
    }
}

fn load_job(path: &Path) -> anyhow::Result<EligibilityMatrix> {
    EligibilityMatrix::from_json_reader(open_input(path)?)
        .with_context(|| format!("ジョブファイルを読み込めません: {}", path.display()))
}

fn open_store(dir: &Path) -> anyhow::Result<JournalStore> {
    JournalStore::open(dir)
        .with_context(|| format!("配布状態を開けません: {}", dir.display()))
}

fn status(matrix: &EligibilityMatrix, store: &JournalStore) -> Vec<StatusOutput> {
    let state = store.state();
    matrix
        .iter()
        .map(|(distribution_id, recipients)| {
            let mut owed = 0u128;
            let mut delivered = 0u128;
            let mut outstanding = 0u128;
            for (recipient, quantity) in recipients {
                owed = owed.saturating_add(*quantity);
                delivered = delivered.saturating_add(state.delivered(distribution_id, recipient));
                outstanding =
                    outstanding.saturating_add(state.outstanding(distribution_id, recipient));
            }
            StatusOutput {
                distribution_id,
                recipients: recipients.len(),
                owed: owed.to_string(),
                delivered: delivered.to_string(),
                outstanding: outstanding.to_string(),
            }
        })
        .collect()
}

async fn run_engine(args: ExecuteArgs, retry: bool) -> anyhow::Result<()> {
    let matrix = load_job(&args.job)?;
    let store = open_store(&args.store.store)?;

    if args.plan_only {
        let batches: Vec<PlannedBatchOutput> = if retry {
            store
                .state()
                .unresolved()
                .iter()
                .map(|failed| PlannedBatchOutput {
                    distribution_id: failed.distribution_id,
                    amount: failed.amount.to_string(),
                    recipients: failed.recipients.iter().map(Address::to_string).collect(),
                })
                .collect()
        } else {
            plan(&matrix, store.state(), args.batch_size.max(1))
                .iter()
                .map(PlannedBatchOutput::from)
                .collect()
        };
        return print_json(&batches);
    }

    let rpc = args
        .rpc
        .context("--rpc または JSON_RPC_URI が必要です")?;
    let contract = args
        .contract
        .context("--contract または DROPPER_CONTRACT_ADDRESS が必要です")?;
    let from = args
        .from
        .context("--from または DROPPER_SENDER_ADDRESS が必要です")?;

    let client = JsonRpcClient::new(rpc, Duration::from_secs(30))?;
    let minter = JsonRpcMinter::new(client, contract, from).with_receipt_polling(
        dropper_core::chain::DEFAULT_POLL_INTERVAL,
        Duration::from_secs(args.receipt_timeout),
    );
    let mut engine = DistributionEngine::new(minter, store, args.batch_size);

    let report: RunReport = if retry {
        engine.retry(&matrix).await?
    } else {
        engine.execute(&matrix).await?
    };
    print_json(&report)?;

    if report.batches_failed > 0 {
        tracing::warn!(
            failed = report.batches_failed,
            "失敗したバッチがあります。`drop retry` で再送してください"
        );
    }
    Ok(())
}
