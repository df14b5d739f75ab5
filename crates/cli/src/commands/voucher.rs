//! # voucher サブコマンド
//!
//! Dropperコントラクトの `claim` に渡すクレームバウチャーを発行・検証する。
//!
//! - `dropper voucher gen --claim-id N --input claims.csv [--header] [--format csv]`
//! - `dropper voucher gen --claim-id N --claimant 0x.. --amount 1 --block-deadline 123`
//! - `dropper --domain-version 0.2.0 voucher gen --claim-id N --request-id R ...`
//! - `dropper voucher verify --input vouchers.json --signer 0x.. [--block N]`

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};

use dropper_core::chain::JsonRpcClient;
use dropper_core::signer::SignerConfig;
use dropper_core::Signer;
use dropper_core::voucher::{
    issue_claim_vouchers, read_claim_rows, verify_claim_voucher, write_vouchers_csv, ClaimRequest,
    DropperDomain, DEFAULT_DROPPER_DOMAIN_VERSION,
};
use dropper_crypto::Address;
use dropper_types::ClaimVoucher;

use super::{open_input, open_output, print_json};

/// voucher コマンドグループ
#[derive(Debug, Args)]
pub struct VoucherCommand {
    #[command(flatten)]
    pub domain: DomainArgs,

    #[command(subcommand)]
    pub subcommand: VoucherSubcommand,
}

/// Dropperコントラクトのドメイン
#[derive(Debug, Args)]
pub struct DomainArgs {
    /// チェーンID
    #[arg(long, env = "DROPPER_CHAIN_ID", global = true)]
    pub chain_id: Option<u64>,

    /// Dropperコントラクトのアドレス
    #[arg(long, env = "DROPPER_CONTRACT_ADDRESS", global = true)]
    pub contract: Option<Address>,

    /// ドメインバージョン（0.1.0 または 0.2.0）
    #[arg(
        long,
        env = "DROPPER_DOMAIN_VERSION",
        default_value = DEFAULT_DROPPER_DOMAIN_VERSION,
        global = true
    )]
    pub domain_version: String,
}

impl DomainArgs {
    fn domain(&self) -> anyhow::Result<DropperDomain> {
        let chain_id = self
            .chain_id
            .context("--chain-id または DROPPER_CHAIN_ID が必要です")?;
        let contract = self
            .contract
            .context("--contract または DROPPER_CONTRACT_ADDRESS が必要です")?;
        Ok(DropperDomain::with_version(
            chain_id,
            contract,
            self.domain_version.as_str(),
        )?)
    }
}

/// voucher サブコマンド
#[derive(Debug, Subcommand)]
pub enum VoucherSubcommand {
    /// クレームバウチャーを発行する
    Gen(GenArgs),
    /// クレームバウチャーを検証する
    Verify(VerifyArgs),
}

/// 出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON配列
    Json,
    /// CSV（`claimant_address,amount,signature,claim_block_deadline,claim_id`）
    Csv,
}

/// `voucher gen` の引数
#[derive(Debug, Args)]
pub struct GenArgs {
    /// クレームID（0.2.0 ではドロップID）
    #[arg(long)]
    pub claim_id: u64,

    /// リクエストID（0.2.0 のみ）。CSVの4列目があればそちらを優先する
    #[arg(long)]
    pub request_id: Option<u128>,

    /// `address,amount,block_deadline[,request_id]` 形式のCSV
    #[arg(long, short = 'i', conflicts_with_all = ["claimant", "amount", "block_deadline"])]
    pub input: Option<PathBuf>,

    /// CSVの1行目をヘッダとして扱う
    #[arg(long, requires = "input")]
    pub header: bool,

    /// 受取人（1件のみ発行する場合）
    #[arg(long, required_unless_present = "input", requires_all = ["amount", "block_deadline"])]
    pub claimant: Option<Address>,

    /// 受取数量
    #[arg(long)]
    pub amount: Option<u128>,

    /// 有効期限（ブロック番号）
    #[arg(long)]
    pub block_deadline: Option<u64>,

    /// 出力形式
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// 出力先。指定しない場合は標準出力
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// `voucher verify` の引数
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// `voucher gen` が出力したJSON（1件または配列）
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// 期待する署名者のアドレス
    #[arg(long)]
    pub signer: Address,

    /// 現在のブロック番号。指定しない場合は `--rpc` から取得する
    #[arg(long)]
    pub block: Option<u64>,

    /// JSON-RPCエンドポイント
    #[arg(long, env = "JSON_RPC_URI")]
    pub rpc: Option<String>,
}

/// voucher コマンドを実行する。
pub async fn run_voucher(cmd: VoucherCommand) -> anyhow::Result<()> {
    let domain = cmd.domain.domain()?;
    match cmd.subcommand {
        VoucherSubcommand::Gen(args) => run_gen(args, &domain).await,
        VoucherSubcommand::Verify(args) => run_verify(args, &domain).await,
    }
}

fn claims_from_args(args: &GenArgs) -> anyhow::Result<Vec<ClaimRequest>> {
    if let Some(path) = &args.input {
        let rows = read_claim_rows(open_input(path)?, args.header)?;
        return Ok(rows
            .into_iter()
            .map(|row| row.into_request(args.claim_id, args.request_id))
            .collect());
    }
    let (Some(claimant), Some(amount), Some(block_deadline)) =
        (args.claimant, args.amount, args.block_deadline)
    else {
        anyhow::bail!("--input または --claimant/--amount/--block-deadline が必要です");
    };
    Ok(vec![ClaimRequest {
        claim_id: args.claim_id,
        request_id: args.request_id,
        claimant,
        block_deadline,
        amount,
    }])
}

async fn run_gen(args: GenArgs, domain: &DropperDomain) -> anyhow::Result<()> {
    let claims = claims_from_args(&args)?;
    // 署名バックエンドに接続する前にバージョンとの整合を確認する
    for claim in &claims {
        claim.digest(domain)?;
    }
    let signer = SignerConfig::from_env()
        .and_then(SignerConfig::build)
        .context("署名バックエンドの初期化に失敗しました")?;

    let vouchers = issue_claim_vouchers(signer.as_ref(), domain, &claims).await?;
    tracing::info!(
        claim_id = args.claim_id,
        count = vouchers.len(),
        signer = %signer.address(),
        "クレームバウチャーを発行しました"
    );

    let mut out = open_output(args.output.as_deref())?;
    match args.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &vouchers)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => write_vouchers_csv(out, &vouchers)?,
    }
    Ok(())
}

async fn run_verify(args: VerifyArgs, domain: &DropperDomain) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_reader(open_input(&args.input)?)?;
    let vouchers: Vec<ClaimVoucher> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    let current_block = match (args.block, &args.rpc) {
        (Some(block), _) => block,
        (None, Some(url)) => JsonRpcClient::new(url.as_str(), Duration::from_secs(10))?
            .block_number()
            .await?,
        (None, None) => anyhow::bail!("--block または --rpc（JSON_RPC_URI）が必要です"),
    };

    let mut results = Vec::with_capacity(vouchers.len());
    for voucher in &vouchers {
        let result = verify_claim_voucher(voucher, domain, args.signer, current_block);
        if let Err(e) = &result {
            tracing::warn!(
                claimant = %voucher.claimant_address,
                claim_id = voucher.claim_id,
                error = %e,
                "バウチャーの検証に失敗しました"
            );
        }
        results.push(serde_json::json!({
            "claimant_address": voucher.claimant_address,
            "claim_id": voucher.claim_id,
            "request_id": voucher.request_id.map(|id| id.to_string()),
            "valid": result.is_ok(),
            "error": result.err().map(|e| e.to_string()),
        }));
    }
    print_json(&results)?;

    let invalid = results.iter().filter(|r| r["valid"] == false).count();
    if invalid > 0 {
        anyhow::bail!("{invalid} 件のバウチャーが無効です");
    }
    Ok(())
}
