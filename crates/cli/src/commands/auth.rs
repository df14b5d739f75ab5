//! # auth サブコマンド
//!
//! 署名者アドレスに対する汎用認可バウチャーを発行・検証する。
//! ドメインは `AUTH_DOMAIN_NAME` / `AUTH_DOMAIN_VERSION` から読み込む。

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;

use dropper_core::authorization::{
    authorize, decode_header, decode_payload, encode_header, encode_payload, verify,
    AuthorizationDomain, DEFAULT_INTERVAL_SECS,
};
use dropper_core::signer::channel::unix_now;
use dropper_core::signer::SignerConfig;

use super::print_json;

/// auth コマンドグループ
#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    pub subcommand: AuthSubcommand,
}

/// auth サブコマンド
#[derive(Debug, Subcommand)]
pub enum AuthSubcommand {
    /// 認可バウチャーを発行する
    Authorize(AuthorizeArgs),
    /// 認可バウチャーを検証する
    Verify(VerifyArgs),
}

/// `auth authorize` の引数
#[derive(Debug, Args)]
pub struct AuthorizeArgs {
    /// 有効期限（Unix秒）。指定しない場合は現在時刻 + `--interval`
    #[arg(long)]
    pub deadline: Option<u64>,

    /// 有効期間（秒）
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS, conflicts_with = "deadline")]
    pub interval: u64,

    /// `Authorization` ヘッダ値として出力する
    #[arg(long)]
    pub header: bool,
}

/// `auth verify` の引数
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Base64エンコードされたバウチャー、または `moonstream <base64>` 形式のヘッダ値
    pub payload: String,

    /// 検証時刻（Unix秒）。既定は現在時刻
    #[arg(long)]
    pub now: Option<u64>,
}

#[derive(Serialize)]
struct AuthorizeOutput {
    address: String,
    deadline: u64,
    signature: String,
    payload: String,
}

#[derive(Serialize)]
struct VerifyOutput {
    address: String,
    deadline: u64,
}

/// auth コマンドを実行する。
pub async fn run_auth(cmd: AuthCommand) -> anyhow::Result<()> {
    let domain = AuthorizationDomain::from_env();
    match cmd.subcommand {
        AuthSubcommand::Authorize(args) => {
            let signer = SignerConfig::from_env()
                .and_then(SignerConfig::build)
                .context("署名バックエンドの初期化に失敗しました")?;
            let deadline = args.deadline.unwrap_or_else(|| unix_now() + args.interval);
            let payload = authorize(signer.as_ref(), &domain, deadline).await?;
            tracing::info!(address = %payload.address, deadline, "認可バウチャーを発行しました");

            if args.header {
                println!("{}", encode_header(&payload)?);
                return Ok(());
            }
            let encoded = encode_payload(&payload)?;
            print_json(&AuthorizeOutput {
                address: payload.address,
                deadline: payload.deadline,
                signature: payload.signature,
                payload: encoded,
            })
        }
        AuthSubcommand::Verify(args) => {
            let input = args.payload.trim();
            let payload = if input.contains(char::is_whitespace) {
                decode_header(input)?
            } else {
                decode_payload(input)?
            };
            let address = verify(&payload, &domain, args.now.unwrap_or_else(unix_now))?;
            print_json(&VerifyOutput {
                address: address.to_string(),
                deadline: payload.deadline,
            })
        }
    }
}
