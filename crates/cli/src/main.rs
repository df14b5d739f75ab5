//! # Dropper CLI
//!
//! 署名インスタンスの起動・停止、認可バウチャーとクレームバウチャーの発行、
//! バッチ配布の実行を行うオペレータ向けCLI。
//!
//! 署名バックエンドは環境変数（`SIGNER_BACKEND` ほか）で選択する。
//! 詳細は `dropper_core::signer::config` を参照。

mod commands;

use clap::{Parser, Subcommand};

use commands::auth::AuthCommand;
use commands::drop::DropCommand;
use commands::signer::SignerCommand;
use commands::voucher::VoucherCommand;

#[derive(Parser)]
#[command(name = "dropper", about = "Dropper operator CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 署名インスタンスの管理
    Signer(SignerCommand),
    /// 汎用認可バウチャーの発行・検証
    Auth(AuthCommand),
    /// クレームバウチャーの発行・検証
    Voucher(VoucherCommand),
    /// バッチ配布
    Drop(DropCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Signer(cmd) => commands::signer::run_signer(cmd).await,
        Commands::Auth(cmd) => commands::auth::run_auth(cmd).await,
        Commands::Voucher(cmd) => commands::voucher::run_voucher(cmd).await,
        Commands::Drop(cmd) => commands::drop::run_drop(cmd).await,
    }
}
