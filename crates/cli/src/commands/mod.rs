//! # サブコマンド
//!
//! | グループ | 内容 |
//! |---------|------|
//! | `signer` | 署名インスタンスの一覧・起動・停止、チャネル鍵の生成 |
//! | `auth` | 汎用認可バウチャー |
//! | `voucher` | Dropperクレームバウチャー |
//! | `drop` | 配布ジョブの作成・実行・再試行・状態管理 |

pub mod auth;
pub mod drop;
pub mod signer;
pub mod voucher;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// 結果をJSONで標準出力に書き出す。
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 出力先を開く。`None` なら標準出力。
pub fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("出力ファイルを作成できません: {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(std::io::stdout().lock())),
    }
}

/// 入力ファイルを開く。
pub fn open_input(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("入力ファイルを開けません: {}", path.display()))
}
