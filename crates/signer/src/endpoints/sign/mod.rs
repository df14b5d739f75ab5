//! # /sign, /batch-sign エンドポイント
//!
//! ## 処理フロー
//! 1. クライアント認証（Ed25519署名・発行時刻）を検証
//! 2. ダイジェスト（32バイトhex）をデコード
//! 3. 鍵ランタイムで復元可能署名を付与
//!
//! ダイジェストの内容は解釈しない。EIP-712ハッシュの組み立てはクライアント側で行う。

mod handler;

#[cfg(test)]
mod tests;

pub use handler::{handle_batch_sign, handle_sign};
