//! # Dropper Core
//!
//! 報酬配布プラットフォームのオフチェーン側の中核。
//!
//! ## 構成
//! 1. [`signer`]: 署名バックエンド（ローカルkeystore / リモート署名インスタンス）
//! 2. [`authorization`]: 期限付きの汎用認可トークン
//! 3. [`voucher`]: Dropperコントラクト向けのクレームバウチャー
//! 4. [`distribution`]: チェックポイント付きのバッチ配布
//! 5. [`chain`]: バッチ配布トランザクションの送信

pub mod authorization;
pub mod chain;
pub mod distribution;
pub mod signer;
pub mod voucher;

pub use signer::{Signer, SignerError};
