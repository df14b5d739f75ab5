//! # バッチ配布
//!
//! - [`matrix`]: 配布対象マトリクスの読み込み
//! - [`store`]: チェックポイントとエラーログのジャーナル
//! - [`engine`]: バッチ計画・送信・再送信

pub mod engine;
pub mod matrix;
pub mod store;

pub use engine::{plan, BatchMinter, DistributionEngine, MintError, PlannedBatch, TxStatus};
pub use matrix::{EligibilityMatrix, MatrixError};
pub use store::{checkpoint_key, DistributionState, FailedBatch, JournalStore, StoreError};
