//! # 配布エンジン
//!
//! マトリクスとジャーナルから未配布数量を求め、同じ数量の受取人をまとめて
//! バッチ送信する。バッチ1件ごとに結果をジャーナルへ書き込んでから次へ進む。
//!
//! 未配布数量 = 配布予定 − 配布済み − 未解決の失敗バッチに含まれる数量

use std::collections::BTreeMap;

use dropper_crypto::Address;
use dropper_types::{DistributionId, RunReport};

use super::matrix::EligibilityMatrix;
use super::store::{DistributionState, FailedBatch, JournalStore, StoreError};

/// バッチ送信のエラー型。いずれもエラーログに記録され、実行は継続する。
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    /// 送信に失敗（RPCエラー、残高不足、権限不足を含む）
    #[error("トランザクションの送信に失敗: {0}")]
    Submit(String),
    /// トランザクションがリバートした
    #[error("トランザクションがリバートしました: {tx}")]
    Reverted {
        /// トランザクションハッシュ
        tx: String,
    },
    /// レシートの待機がタイムアウトした
    #[error("レシートの待機がタイムアウトしました: {tx}")]
    ReceiptTimeout {
        /// トランザクションハッシュ
        tx: String,
    },
    /// 送信後のレシート取得に失敗した
    #[error("レシートを取得できません: {tx}: {reason}")]
    ReceiptUnavailable {
        /// トランザクションハッシュ
        tx: String,
        /// 失敗の理由
        reason: String,
    },
}

impl MintError {
    /// 送信済みで結果が確定していないトランザクション。
    ///
    /// これが `Some` のバッチはオンチェーンで成功している可能性があるため、
    /// 再送信の前にレシートを確認する。
    pub fn pending_tx(&self) -> Option<&str> {
        match self {
            Self::ReceiptTimeout { tx } | Self::ReceiptUnavailable { tx, .. } => Some(tx),
            Self::Submit(_) | Self::Reverted { .. } => None,
        }
    }
}

/// 送信済みトランザクションの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// 成功して確定した
    Confirmed,
    /// リバートした
    Reverted,
    /// レシートがまだない
    Pending,
}

/// 受取人のバッチに同じ数量を配布するオンチェーン呼び出し。
#[async_trait::async_trait]
pub trait BatchMinter: Send + Sync {
    /// バッチを1トランザクションとして送信し、確定したトランザクションの参照を返す。
    async fn batch_mint(
        &self,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
    ) -> Result<String, MintError>;

    /// 送信済みトランザクションの状態を1回だけ問い合わせる。
    async fn tx_status(&self, tx: &str) -> Result<TxStatus, MintError>;
}

/// 送信予定のバッチ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    /// 配布ID
    pub distribution_id: DistributionId,
    /// 受取人
    pub recipients: Vec<Address>,
    /// 1人あたりの数量
    pub amount: u128,
}

/// 未配布数量からバッチを組み立てる。
///
/// 配布IDごとに受取人を未配布数量でグループ化し（数量の昇順）、
/// 各グループを `batch_size` 件ずつに分割する（0は1として扱う）。
pub fn plan(
    matrix: &EligibilityMatrix,
    state: &DistributionState,
    batch_size: usize,
) -> Vec<PlannedBatch> {
    let mut batches = Vec::new();
    for (distribution_id, recipients) in matrix.iter() {
        let mut groups: BTreeMap<u128, Vec<Address>> = BTreeMap::new();
        for (recipient, owed) in recipients {
            let remaining = owed
                .saturating_sub(state.delivered(distribution_id, recipient))
                .saturating_sub(state.outstanding(distribution_id, recipient));
            if remaining > 0 {
                groups.entry(remaining).or_default().push(*recipient);
            }
        }
        for (amount, group) in groups {
            for chunk in group.chunks(batch_size.max(1)) {
                batches.push(PlannedBatch {
                    distribution_id,
                    recipients: chunk.to_vec(),
                    amount,
                });
            }
        }
    }
    batches
}

/// バッチ配布エンジン。
pub struct DistributionEngine<M: BatchMinter> {
    minter: M,
    store: JournalStore,
    batch_size: usize,
}

impl<M: BatchMinter> DistributionEngine<M> {
    /// エンジンを構築する。`batch_size` は1以上。
    pub fn new(minter: M, store: JournalStore, batch_size: usize) -> Self {
        Self {
            minter,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// 永続ストア
    pub fn store(&self) -> &JournalStore {
        &self.store
    }

    /// 永続ストア（圧縮・エクスポート用）
    pub fn store_mut(&mut self) -> &mut JournalStore {
        &mut self.store
    }

    /// 送信せずにバッチ計画だけを返す。
    pub fn plan(&self, matrix: &EligibilityMatrix) -> Vec<PlannedBatch> {
        plan(matrix, self.store.state(), self.batch_size)
    }

    /// 未配布分をすべて送信する。
    ///
    /// バッチの失敗はエラーログに記録して継続する。ジャーナルへの書き込みに
    /// 失敗した場合のみ中断する。
    pub async fn execute(&mut self, matrix: &EligibilityMatrix) -> Result<RunReport, StoreError> {
        let batches = self.plan(matrix);
        tracing::info!(
            batches = batches.len(),
            batch_size = self.batch_size,
            "配布を開始します"
        );

        let mut report = RunReport::default();
        for batch in batches {
            self.submit(batch.distribution_id, &batch.recipients, batch.amount, &mut report)
                .await?;
        }

        tracing::info!(
            succeeded = report.batches_succeeded,
            failed = report.batches_failed,
            delivered = %report.quantity_delivered,
            "配布が完了しました"
        );
        Ok(report)
    }

    /// 未解決の失敗バッチを再送信する。
    ///
    /// 送信済みトランザクションが残るエントリは、先にレシートを確認する。
    /// 成功していればチェックポイントに記録して再送信しない。
    /// まだ確定していない（または確認できない）エントリは次回に持ち越す。
    ///
    /// それ以外は受取人ごとに、対象の失敗バッチを除いた未配布数量を再計算し、
    /// その数量が失敗バッチの数量以上の受取人だけを再送信する。
    /// 送信結果を記録したあと、元のエントリを解決済みにする。
    pub async fn retry(&mut self, matrix: &EligibilityMatrix) -> Result<RunReport, StoreError> {
        let failed: Vec<FailedBatch> = self.store.state().unresolved().to_vec();
        tracing::info!(entries = failed.len(), "失敗バッチを再送信します");

        let mut report = RunReport::default();
        for entry in failed {
            if let Some(tx) = &entry.tx {
                match self.minter.tx_status(tx).await {
                    Ok(TxStatus::Confirmed) => {
                        // 記録後・解決前に停止していた場合は二重に記録しない
                        let recorded = entry.recipients.iter().all(|recipient| {
                            self.store
                                .state()
                                .checkpoint_entries(entry.distribution_id, recipient)
                                .iter()
                                .any(|c| c.1 == *tx)
                        });
                        if !recorded {
                            self.store.record_delivered(
                                entry.distribution_id,
                                &entry.recipients,
                                entry.amount,
                                tx,
                            )?;
                        }
                        self.store.record_resolved(&entry)?;
                        report.batches_succeeded += 1;
                        report.quantity_delivered = report
                            .quantity_delivered
                            .saturating_add(batch_quantity(entry.amount, entry.recipients.len()));
                        tracing::info!(
                            distribution_id = entry.distribution_id,
                            tx = %tx,
                            "送信済みのバッチが確定していたため記録しました"
                        );
                        continue;
                    }
                    Ok(TxStatus::Reverted) => {
                        tracing::info!(tx = %tx, "送信済みのバッチはリバートしていたため再送信します");
                    }
                    Ok(TxStatus::Pending) => {
                        tracing::warn!(tx = %tx, "送信済みのバッチが未確定のため今回は再送信しません");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(tx = %tx, error = %e, "送信済みのバッチを確認できないため今回は再送信しません");
                        continue;
                    }
                }
            }

            let eligible: Vec<Address> = {
                let state = self.store.state();
                entry
                    .recipients
                    .iter()
                    .filter(|recipient| {
                        let id = entry.distribution_id;
                        let other_outstanding =
                            state.outstanding(id, recipient).saturating_sub(entry.amount);
                        let remaining = matrix
                            .owed(id, recipient)
                            .saturating_sub(state.delivered(id, recipient))
                            .saturating_sub(other_outstanding);
                        remaining >= entry.amount
                    })
                    .copied()
                    .collect()
            };

            if eligible.len() < entry.recipients.len() {
                tracing::info!(
                    distribution_id = entry.distribution_id,
                    skipped = entry.recipients.len() - eligible.len(),
                    "配布済みまたは対象外の受取人を再送信から除外します"
                );
            }

            for chunk in eligible.chunks(self.batch_size) {
                self.submit(entry.distribution_id, chunk, entry.amount, &mut report)
                    .await?;
            }
            self.store.record_resolved(&entry)?;
        }
        Ok(report)
    }

    async fn submit(
        &mut self,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
        report: &mut RunReport,
    ) -> Result<(), StoreError> {
        match self.minter.batch_mint(distribution_id, recipients, amount).await {
            Ok(tx) => {
                self.store
                    .record_delivered(distribution_id, recipients, amount, &tx)?;
                report.batches_succeeded += 1;
                report.quantity_delivered = report
                    .quantity_delivered
                    .saturating_add(batch_quantity(amount, recipients.len()));
                tracing::info!(
                    distribution_id,
                    recipients = recipients.len(),
                    amount = %amount,
                    tx = %tx,
                    "バッチを配布しました"
                );
            }
            Err(e) => {
                self.store
                    .record_failed(distribution_id, recipients, amount, e.pending_tx())?;
                report.batches_failed += 1;
                tracing::warn!(
                    distribution_id,
                    recipients = recipients.len(),
                    amount = %amount,
                    error = %e,
                    "バッチの送信に失敗しました"
                );
            }
        }
        Ok(())
    }
}

/// バッチ全体の数量（上限で飽和）
fn batch_quantity(amount: u128, recipients: usize) -> u128 {
    amount.saturating_mul(recipients as u128)
}
