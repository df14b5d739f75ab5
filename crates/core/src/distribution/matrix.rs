//! # 配布対象マトリクス
//!
//! 配布ID → 受取人アドレス → 数量。数量0以下のエントリは保持しない。

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use dropper_crypto::Address;
use dropper_types::DistributionId;

/// マトリクス読み込みのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// CSVの読み取りに失敗
    #[error("CSVの読み取りに失敗: {0}")]
    Csv(#[from] csv::Error),
    /// JSONの読み書きに失敗
    #[error("ジョブファイルの読み書きに失敗: {0}")]
    Json(#[from] serde_json::Error),
    /// `address` 列がない
    #[error("address列が見つかりません")]
    MissingAddressColumn,
    /// 配布IDとして解釈できない列名
    #[error("列名を配布IDとして解釈できません: {0}")]
    InvalidDistributionId(String),
    /// アドレスが不正
    #[error("{row}行目のアドレスが不正です: {value}")]
    InvalidAddress {
        /// 行番号（ヘッダを1行目とする）
        row: usize,
        /// 値
        value: String,
    },
    /// 数量が整数でない
    #[error("{row}行目の列 {column} の数量が不正です: {value}")]
    InvalidQuantity {
        /// 行番号
        row: usize,
        /// 配布ID
        column: DistributionId,
        /// 値
        value: String,
    },
}

/// 配布対象マトリクス。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EligibilityMatrix(BTreeMap<DistributionId, BTreeMap<Address, u128>>);

impl EligibilityMatrix {
    /// 空のマトリクス
    pub fn new() -> Self {
        Self::default()
    }

    /// 数量を設定する。0の場合はエントリを削除する。
    pub fn set(&mut self, distribution_id: DistributionId, recipient: Address, quantity: u128) {
        if quantity == 0 {
            if let Some(recipients) = self.0.get_mut(&distribution_id) {
                recipients.remove(&recipient);
                if recipients.is_empty() {
                    self.0.remove(&distribution_id);
                }
            }
        } else {
            self.0
                .entry(distribution_id)
                .or_default()
                .insert(recipient, quantity);
        }
    }

    /// 受取人への配布予定数量
    pub fn owed(&self, distribution_id: DistributionId, recipient: &Address) -> u128 {
        self.0
            .get(&distribution_id)
            .and_then(|r| r.get(recipient))
            .copied()
            .unwrap_or(0)
    }

    /// 配布IDごとの受取人一覧
    pub fn iter(&self) -> impl Iterator<Item = (DistributionId, &BTreeMap<Address, u128>)> {
        self.0.iter().map(|(id, r)| (*id, r))
    }

    /// 全配布の受取人数の合計
    pub fn entry_count(&self) -> usize {
        self.0.values().map(|r| r.len()).sum()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// CSVから読み込む。
    ///
    /// 列名 `address`（大文字小文字・前後空白を無視）を受取人列とし、
    /// それ以外の列名は配布IDとして解釈する。空欄と `0` は読み飛ばし、
    /// 同じアドレスの行は合算したうえで0以下になったエントリを削除する。
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, MatrixError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mut address_column = None;
        let mut id_columns = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            if header.eq_ignore_ascii_case("address") {
                address_column = Some(index);
            } else {
                let id: DistributionId = header
                    .parse()
                    .map_err(|_| MatrixError::InvalidDistributionId(header.to_string()))?;
                id_columns.push((index, id));
            }
        }
        let address_column = address_column.ok_or(MatrixError::MissingAddressColumn)?;

        let mut totals: BTreeMap<DistributionId, BTreeMap<Address, i128>> = BTreeMap::new();
        for (offset, record) in csv_reader.records().enumerate() {
            let record = record?;
            let row = offset + 2;
            let raw_address = record.get(address_column).unwrap_or_default();
            let address: Address = raw_address.parse().map_err(|_| MatrixError::InvalidAddress {
                row,
                value: raw_address.to_string(),
            })?;

            for (index, id) in &id_columns {
                let value = record.get(*index).unwrap_or_default();
                if value.is_empty() || value == "0" {
                    continue;
                }
                let quantity: i128 = value.parse().map_err(|_| MatrixError::InvalidQuantity {
                    row,
                    column: *id,
                    value: value.to_string(),
                })?;
                *totals.entry(*id).or_default().entry(address).or_insert(0) += quantity;
            }
        }

        let mut matrix = Self::new();
        for (id, recipients) in totals {
            for (address, total) in recipients {
                if total > 0 {
                    matrix.set(id, address, total as u128);
                }
            }
        }
        Ok(matrix)
    }

    /// JSONのジョブファイル `{ "<id>": { "<address>": n } }` から読み込む。
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, MatrixError> {
        let mut matrix: Self = serde_json::from_reader(reader)?;
        for recipients in matrix.0.values_mut() {
            recipients.retain(|_, q| *q > 0);
        }
        matrix.0.retain(|_, r| !r.is_empty());
        Ok(matrix)
    }
}
