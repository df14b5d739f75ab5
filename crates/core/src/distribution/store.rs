//! # チェックポイントとエラーログの永続化
//!
//! バッチの結果は追記専用のジャーナル（JSON Lines）に1行ずつ書き込み、
//! 書き込みごとに `fsync` してから次のバッチに進む。
//! [`JournalStore::compact`] はジャーナルをスナップショットにまとめて切り詰める。
//!
//! ## ディレクトリ構成
//! - `journal.jsonl`: 追記専用ジャーナル（各行に連番 `seq`）
//! - `snapshot.json`: 圧縮済みの状態と、取り込み済みの最終 `seq`
//!
//! スナップショットより古い `seq` の行は再生時に読み飛ばすため、
//! 圧縮の途中で停止しても二重に適用されない。

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dropper_crypto::Address;
use dropper_types::{CheckpointEntry, DistributionId, ErrorLogEntry};

const JOURNAL_FILE: &str = "journal.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// 永続化のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// ファイル入出力に失敗
    #[error("ストレージの入出力に失敗: {0}")]
    Io(#[from] std::io::Error),
    /// シリアライズに失敗
    #[error("シリアライズに失敗: {0}")]
    Serialize(#[from] serde_json::Error),
    /// 保存内容が壊れている
    #[error("保存内容が不正です: {0}")]
    Corrupt(String),
}

/// 失敗したバッチ（エラーログの1エントリ）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBatch {
    /// 配布ID
    pub distribution_id: DistributionId,
    /// 受取人
    pub recipients: Vec<Address>,
    /// 1人あたりの数量
    pub amount: u128,
    /// 送信済みでレシートを確認できなかったトランザクション
    pub tx: Option<String>,
}

impl From<&FailedBatch> for ErrorLogEntry {
    fn from(batch: &FailedBatch) -> Self {
        ErrorLogEntry(
            batch.distribution_id,
            batch.recipients.iter().map(|a| a.to_string()).collect(),
            batch.amount,
        )
    }
}

impl TryFrom<ErrorLogEntry> for FailedBatch {
    type Error = StoreError;

    fn try_from(entry: ErrorLogEntry) -> Result<Self, Self::Error> {
        let recipients = entry
            .1
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|e| StoreError::Corrupt(format!("エラーログのアドレス {s}: {e}")))
            })
            .collect::<Result<Vec<Address>, _>>()?;
        Ok(Self {
            distribution_id: entry.0,
            recipients,
            amount: entry.2,
            tx: None,
        })
    }
}

/// チェックポイントのキー `"{address}-{distribution_id}"`
pub fn checkpoint_key(recipient: &Address, distribution_id: DistributionId) -> String {
    format!("{recipient}-{distribution_id}")
}

fn parse_checkpoint_key(key: &str) -> Result<(Address, DistributionId), StoreError> {
    let (address, id) = key
        .rsplit_once('-')
        .ok_or_else(|| StoreError::Corrupt(format!("チェックポイントのキーが不正: {key}")))?;
    let address = address
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("チェックポイントのキー {key}: {e}")))?;
    let id = id
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("チェックポイントのキー {key}")))?;
    Ok((address, id))
}

// ---------------------------------------------------------------------------
// 状態
// ---------------------------------------------------------------------------

/// チェックポイントと未解決エラーログを再生した結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionState {
    checkpoint: BTreeMap<(Address, DistributionId), Vec<CheckpointEntry>>,
    errors: Vec<FailedBatch>,
}

impl DistributionState {
    /// 配布済み数量の合計
    pub fn delivered(&self, distribution_id: DistributionId, recipient: &Address) -> u128 {
        self.checkpoint
            .get(&(*recipient, distribution_id))
            .map(|entries| entries.iter().fold(0u128, |sum, e| sum.saturating_add(e.0)))
            .unwrap_or(0)
    }

    /// 未解決の失敗バッチに含まれる数量の合計
    pub fn outstanding(&self, distribution_id: DistributionId, recipient: &Address) -> u128 {
        self.errors
            .iter()
            .filter(|b| b.distribution_id == distribution_id && b.recipients.contains(recipient))
            .fold(0u128, |sum, b| sum.saturating_add(b.amount))
    }

    /// 受取人のチェックポイント
    pub fn checkpoint_entries(
        &self,
        distribution_id: DistributionId,
        recipient: &Address,
    ) -> &[CheckpointEntry] {
        self.checkpoint
            .get(&(*recipient, distribution_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 未解決の失敗バッチ
    pub fn unresolved(&self) -> &[FailedBatch] {
        &self.errors
    }

    /// チェックポイントを外部形式に変換する。
    pub fn checkpoint_snapshot(&self) -> BTreeMap<String, Vec<CheckpointEntry>> {
        self.checkpoint
            .iter()
            .map(|((address, id), entries)| (checkpoint_key(address, *id), entries.clone()))
            .collect()
    }

    /// エラーログを外部形式に変換する。
    pub fn error_log_snapshot(&self) -> Vec<ErrorLogEntry> {
        self.errors.iter().map(ErrorLogEntry::from).collect()
    }

    /// 送信済みトランザクションのあるエラーログエントリ（インデックス → tx）
    fn pending_tx_snapshot(&self) -> BTreeMap<usize, String> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(index, b)| b.tx.clone().map(|tx| (index, tx)))
            .collect()
    }

    fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StoreError> {
        let mut state = Self::default();
        for (key, entries) in &snapshot.checkpoint {
            let parsed = parse_checkpoint_key(key)?;
            state
                .checkpoint
                .entry(parsed)
                .or_default()
                .extend(entries.iter().cloned());
        }
        for (index, entry) in snapshot.errors.iter().enumerate() {
            let mut batch = FailedBatch::try_from(entry.clone())?;
            batch.tx = snapshot.pending_tx.get(&index).cloned();
            state.errors.push(batch);
        }
        Ok(state)
    }

    fn apply(&mut self, line: &JournalLine) {
        match line.op {
            JournalOp::Delivered => {
                let tx = line.tx.clone().unwrap_or_default();
                for recipient in &line.recipients {
                    self.checkpoint
                        .entry((*recipient, line.distribution_id))
                        .or_default()
                        .push(CheckpointEntry(line.amount, tx.clone()));
                }
            }
            JournalOp::Failed => self.errors.push(FailedBatch {
                distribution_id: line.distribution_id,
                recipients: line.recipients.clone(),
                amount: line.amount,
                tx: line.tx.clone(),
            }),
            JournalOp::Resolved => {
                let position = self.errors.iter().position(|b| {
                    b.distribution_id == line.distribution_id
                        && b.amount == line.amount
                        && b.recipients == line.recipients
                });
                if let Some(index) = position {
                    self.errors.remove(index);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ジャーナル
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JournalOp {
    Delivered,
    Failed,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalLine {
    seq: u64,
    op: JournalOp,
    distribution_id: DistributionId,
    recipients: Vec<Address>,
    amount: u128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tx: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    journal_seq: u64,
    checkpoint: BTreeMap<String, Vec<CheckpointEntry>>,
    errors: Vec<ErrorLogEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pending_tx: BTreeMap<usize, String>,
}

/// ジャーナル方式の永続ストア。
pub struct JournalStore {
    dir: PathBuf,
    journal: File,
    next_seq: u64,
    state: DistributionState,
}

impl JournalStore {
    /// ディレクトリを開く（なければ作成する）。スナップショットを読み込んでジャーナルを再生する。
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let snapshot: Snapshot = if snapshot_path.exists() {
            serde_json::from_reader(File::open(&snapshot_path)?)?
        } else {
            Snapshot::default()
        };
        let mut state = DistributionState::from_snapshot(&snapshot)?;
        let mut last_seq = snapshot.journal_seq;

        let journal_path = dir.join(JOURNAL_FILE);
        let mut journal = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&journal_path)?;

        let mut content = String::new();
        journal.read_to_string(&mut content)?;
        let mut offset = 0usize;
        let mut replayed = 0usize;
        let mut lines = content.split_inclusive('\n').peekable();
        while let Some(raw) = lines.next() {
            let is_last = lines.peek().is_none();
            let text = raw.trim_end();
            if text.is_empty() {
                offset += raw.len();
                continue;
            }
            match serde_json::from_str::<JournalLine>(text) {
                Ok(line) => {
                    if line.seq > snapshot.journal_seq {
                        state.apply(&line);
                        replayed += 1;
                    }
                    last_seq = last_seq.max(line.seq);
                    if is_last && !raw.ends_with('\n') {
                        // 改行の直前で停止した行は有効なので、終端だけ補う
                        journal.write_all(b"\n")?;
                        journal.sync_data()?;
                    }
                }
                Err(_) if is_last && !raw.ends_with('\n') => {
                    tracing::warn!(
                        journal = %journal_path.display(),
                        offset,
                        "書き込み途中で途切れたジャーナル行を破棄します"
                    );
                    journal.set_len(offset as u64)?;
                    journal.sync_data()?;
                    break;
                }
                Err(e) => {
                    return Err(StoreError::Corrupt(format!(
                        "{} のオフセット {offset}: {e}",
                        journal_path.display()
                    )));
                }
            }
            offset += raw.len();
        }

        tracing::debug!(dir = %dir.display(), replayed, "ジャーナルを再生しました");
        Ok(Self {
            dir,
            journal,
            next_seq: last_seq + 1,
            state,
        })
    }

    /// 現在の状態
    pub fn state(&self) -> &DistributionState {
        &self.state
    }

    /// ストアのディレクトリ
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(
        &mut self,
        op: JournalOp,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
        tx: Option<&str>,
    ) -> Result<(), StoreError> {
        let line = JournalLine {
            seq: self.next_seq,
            op,
            distribution_id,
            recipients: recipients.to_vec(),
            amount,
            tx: tx.map(str::to_string),
        };
        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        self.journal.write_all(&bytes)?;
        self.journal.sync_data()?;
        self.next_seq += 1;
        self.state.apply(&line);
        Ok(())
    }

    /// 成功したバッチを記録する。
    pub fn record_delivered(
        &mut self,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
        tx: &str,
    ) -> Result<(), StoreError> {
        self.append(JournalOp::Delivered, distribution_id, recipients, amount, Some(tx))
    }

    /// 失敗したバッチを記録する。
    ///
    /// 送信後にレシートを確認できなかった場合は `tx` にトランザクションハッシュを残す。
    pub fn record_failed(
        &mut self,
        distribution_id: DistributionId,
        recipients: &[Address],
        amount: u128,
        tx: Option<&str>,
    ) -> Result<(), StoreError> {
        self.append(JournalOp::Failed, distribution_id, recipients, amount, tx)
    }

    /// 失敗バッチを解決済みにする。
    pub fn record_resolved(&mut self, batch: &FailedBatch) -> Result<(), StoreError> {
        self.append(
            JournalOp::Resolved,
            batch.distribution_id,
            &batch.recipients,
            batch.amount,
            None,
        )
    }

    /// ジャーナルをスナップショットに圧縮し、ジャーナルを空にする。
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            journal_seq: self.next_seq - 1,
            checkpoint: self.state.checkpoint_snapshot(),
            errors: self.state.error_log_snapshot(),
            pending_tx: self.state.pending_tx_snapshot(),
        };
        write_atomically(&self.dir, SNAPSHOT_FILE, &serde_json::to_vec(&snapshot)?)?;
        self.journal.set_len(0)?;
        self.journal.sync_data()?;
        tracing::info!(dir = %self.dir.display(), seq = snapshot.journal_seq, "ジャーナルを圧縮しました");
        Ok(())
    }

    /// チェックポイントとエラーログを外部形式のJSONファイルに書き出す。
    pub fn export(&self, checkpoint_path: &Path, errors_path: &Path) -> Result<(), StoreError> {
        let checkpoint = serde_json::to_vec_pretty(&self.state.checkpoint_snapshot())?;
        let errors = serde_json::to_vec_pretty(&self.state.error_log_snapshot())?;
        write_file_synced(checkpoint_path, &checkpoint)?;
        write_file_synced(errors_path, &errors)?;
        Ok(())
    }

    /// 外部形式のチェックポイント・エラーログをジャーナルに取り込む。
    pub fn import(
        &mut self,
        checkpoint_path: Option<&Path>,
        errors_path: Option<&Path>,
    ) -> Result<(), StoreError> {
        if let Some(path) = checkpoint_path {
            let checkpoint: BTreeMap<String, Vec<CheckpointEntry>> =
                serde_json::from_reader(File::open(path)?)?;
            for (key, entries) in checkpoint {
                let (address, id) = parse_checkpoint_key(&key)?;
                for CheckpointEntry(amount, tx) in entries {
                    self.record_delivered(id, &[address], amount, &tx)?;
                }
            }
        }
        if let Some(path) = errors_path {
            let errors: Vec<ErrorLogEntry> = serde_json::from_reader(File::open(path)?)?;
            for entry in errors {
                let batch = FailedBatch::try_from(entry)?;
                self.record_failed(batch.distribution_id, &batch.recipients, batch.amount, None)?;
            }
        }
        Ok(())
    }
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// 一時ファイルに書いてからリネームする。
fn write_atomically(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!("{name}.tmp"));
    write_file_synced(&tmp, bytes)?;
    fs::rename(&tmp, dir.join(name))?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_delivered(1, &[addr(1), addr(2)], 5, "0xaa").unwrap();
            store.record_failed(1, &[addr(3)], 5, None).unwrap();
        }

        let store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 5);
        assert_eq!(store.state().delivered(1, &addr(2)), 5);
        assert_eq!(store.state().outstanding(1, &addr(3)), 5);
        assert_eq!(store.state().outstanding(2, &addr(3)), 0);
    }

    #[test]
    fn test_resolved_removes_one_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::open(dir.path()).unwrap();
        store.record_failed(1, &[addr(1)], 5, None).unwrap();
        store.record_failed(1, &[addr(1)], 5, None).unwrap();

        let batch = store.state().unresolved()[0].clone();
        store.record_resolved(&batch).unwrap();
        assert_eq!(store.state().unresolved().len(), 1);
        assert_eq!(store.state().outstanding(1, &addr(1)), 5);
    }

    #[test]
    fn test_snapshot_format() {
        let dir = tempfile::tempdir().unwrap();
        let a: Address = "0x000000000000000000000000000000000000dEaD".parse().unwrap();
        let mut store = JournalStore::open(dir.path()).unwrap();
        store.record_delivered(1, &[a], 5, "0xtx").unwrap();
        store.record_failed(2, &[a], 3, None).unwrap();

        let checkpoint = serde_json::to_value(store.state().checkpoint_snapshot()).unwrap();
        assert_eq!(
            checkpoint,
            serde_json::json!({"0x000000000000000000000000000000000000dEaD-1": [[5, "0xtx"]]})
        );
        let errors = serde_json::to_value(store.state().error_log_snapshot()).unwrap();
        assert_eq!(
            errors,
            serde_json::json!([[2, ["0x000000000000000000000000000000000000dEaD"], 3]])
        );
    }

    #[test]
    fn test_compact_then_reopen_does_not_double_apply() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_delivered(1, &[addr(1)], 5, "0x1").unwrap();
            store.compact().unwrap();
            store.record_delivered(1, &[addr(1)], 2, "0x2").unwrap();
        }
        let store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 7);
        assert_eq!(store.state().checkpoint_entries(1, &addr(1)).len(), 2);
    }

    /// スナップショット書き込み後、ジャーナル切り詰め前に停止した場合
    #[test]
    fn test_snapshot_written_but_journal_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let journal_copy;
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_delivered(1, &[addr(1)], 5, "0x1").unwrap();
            journal_copy = fs::read(dir.path().join(JOURNAL_FILE)).unwrap();
            store.compact().unwrap();
        }
        fs::write(dir.path().join(JOURNAL_FILE), journal_copy).unwrap();

        let store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 5);
    }

    #[test]
    fn test_torn_last_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_delivered(1, &[addr(1)], 5, "0x1").unwrap();
        }
        let journal_path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&journal_path).unwrap();
        file.write_all(br#"{"seq":2,"op":"deliv"#).unwrap();
        drop(file);

        let mut store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 5);

        // 破棄後も追記を続けられる
        store.record_delivered(1, &[addr(1)], 1, "0x2").unwrap();
        drop(store);
        let store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 6);
    }

    /// 改行だけが書けずに停止した行は有効な記録として残り、その後も追記できる
    #[test]
    fn test_unterminated_complete_last_line_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_delivered(1, &[addr(1)], 5, "0x1").unwrap();
        }
        let journal_path = dir.path().join(JOURNAL_FILE);
        let mut content = fs::read(&journal_path).unwrap();
        assert_eq!(content.pop(), Some(b'\n'));
        fs::write(&journal_path, content).unwrap();

        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            assert_eq!(store.state().delivered(1, &addr(1)), 5);
            store.record_delivered(1, &[addr(1)], 2, "0x2").unwrap();
        }

        let store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().delivered(1, &addr(1)), 7);
        assert_eq!(store.state().checkpoint_entries(1, &addr(1)).len(), 2);
    }

    #[test]
    fn test_pending_tx_survives_reopen_and_compact() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JournalStore::open(dir.path()).unwrap();
            store.record_failed(1, &[addr(1)], 5, Some("0xpending")).unwrap();
            store.record_failed(1, &[addr(2)], 5, None).unwrap();
        }
        let mut store = JournalStore::open(dir.path()).unwrap();
        assert_eq!(store.state().unresolved()[0].tx.as_deref(), Some("0xpending"));
        store.compact().unwrap();
        drop(store);

        let store = JournalStore::open(dir.path()).unwrap();
        let unresolved = store.state().unresolved();
        assert_eq!(unresolved[0].tx.as_deref(), Some("0xpending"));
        assert_eq!(unresolved[1].tx, None);
        // 外部形式のエラーログは3要素のまま
        assert_eq!(
            serde_json::to_value(store.state().error_log_snapshot()).unwrap()[0]
                .as_array()
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_corrupt_middle_line_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(JOURNAL_FILE), "garbage\n{}\n").unwrap();
        assert!(matches!(
            JournalStore::open(dir.path()),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_export_and_import() {
        let src = tempfile::tempdir().unwrap();
        let mut store = JournalStore::open(src.path().join("store")).unwrap();
        store.record_delivered(4, &[addr(1)], 2, "0xab").unwrap();
        store.record_failed(4, &[addr(2), addr(3)], 2, None).unwrap();

        let checkpoint_path = src.path().join("checkpoint.json");
        let errors_path = src.path().join("errors.json");
        store.export(&checkpoint_path, &errors_path).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let mut imported = JournalStore::open(dst.path()).unwrap();
        imported
            .import(Some(&checkpoint_path), Some(&errors_path))
            .unwrap();
        assert_eq!(imported.state(), store.state());
    }
}
