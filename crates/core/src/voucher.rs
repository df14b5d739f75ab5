//! # クレームバウチャー
//!
//! Dropperコントラクトの `claim` に渡す署名付きバウチャーを発行・検証する。
//! メッセージのエンコードはコントラクト側の `claimMessageHash` と一致する。
//!
//! | バージョン | 型 |
//! |-----------|----|
//! | 0.1.0 | `ClaimPayload(uint256 claimId,address claimant,uint256 blockDeadline,uint256 amount)` |
//! | 0.2.0 | `ClaimPayload(uint256 dropId,uint256 requestID,address claimant,uint256 blockDeadline,uint256 amount)` |
//!
//! 発行・検証は [`ClaimRequest`] で受け取り、ドメインのバージョンに応じて型を選ぶ。
//! 0.2.0 ではクレームIDをドロップIDとして使い、リクエストIDが必須になる。

use std::io::{Read, Write};

use dropper_crypto::eip712::{self, encode_uint, Eip712Domain, TypedStruct};
use dropper_crypto::{recover_address, Address, Digest32};
use dropper_types::ClaimVoucher;

use crate::authorization::{parse_address, parse_signature, AuthorizationError};
use crate::signer::{batch_sign_verified, sign_verified, Signer};

/// Dropperコントラクトのドメイン名
pub const DROPPER_DOMAIN_NAME: &str = "Moonstream Dropper";
/// ドメインバージョンの既定値
pub const DEFAULT_DROPPER_DOMAIN_VERSION: &str = "0.1.0";
/// 対応しているドメインバージョン
pub const SUPPORTED_DROPPER_DOMAIN_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];

/// クレームメッセージの型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimVersion {
    /// [`ClaimPayload`]
    V1,
    /// [`ClaimPayloadV2`]
    V2,
}

/// Dropperコントラクトのドメイン。
///
/// バージョンは設定で固定し、検証時も同じ値を使う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropperDomain {
    /// チェーンID
    pub chain_id: u64,
    /// Dropperコントラクトのアドレス
    pub contract: Address,
    /// ドメインバージョン
    pub version: String,
}

impl DropperDomain {
    /// 既定バージョンのドメインを構築する。
    pub fn new(chain_id: u64, contract: Address) -> Self {
        Self {
            chain_id,
            contract,
            version: DEFAULT_DROPPER_DOMAIN_VERSION.to_string(),
        }
    }

    /// バージョンを指定してドメインを構築する。未対応のバージョンはエラー。
    pub fn with_version(
        chain_id: u64,
        contract: Address,
        version: impl Into<String>,
    ) -> Result<Self, AuthorizationError> {
        let domain = Self {
            chain_id,
            contract,
            version: version.into(),
        };
        domain.claim_version()?;
        Ok(domain)
    }

    /// バージョンに対応するクレームメッセージの型
    pub fn claim_version(&self) -> Result<ClaimVersion, AuthorizationError> {
        match self.version.as_str() {
            "0.1.0" => Ok(ClaimVersion::V1),
            "0.2.0" => Ok(ClaimVersion::V2),
            other => Err(AuthorizationError::InvalidClaim(format!(
                "未対応のドメインバージョン {other}（対応: {}）",
                SUPPORTED_DROPPER_DOMAIN_VERSIONS.join(", ")
            ))),
        }
    }

    fn eip712(&self) -> Eip712Domain {
        Eip712Domain {
            name: DROPPER_DOMAIN_NAME.to_string(),
            version: self.version.clone(),
            chain_id: Some(self.chain_id),
            verifying_contract: Some(self.contract),
        }
    }
}

/// v0.1 のクレームメッセージ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPayload {
    /// クレームID
    pub claim_id: u64,
    /// 受取人
    pub claimant: Address,
    /// 有効期限（ブロック番号）
    pub block_deadline: u64,
    /// 受取数量
    pub amount: u128,
}

impl TypedStruct for ClaimPayload {
    const TYPE: &'static str =
        "ClaimPayload(uint256 claimId,address claimant,uint256 blockDeadline,uint256 amount)";

    fn encode_fields(&self) -> Vec<[u8; 32]> {
        vec![
            encode_uint(self.claim_id as u128),
            self.claimant.to_word(),
            encode_uint(self.block_deadline as u128),
            encode_uint(self.amount),
        ]
    }
}

impl ClaimPayload {
    /// 署名対象ダイジェスト
    pub fn digest(&self, domain: &DropperDomain) -> Digest32 {
        eip712::signing_digest(&domain.eip712(), self)
    }
}

/// v0.2 のクレームメッセージ。リクエストIDで同一ドロップ内の重複を区別する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPayloadV2 {
    /// ドロップID
    pub drop_id: u64,
    /// リクエストID
    pub request_id: u128,
    /// 受取人
    pub claimant: Address,
    /// 有効期限（ブロック番号）
    pub block_deadline: u64,
    /// 受取数量
    pub amount: u128,
}

impl TypedStruct for ClaimPayloadV2 {
    const TYPE: &'static str = "ClaimPayload(uint256 dropId,uint256 requestID,address claimant,uint256 blockDeadline,uint256 amount)";

    fn encode_fields(&self) -> Vec<[u8; 32]> {
        vec![
            encode_uint(self.drop_id as u128),
            encode_uint(self.request_id),
            self.claimant.to_word(),
            encode_uint(self.block_deadline as u128),
            encode_uint(self.amount),
        ]
    }
}

impl ClaimPayloadV2 {
    /// 署名対象ダイジェスト
    pub fn digest(&self, domain: &DropperDomain) -> Digest32 {
        eip712::signing_digest(&domain.eip712(), self)
    }
}

/// バージョンに依存しないクレーム内容。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    /// クレームID（0.2.0 ではドロップID）
    pub claim_id: u64,
    /// リクエストID（0.2.0 のみ）
    pub request_id: Option<u128>,
    /// 受取人
    pub claimant: Address,
    /// 有効期限（ブロック番号）
    pub block_deadline: u64,
    /// 受取数量
    pub amount: u128,
}

impl ClaimRequest {
    /// ドメインのバージョンに応じた型で署名対象ダイジェストを計算する。
    pub fn digest(&self, domain: &DropperDomain) -> Result<Digest32, AuthorizationError> {
        match (domain.claim_version()?, self.request_id) {
            (ClaimVersion::V1, None) => Ok(ClaimPayload {
                claim_id: self.claim_id,
                claimant: self.claimant,
                block_deadline: self.block_deadline,
                amount: self.amount,
            }
            .digest(domain)),
            (ClaimVersion::V2, Some(request_id)) => Ok(ClaimPayloadV2 {
                drop_id: self.claim_id,
                request_id,
                claimant: self.claimant,
                block_deadline: self.block_deadline,
                amount: self.amount,
            }
            .digest(domain)),
            (ClaimVersion::V1, Some(_)) => Err(AuthorizationError::InvalidClaim(format!(
                "リクエストIDはドメインバージョン 0.2.0 でのみ使えます（現在 {}）",
                domain.version
            ))),
            (ClaimVersion::V2, None) => Err(AuthorizationError::InvalidClaim(
                "ドメインバージョン 0.2.0 にはリクエストIDが必要です".to_string(),
            )),
        }
    }

    fn to_voucher(self, signature: String) -> ClaimVoucher {
        ClaimVoucher {
            claimant_address: self.claimant.to_string(),
            amount: self.amount,
            claim_id: self.claim_id,
            request_id: self.request_id,
            block_deadline: self.block_deadline,
            signature,
        }
    }
}

/// クレームバウチャーを1件発行する。
pub async fn issue_claim_voucher(
    signer: &dyn Signer,
    domain: &DropperDomain,
    claim: &ClaimRequest,
) -> Result<ClaimVoucher, AuthorizationError> {
    let signature = sign_verified(signer, &claim.digest(domain)?).await?;
    Ok(claim.to_voucher(signature.to_hex()))
}

/// クレームバウチャーを一括発行する。署名は1回の一括呼び出しで取得する。
pub async fn issue_claim_vouchers(
    signer: &dyn Signer,
    domain: &DropperDomain,
    claims: &[ClaimRequest],
) -> Result<Vec<ClaimVoucher>, AuthorizationError> {
    let digests = claims
        .iter()
        .map(|c| c.digest(domain))
        .collect::<Result<Vec<Digest32>, _>>()?;
    let signatures = batch_sign_verified(signer, &digests).await?;
    Ok(claims
        .iter()
        .zip(signatures)
        .map(|(claim, sig)| claim.to_voucher(sig.to_hex()))
        .collect())
}

/// クレームバウチャーを検証する。
///
/// `current_block >= block_deadline` なら期限切れ、
/// 署名者が `expected_signer` でなければ [`AuthorizationError::SignerMismatch`]。
pub fn verify_claim_voucher(
    voucher: &ClaimVoucher,
    domain: &DropperDomain,
    expected_signer: Address,
    current_block: u64,
) -> Result<(), AuthorizationError> {
    if current_block >= voucher.block_deadline {
        return Err(AuthorizationError::AuthorizationExpired {
            deadline: voucher.block_deadline,
            now: current_block,
        });
    }
    let claim = ClaimRequest {
        claim_id: voucher.claim_id,
        request_id: voucher.request_id,
        claimant: parse_address(&voucher.claimant_address)?,
        block_deadline: voucher.block_deadline,
        amount: voucher.amount,
    };
    let digest = claim.digest(domain)?;
    let signature = parse_signature(&voucher.signature)?;
    let recovered = recover_address(&digest, &signature)
        .map_err(|e| AuthorizationError::MalformedSignature(e.to_string()))?;
    if recovered != expected_signer {
        return Err(AuthorizationError::SignerMismatch {
            declared: expected_signer,
            recovered,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV入出力
// ---------------------------------------------------------------------------

/// バウチャー発行対象の1行（`address,amount,block_deadline[,request_id]`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRow {
    /// 受取人
    pub claimant: Address,
    /// 受取数量
    pub amount: u128,
    /// 有効期限（ブロック番号）
    pub block_deadline: u64,
    /// リクエストID（4列目、省略可）
    pub request_id: Option<u128>,
}

impl ClaimRow {
    /// クレームIDを付与してクレーム内容に変換する。
    /// 行にリクエストIDがなければ `default_request_id` を使う。
    pub fn into_request(self, claim_id: u64, default_request_id: Option<u128>) -> ClaimRequest {
        ClaimRequest {
            claim_id,
            request_id: self.request_id.or(default_request_id),
            claimant: self.claimant,
            block_deadline: self.block_deadline,
            amount: self.amount,
        }
    }
}

/// CSVからバウチャー発行対象を読み込む。解析できない行は警告を出して読み飛ばす。
pub fn read_claim_rows<R: Read>(reader: R, has_header: bool) -> Result<Vec<ClaimRow>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let parsed = (|| {
            let claimant: Address = record.get(0)?.parse().ok()?;
            let amount: u128 = record.get(1)?.parse().ok()?;
            let block_deadline: u64 = record.get(2)?.parse().ok()?;
            let request_id = match record.get(3).filter(|s| !s.is_empty()) {
                Some(s) => Some(s.parse::<u128>().ok()?),
                None => None,
            };
            Some(ClaimRow {
                claimant,
                amount,
                block_deadline,
                request_id,
            })
        })();
        match parsed {
            Some(row) => rows.push(row),
            None => tracing::warn!(row = index, record = ?record, "解析できない行を読み飛ばします"),
        }
    }
    Ok(rows)
}

/// バウチャーをCSVで書き出す。リクエストIDを持つバウチャーがあれば `request_id` 列を加える。
pub fn write_vouchers_csv<W: Write>(writer: W, vouchers: &[ClaimVoucher]) -> Result<(), csv::Error> {
    let with_request_id = vouchers.iter().any(|v| v.request_id.is_some());
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![
        "claimant_address",
        "amount",
        "signature",
        "claim_block_deadline",
        "claim_id",
    ];
    if with_request_id {
        header.push("request_id");
    }
    csv_writer.write_record(&header)?;
    for v in vouchers {
        let mut record = vec![
            v.claimant_address.clone(),
            v.amount.to_string(),
            v.signature.clone(),
            v.block_deadline.to_string(),
            v.claim_id.to_string(),
        ];
        if with_request_id {
            record.push(v.request_id.map(|id| id.to_string()).unwrap_or_default());
        }
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalSigner;
    use dropper_crypto::Secp256k1SigningKey;

    fn mumbai_v2_domain() -> DropperDomain {
        DropperDomain {
            chain_id: 80001,
            contract: "0x4ec36e288e1b5d6914851a141cb041152cf95328".parse().unwrap(),
            version: "0.2.0".to_string(),
        }
    }

    /// デプロイ済み v0.2.0 コントラクトの claimMessageHash と一致する
    #[test]
    fn test_claim_v2_matches_deployed_contract() {
        let claim = ClaimPayloadV2 {
            drop_id: 2,
            request_id: 5,
            claimant: "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
            block_deadline: 40_000_000,
            amount: 3_000_000_000_000_000_000,
        };
        assert_eq!(
            hex::encode(claim.digest(&mumbai_v2_domain())),
            "48033e41d47cd4cbfe7cd183e1c30ad6af92ea445475913bf96eed42d599bf20"
        );
    }

    /// 0.1.0 のダイジェストを固定値と照合する。
    /// 期待値は型ハッシュ・ドメイン区切り値・各フィールドをKeccak-256で別途組み立てて求めた
    #[test]
    fn test_claim_v1_digest_fixed_vector() {
        let claim = ClaimPayload {
            claim_id: 2,
            claimant: "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
            block_deadline: 40_000_000,
            amount: 3_000_000_000_000_000_000,
        };
        let domain = domain();
        assert_eq!(
            hex::encode(dropper_crypto::keccak256(ClaimPayload::TYPE.as_bytes())),
            "36c7134872d6fce853e1f562eb2ab445fdc93ba91cebe27fd2fc3be730f8c52c"
        );
        assert_eq!(
            hex::encode(domain.eip712().separator()),
            "635d8003ac9ae108d4ae5e0f345387d4afd7890c325f96aba958cfe71a5962f3"
        );
        assert_eq!(
            hex::encode(claim.digest(&domain)),
            "56564439c28a8a98e7ace0fc833ce9ea26c4d97f47aad1467213fe5ed2daa2fd"
        );

        let request = ClaimRequest {
            claim_id: 2,
            request_id: None,
            claimant: claim.claimant,
            block_deadline: claim.block_deadline,
            amount: claim.amount,
        };
        assert_eq!(request.digest(&domain).unwrap(), claim.digest(&domain));
    }

    #[test]
    fn test_claim_request_selects_v2_by_domain_version() {
        let request = ClaimRequest {
            claim_id: 2,
            request_id: Some(5),
            claimant: "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
            block_deadline: 40_000_000,
            amount: 3_000_000_000_000_000_000,
        };
        assert_eq!(
            hex::encode(request.digest(&mumbai_v2_domain()).unwrap()),
            "48033e41d47cd4cbfe7cd183e1c30ad6af92ea445475913bf96eed42d599bf20"
        );
        assert!(matches!(
            request.digest(&domain()),
            Err(AuthorizationError::InvalidClaim(_))
        ));
        let without_request_id = ClaimRequest {
            request_id: None,
            ..request
        };
        assert!(matches!(
            without_request_id.digest(&mumbai_v2_domain()),
            Err(AuthorizationError::InvalidClaim(_))
        ));
    }

    #[test]
    fn test_unknown_domain_version_is_rejected() {
        let contract = "0x4ec36e288e1b5d6914851a141cb041152cf95328".parse().unwrap();
        assert!(DropperDomain::with_version(80001, contract, "0.2.0").is_ok());
        assert!(matches!(
            DropperDomain::with_version(80001, contract, "0.3.0"),
            Err(AuthorizationError::InvalidClaim(_))
        ));
    }

    #[tokio::test]
    async fn test_issue_and_verify_v2_voucher() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let request = ClaimRequest {
            request_id: Some(11),
            ..sample_claim()
        };
        let voucher = issue_claim_voucher(&signer, &mumbai_v2_domain(), &request)
            .await
            .unwrap();
        assert_eq!(voucher.request_id, Some(11));
        assert!(verify_claim_voucher(&voucher, &mumbai_v2_domain(), signer.address(), 999).is_ok());

        // 別のリクエストIDでは署名者が一致しない
        let mut replayed = voucher.clone();
        replayed.request_id = Some(12);
        assert!(matches!(
            verify_claim_voucher(&replayed, &mumbai_v2_domain(), signer.address(), 999),
            Err(AuthorizationError::SignerMismatch { .. })
        ));
    }

    fn sample_claim() -> ClaimRequest {
        ClaimRequest {
            claim_id: 7,
            request_id: None,
            claimant: "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
            block_deadline: 1_000,
            amount: 42,
        }
    }

    fn domain() -> DropperDomain {
        DropperDomain::new(80001, "0x4ec36e288e1b5d6914851a141cb041152cf95328".parse().unwrap())
    }

    #[tokio::test]
    async fn test_issue_and_verify_claim_voucher() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let voucher = issue_claim_voucher(&signer, &domain(), &sample_claim())
            .await
            .unwrap();

        assert_eq!(voucher.claim_id, 7);
        assert_eq!(voucher.amount, 42);
        assert!(verify_claim_voucher(&voucher, &domain(), signer.address(), 999).is_ok());
    }

    #[tokio::test]
    async fn test_claim_voucher_expires_at_block_deadline() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let voucher = issue_claim_voucher(&signer, &domain(), &sample_claim())
            .await
            .unwrap();
        assert!(matches!(
            verify_claim_voucher(&voucher, &domain(), signer.address(), 1_000),
            Err(AuthorizationError::AuthorizationExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_voucher_tampered_amount() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let mut voucher = issue_claim_voucher(&signer, &domain(), &sample_claim())
            .await
            .unwrap();
        voucher.amount = 4_200;
        assert!(matches!(
            verify_claim_voucher(&voucher, &domain(), signer.address(), 10),
            Err(AuthorizationError::SignerMismatch { .. })
        ));
    }

    /// 別バージョンのドメインで検証すると一致しない
    #[tokio::test]
    async fn test_claim_voucher_pinned_domain_version() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let voucher = issue_claim_voucher(&signer, &domain(), &sample_claim())
            .await
            .unwrap();
        let other = DropperDomain {
            version: "0.2.0".into(),
            ..domain()
        };
        assert!(matches!(
            verify_claim_voucher(&voucher, &other, signer.address(), 10),
            Err(AuthorizationError::SignerMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_issue_claim_vouchers_batch() {
        let signer = LocalSigner::new(Secp256k1SigningKey::random(&mut rand::rngs::OsRng));
        let claims: Vec<ClaimRequest> = (0..3u128)
            .map(|i| ClaimRequest {
                amount: 10 + i,
                ..sample_claim()
            })
            .collect();
        let vouchers = issue_claim_vouchers(&signer, &domain(), &claims).await.unwrap();
        assert_eq!(vouchers.len(), 3);
        for v in &vouchers {
            assert!(verify_claim_voucher(v, &domain(), signer.address(), 1).is_ok());
        }
    }

    #[test]
    fn test_read_claim_rows_skips_bad_lines() {
        let csv = "address,amount,block_deadline\n\
                   0x000000000000000000000000000000000000dEaD,5,100\n\
                   not-an-address,5,100\n\
                   0x000000000000000000000000000000000000dEaD,abc,100\n\
                   0x000000000000000000000000000000000000dead, 7 ,200\n\
                   0x000000000000000000000000000000000000dead,1,300,9\n\
                   0x000000000000000000000000000000000000dead,1,300,x\n";
        let rows = read_claim_rows(csv.as_bytes(), true).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].amount, 7);
        assert_eq!(rows[1].block_deadline, 200);
        assert_eq!(rows[1].request_id, None);
        assert_eq!(rows[2].request_id, Some(9));
        assert_eq!(rows[1].into_request(4, Some(1)).request_id, Some(1));
        assert_eq!(rows[2].into_request(4, Some(1)).request_id, Some(9));
    }

    #[test]
    fn test_write_vouchers_csv_header() {
        let voucher = ClaimVoucher {
            claimant_address: "0xA".into(),
            amount: 1,
            claim_id: 2,
            request_id: None,
            block_deadline: 3,
            signature: "0xsig".into(),
        };
        let mut out = Vec::new();
        write_vouchers_csv(&mut out, &[voucher]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "claimant_address,amount,signature,claim_block_deadline,claim_id\n0xA,1,0xsig,3,2\n"
        );
    }
}
