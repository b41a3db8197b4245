// 托管钱包数据访问 Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{address_from_db, address_to_db};
use crate::{
    domain::{BalanceSnapshot, EncryptedEnvelope, EscrowWallet, NewEscrowWallet},
    error::{EscrowError, Result},
};

// ============ Repository Trait ============

#[async_trait]
pub trait EscrowWalletRepository: Send + Sync {
    async fn find_by_address(&self, address: Address) -> Result<Option<EscrowWallet>>;

    async fn list(&self, active_only: bool) -> Result<Vec<EscrowWallet>>;

    /// 插入新钱包；地址重复返回 Conflict
    async fn insert(&self, wallet: NewEscrowWallet) -> Result<EscrowWallet>;

    async fn set_active(&self, address: Address, active: bool) -> Result<EscrowWallet>;

    /// 原子地把默认钱包切换到指定地址
    async fn set_default(&self, address: Address) -> Result<EscrowWallet>;

    async fn find_default(&self) -> Result<Option<EscrowWallet>>;

    async fn update_balance(&self, address: Address, snapshot: &BalanceSnapshot) -> Result<()>;
}

// ============ PostgreSQL 实现 ============

const WALLET_COLUMNS: &str = "id, address, label, encrypted_key, key_hash, nonce, is_active, \
     is_default, balance_wei, balance_network_id, balance_refreshed_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct WalletRow {
    id: Uuid,
    address: String,
    label: Option<String>,
    encrypted_key: String,
    key_hash: String,
    nonce: String,
    is_active: bool,
    is_default: bool,
    balance_wei: Option<String>,
    balance_network_id: Option<Uuid>,
    balance_refreshed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WalletRow> for EscrowWallet {
    type Error = EscrowError;

    fn try_from(row: WalletRow) -> Result<Self> {
        let balance = match (row.balance_wei, row.balance_network_id, row.balance_refreshed_at) {
            (Some(wei), Some(network_id), Some(refreshed_at)) => Some(BalanceSnapshot {
                network_id,
                wei: U256::from_dec_str(&wei).map_err(|_| {
                    EscrowError::Database(format!("corrupt balance column: {}", wei))
                })?,
                refreshed_at,
            }),
            _ => None,
        };

        Ok(EscrowWallet {
            id: row.id,
            address: address_from_db(&row.address)?,
            label: row.label,
            envelope: EncryptedEnvelope {
                ciphertext: row.encrypted_key,
                key_hash: row.key_hash,
                nonce: row.nonce,
            },
            is_active: row.is_active,
            is_default: row.is_default,
            balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgEscrowWalletRepository {
    pool: PgPool,
}

impl PgEscrowWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscrowWalletRepository for PgEscrowWalletRepository {
    async fn find_by_address(&self, address: Address) -> Result<Option<EscrowWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM escrow_wallets WHERE address = $1",
            WALLET_COLUMNS
        ))
        .bind(address_to_db(&address))
        .fetch_optional(&self.pool)
        .await?;

        row.map(EscrowWallet::try_from).transpose()
    }

    async fn list(&self, active_only: bool) -> Result<Vec<EscrowWallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM escrow_wallets WHERE ($1 = FALSE OR is_active) ORDER BY created_at",
            WALLET_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EscrowWallet::try_from).collect()
    }

    async fn insert(&self, wallet: NewEscrowWallet) -> Result<EscrowWallet> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "INSERT INTO escrow_wallets (id, address, label, encrypted_key, key_hash, nonce)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(address_to_db(&wallet.address))
        .bind(&wallet.label)
        .bind(&wallet.envelope.ciphertext)
        .bind(&wallet.envelope.key_hash)
        .bind(&wallet.envelope.nonce)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn set_active(&self, address: Address, active: bool) -> Result<EscrowWallet> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "UPDATE escrow_wallets
             SET is_active = $1,
                 is_default = CASE WHEN $1 THEN is_default ELSE FALSE END,
                 updated_at = CURRENT_TIMESTAMP
             WHERE address = $2
             RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(active)
        .bind(address_to_db(&address))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address)))?;

        row.try_into()
    }

    async fn set_default(&self, address: Address) -> Result<EscrowWallet> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE escrow_wallets SET is_default = FALSE, updated_at = CURRENT_TIMESTAMP
             WHERE is_default AND address <> $1",
        )
        .bind(address_to_db(&address))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "UPDATE escrow_wallets SET is_default = TRUE, updated_at = CURRENT_TIMESTAMP
             WHERE address = $1 AND is_active
             RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(address_to_db(&address))
        .fetch_optional(&mut *tx)
        .await?;

        // 未命中时事务随 tx drop 回滚，原默认钱包保持不变
        let row = row.ok_or_else(|| {
            EscrowError::NotFound(format!("active escrow wallet {:?}", address))
        })?;

        tx.commit().await?;
        row.try_into()
    }

    async fn find_default(&self) -> Result<Option<EscrowWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM escrow_wallets WHERE is_default LIMIT 1",
            WALLET_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(EscrowWallet::try_from).transpose()
    }

    async fn update_balance(&self, address: Address, snapshot: &BalanceSnapshot) -> Result<()> {
        let result = sqlx::query(
            "UPDATE escrow_wallets
             SET balance_wei = $1, balance_network_id = $2, balance_refreshed_at = $3
             WHERE address = $4",
        )
        .bind(snapshot.wei.to_string())
        .bind(snapshot.network_id)
        .bind(snapshot.refreshed_at)
        .bind(address_to_db(&address))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EscrowError::NotFound(format!("escrow wallet {:?}", address)));
        }
        Ok(())
    }
}
