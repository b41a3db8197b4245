// 已部署合约数据访问 Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{address_from_db, address_to_db, hash_from_db, optional_address_from_db};
use crate::{
    domain::{ContractType, DeployedContractRecord, NewContractRecord},
    error::{EscrowError, Result},
};

#[async_trait]
pub trait ContractRepository: Send + Sync {
    /// 插入激活记录；TBA 类型会在同一事务内停用同网络同类型的旧记录
    async fn insert(&self, record: NewContractRecord) -> Result<DeployedContractRecord>;

    /// 重新激活已有的 TBA 记录（同样原子地停用当前激活记录）
    async fn activate(&self, id: Uuid) -> Result<DeployedContractRecord>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeployedContractRecord>>;

    async fn find_by_address(
        &self,
        network_id: Uuid,
        address: Address,
    ) -> Result<Option<DeployedContractRecord>>;

    async fn find_active(
        &self,
        network_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Option<DeployedContractRecord>>;

    async fn list(
        &self,
        network_id: Uuid,
        contract_type: Option<ContractType>,
    ) -> Result<Vec<DeployedContractRecord>>;
}

const CONTRACT_COLUMNS: &str = "id, network_id, contract_type, address, tx_hash, deployer, \
     is_active, name, symbol, tba_registry, tba_implementation, created_at";

#[derive(Debug, FromRow)]
struct ContractRow {
    id: Uuid,
    network_id: Uuid,
    contract_type: String,
    address: String,
    tx_hash: String,
    deployer: String,
    is_active: bool,
    name: Option<String>,
    symbol: Option<String>,
    tba_registry: Option<String>,
    tba_implementation: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ContractRow> for DeployedContractRecord {
    type Error = EscrowError;

    fn try_from(row: ContractRow) -> Result<Self> {
        Ok(DeployedContractRecord {
            id: row.id,
            network_id: row.network_id,
            contract_type: row.contract_type.parse().map_err(|_| {
                EscrowError::Database(format!("corrupt contract type: {}", row.contract_type))
            })?,
            address: address_from_db(&row.address)?,
            tx_hash: hash_from_db(&row.tx_hash)?,
            deployer: address_from_db(&row.deployer)?,
            is_active: row.is_active,
            name: row.name,
            symbol: row.symbol,
            tba_registry: optional_address_from_db(row.tba_registry)?,
            tba_implementation: optional_address_from_db(row.tba_implementation)?,
            created_at: row.created_at,
        })
    }
}

pub struct PgContractRepository {
    pool: PgPool,
}

impl PgContractRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn deactivate_others(
        tx: &mut Transaction<'_, Postgres>,
        network_id: Uuid,
        contract_type: ContractType,
        keep: Option<Uuid>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE deployed_contracts SET is_active = FALSE
             WHERE network_id = $1 AND contract_type = $2 AND is_active
               AND ($3::UUID IS NULL OR id <> $3)",
        )
        .bind(network_id)
        .bind(contract_type.as_str())
        .bind(keep)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContractRepository for PgContractRepository {
    async fn insert(&self, record: NewContractRecord) -> Result<DeployedContractRecord> {
        let mut tx = self.pool.begin().await?;

        if record.contract_type.is_tba() {
            let deactivated =
                Self::deactivate_others(&mut tx, record.network_id, record.contract_type, None)
                    .await?;
            tracing::debug!(
                network_id = %record.network_id,
                contract_type = %record.contract_type,
                deactivated,
                "Deactivated previous TBA contract records"
            );
        }

        let row = sqlx::query_as::<_, ContractRow>(&format!(
            "INSERT INTO deployed_contracts
                (id, network_id, contract_type, address, tx_hash, deployer, is_active,
                 name, symbol, tba_registry, tba_implementation)
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $9, $10)
             RETURNING {}",
            CONTRACT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(record.network_id)
        .bind(record.contract_type.as_str())
        .bind(address_to_db(&record.address))
        .bind(format!("{:?}", record.tx_hash))
        .bind(address_to_db(&record.deployer))
        .bind(&record.name)
        .bind(&record.symbol)
        .bind(record.tba_registry.as_ref().map(address_to_db))
        .bind(record.tba_implementation.as_ref().map(address_to_db))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn activate(&self, id: Uuid) -> Result<DeployedContractRecord> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, ContractRow>(&format!(
            "SELECT {} FROM deployed_contracts WHERE id = $1 FOR UPDATE",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EscrowError::NotFound(format!("contract record {}", id)))?;
        let current = DeployedContractRecord::try_from(current)?;

        if !current.contract_type.is_tba() {
            return Err(EscrowError::InvalidInput(format!(
                "only TBA contracts can be re-activated, got {}",
                current.contract_type
            )));
        }

        Self::deactivate_others(&mut tx, current.network_id, current.contract_type, Some(id))
            .await?;

        let row = sqlx::query_as::<_, ContractRow>(&format!(
            "UPDATE deployed_contracts SET is_active = TRUE WHERE id = $1 RETURNING {}",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeployedContractRecord>> {
        let row = sqlx::query_as::<_, ContractRow>(&format!(
            "SELECT {} FROM deployed_contracts WHERE id = $1",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeployedContractRecord::try_from).transpose()
    }

    async fn find_by_address(
        &self,
        network_id: Uuid,
        address: Address,
    ) -> Result<Option<DeployedContractRecord>> {
        let row = sqlx::query_as::<_, ContractRow>(&format!(
            "SELECT {} FROM deployed_contracts WHERE network_id = $1 AND address = $2",
            CONTRACT_COLUMNS
        ))
        .bind(network_id)
        .bind(address_to_db(&address))
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeployedContractRecord::try_from).transpose()
    }

    async fn find_active(
        &self,
        network_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Option<DeployedContractRecord>> {
        let row = sqlx::query_as::<_, ContractRow>(&format!(
            "SELECT {} FROM deployed_contracts
             WHERE network_id = $1 AND contract_type = $2 AND is_active
             ORDER BY created_at DESC LIMIT 1",
            CONTRACT_COLUMNS
        ))
        .bind(network_id)
        .bind(contract_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeployedContractRecord::try_from).transpose()
    }

    async fn list(
        &self,
        network_id: Uuid,
        contract_type: Option<ContractType>,
    ) -> Result<Vec<DeployedContractRecord>> {
        let rows = sqlx::query_as::<_, ContractRow>(&format!(
            "SELECT {} FROM deployed_contracts
             WHERE network_id = $1 AND ($2::TEXT IS NULL OR contract_type = $2)
             ORDER BY created_at",
            CONTRACT_COLUMNS
        ))
        .bind(network_id)
        .bind(contract_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeployedContractRecord::try_from).collect()
    }
}
