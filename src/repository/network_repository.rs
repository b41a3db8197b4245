// 网络配置数据访问 Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{address_to_db, optional_address_from_db};
use crate::{
    domain::{BlockchainNetwork, NetworkFilter, NetworkLookup, NetworkPatch, NewNetwork},
    error::{EscrowError, Result},
};

#[async_trait]
pub trait NetworkRepository: Send + Sync {
    async fn find(&self, lookup: &NetworkLookup) -> Result<Option<BlockchainNetwork>>;

    async fn list(&self, filter: &NetworkFilter) -> Result<Vec<BlockchainNetwork>>;

    async fn insert(&self, network: NewNetwork) -> Result<BlockchainNetwork>;

    async fn update(&self, id: Uuid, patch: &NetworkPatch) -> Result<BlockchainNetwork>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<BlockchainNetwork>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

const NETWORK_COLUMNS: &str = "id, name, chain_id, rpc_url, explorer_url, native_symbol, \
     is_testnet, is_active, multicall_address, created_at, updated_at";

#[derive(Debug, FromRow)]
struct NetworkRow {
    id: Uuid,
    name: String,
    chain_id: i64,
    rpc_url: String,
    explorer_url: Option<String>,
    native_symbol: String,
    is_testnet: bool,
    is_active: bool,
    multicall_address: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NetworkRow> for BlockchainNetwork {
    type Error = EscrowError;

    fn try_from(row: NetworkRow) -> Result<Self> {
        Ok(BlockchainNetwork {
            id: row.id,
            name: row.name,
            chain_id: u64::try_from(row.chain_id).map_err(|_| {
                EscrowError::Database(format!("corrupt chain id column: {}", row.chain_id))
            })?,
            rpc_url: row.rpc_url,
            explorer_url: row.explorer_url,
            native_symbol: row.native_symbol,
            is_testnet: row.is_testnet,
            is_active: row.is_active,
            multicall_address: optional_address_from_db(row.multicall_address)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn chain_id_to_db(chain_id: u64) -> Result<i64> {
    i64::try_from(chain_id)
        .map_err(|_| EscrowError::InvalidInput(format!("chain id out of range: {}", chain_id)))
}

pub struct PgNetworkRepository {
    pool: PgPool,
}

impl PgNetworkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NetworkRepository for PgNetworkRepository {
    async fn find(&self, lookup: &NetworkLookup) -> Result<Option<BlockchainNetwork>> {
        let base = format!("SELECT {} FROM blockchain_networks", NETWORK_COLUMNS);
        let row = match lookup {
            NetworkLookup::Id(id) => {
                sqlx::query_as::<_, NetworkRow>(&format!("{} WHERE id = $1", base))
                    .bind(*id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            NetworkLookup::Name(name) => {
                sqlx::query_as::<_, NetworkRow>(&format!("{} WHERE name = $1", base))
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
            }
            NetworkLookup::ChainId(chain_id) => {
                sqlx::query_as::<_, NetworkRow>(&format!("{} WHERE chain_id = $1", base))
                    .bind(chain_id_to_db(*chain_id)?)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.map(BlockchainNetwork::try_from).transpose()
    }

    async fn list(&self, filter: &NetworkFilter) -> Result<Vec<BlockchainNetwork>> {
        let rows = sqlx::query_as::<_, NetworkRow>(&format!(
            "SELECT {} FROM blockchain_networks
             WHERE ($1::BOOLEAN IS NULL OR is_testnet = $1)
               AND ($2::BOOLEAN IS NULL OR is_active = $2)
             ORDER BY chain_id",
            NETWORK_COLUMNS
        ))
        .bind(filter.is_testnet)
        .bind(filter.is_active)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BlockchainNetwork::try_from).collect()
    }

    async fn insert(&self, network: NewNetwork) -> Result<BlockchainNetwork> {
        let row = sqlx::query_as::<_, NetworkRow>(&format!(
            "INSERT INTO blockchain_networks
                (id, name, chain_id, rpc_url, explorer_url, native_symbol, is_testnet, multicall_address)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            NETWORK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&network.name)
        .bind(chain_id_to_db(network.chain_id)?)
        .bind(&network.rpc_url)
        .bind(&network.explorer_url)
        .bind(&network.native_symbol)
        .bind(network.is_testnet)
        .bind(network.multicall_address.as_ref().map(address_to_db))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update(&self, id: Uuid, patch: &NetworkPatch) -> Result<BlockchainNetwork> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, NetworkRow>(&format!(
            "SELECT {} FROM blockchain_networks WHERE id = $1 FOR UPDATE",
            NETWORK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EscrowError::NotFound(format!("network {}", id)))?;

        let mut network = BlockchainNetwork::try_from(current)?;
        patch.apply(&mut network);

        let row = sqlx::query_as::<_, NetworkRow>(&format!(
            "UPDATE blockchain_networks
             SET name = $1, rpc_url = $2, explorer_url = $3, native_symbol = $4,
                 is_testnet = $5, multicall_address = $6, updated_at = CURRENT_TIMESTAMP
             WHERE id = $7
             RETURNING {}",
            NETWORK_COLUMNS
        ))
        .bind(&network.name)
        .bind(&network.rpc_url)
        .bind(&network.explorer_url)
        .bind(&network.native_symbol)
        .bind(network.is_testnet)
        .bind(network.multicall_address.as_ref().map(address_to_db))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<BlockchainNetwork> {
        let row = sqlx::query_as::<_, NetworkRow>(&format!(
            "UPDATE blockchain_networks SET is_active = $1, updated_at = CURRENT_TIMESTAMP
             WHERE id = $2
             RETURNING {}",
            NETWORK_COLUMNS
        ))
        .bind(active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EscrowError::NotFound(format!("network {}", id)))?;

        row.try_into()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM blockchain_networks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EscrowError::NotFound(format!("network {}", id)));
        }
        Ok(())
    }
}
