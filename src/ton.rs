//! TON data service
//!
//! Thin layer over the TonAPI client that reshapes upstream payloads into
//! the proxy's response types. Transaction history goes through the
//! pagination cache; everything else is fetched live.

use crate::address::{self, AddressForms};
use crate::cache::Event;
use crate::pagination::{PageError, PaginationEngine};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tonapi::{Account, NftItem, TonApi};

/// Index into an NFT's `previews` used as its image (500x500 on TonAPI)
const NFT_IMAGE_PREVIEW: usize = 2;

const NANOTONS_PER_TON: f64 = 1_000_000_000.0;

/// Service errors
#[derive(Debug, Error)]
pub enum TonError {
    #[error(transparent)]
    Upstream(#[from] tonapi::Error),

    #[error(transparent)]
    Page(#[from] PageError),

    #[error("account {0} is not a wallet, jetton or NFT")]
    UnsupportedAccount(String),

    #[error("NFT index {index} out of range ({count} items)")]
    NftOutOfRange { index: usize, count: usize },
}

impl TonError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            TonError::Upstream(e) => e.is_rate_limited(),
            TonError::Page(e) => matches!(e, PageError::RateLimited),
            _ => false,
        }
    }
}

pub type TonResult<T> = std::result::Result<T, TonError>;

/// Kind of contract behind an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Wallet,
    Jetton,
    Nft,
}

impl AccountKind {
    /// Wallets first, then jetton masters, then NFT items
    pub fn of(account: &Account) -> Option<Self> {
        if account.is_wallet {
            Some(AccountKind::Wallet)
        } else if account.implements("jetton_master") {
            Some(AccountKind::Jetton)
        } else if account.implements("nft_item") {
            Some(AccountKind::Nft)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressType {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: AccountKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    #[serde(rename = "TON")]
    pub ton: f64,
    #[serde(rename = "USD")]
    pub usd: f64,
}

impl Balance {
    pub fn from_nanotons(nanotons: i64, ton_price_usd: f64) -> Self {
        let ton = nanotons as f64 / NANOTONS_PER_TON;
        Self {
            ton,
            usd: ton * ton_price_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletInfo {
    pub address: String,
    pub raw_address: String,
    pub status: String,
    pub name: Option<String>,
    pub balance: Balance,
    pub jetton_count: usize,
    pub nft_count: usize,
    pub is_wallet: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JettonSummary {
    pub address: String,
    pub raw_address: String,
    pub mintable: bool,
    pub total_supply: String,
    pub holders_count: u64,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<String>,
    pub description: Option<String>,
    pub verification: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NftSummary {
    pub nft_address: String,
    pub collection_address: Option<String>,
    pub owner_address: Option<String>,
    pub owner_name: Option<String>,
    pub nft_image: Option<String>,
    pub nft_name: Option<String>,
    pub nft_description: Option<String>,
    pub nft_attributes: serde_json::Value,
    pub approved_by: Vec<String>,
}

/// One NFT of an owner plus the owner's NFT count
#[derive(Debug, Clone, Serialize)]
pub struct OwnedNft {
    #[serde(flatten)]
    pub nft: NftSummary,
    pub last_page: usize,
}

/// A page of cached transaction history
#[derive(Debug, Clone, Serialize)]
pub struct TransactionsPage {
    pub owner_address: String,
    pub raw_owner_address: String,
    pub limit: usize,
    pub page: usize,
    pub is_last_page: bool,
    pub events_count: usize,
    pub events: Vec<Event>,
}

/// Facade over TonAPI and the transaction cache
pub struct TonService {
    api: Arc<TonApi>,
    engine: Arc<PaginationEngine>,
}

impl TonService {
    pub fn new(api: Arc<TonApi>, engine: Arc<PaginationEngine>) -> Self {
        Self { api, engine }
    }

    pub fn engine(&self) -> &Arc<PaginationEngine> {
        &self.engine
    }

    pub async fn friendly_address(&self, address: &str) -> TonResult<String> {
        Ok(address::friendly(&self.api, address).await?)
    }

    pub async fn raw_address(&self, address: &str) -> TonResult<String> {
        Ok(address::raw(&self.api, address).await?)
    }

    pub async fn ton_price(&self) -> TonResult<f64> {
        Ok(self.api.ton_price_usd().await?)
    }

    pub async fn address_type(&self, address: &str) -> TonResult<AddressType> {
        let (account, friendly) = tokio::try_join!(
            self.api.account(address),
            address::friendly(&self.api, address)
        )?;

        let kind = AccountKind::of(&account)
            .ok_or_else(|| TonError::UnsupportedAccount(friendly.clone()))?;

        Ok(AddressType {
            address: friendly,
            kind,
        })
    }

    pub async fn wallet_info(&self, address: &str) -> TonResult<WalletInfo> {
        let (account, price, jettons, nfts, friendly) = tokio::try_join!(
            self.api.account(address),
            self.api.ton_price_usd(),
            self.api.jetton_balances(address),
            self.api.account_nfts(address),
            address::friendly(&self.api, address)
        )?;

        Ok(WalletInfo {
            address: friendly,
            raw_address: account.address,
            status: account.status,
            name: account.name,
            balance: Balance::from_nanotons(account.balance, price),
            jetton_count: jettons.len(),
            nft_count: nfts.len(),
            is_wallet: account.is_wallet,
        })
    }

    /// Event by id, as returned upstream
    pub async fn transaction_info(&self, event_id: &str) -> TonResult<serde_json::Value> {
        Ok(self.api.event(event_id).await?)
    }

    pub async fn jetton_info(&self, address: &str) -> TonResult<JettonSummary> {
        let jetton = self.api.jetton(address).await?;
        let friendly = address::friendly(&self.api, &jetton.metadata.address).await?;
        let metadata = jetton.metadata;

        Ok(JettonSummary {
            address: friendly,
            raw_address: metadata.address,
            mintable: jetton.mintable,
            total_supply: jetton.total_supply,
            holders_count: jetton.holders_count,
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
            description: metadata.description,
            verification: jetton.verification,
        })
    }

    pub async fn nft_info(&self, address: &str) -> TonResult<NftSummary> {
        let item = self.api.nft(address).await?;
        self.nft_summary(item).await
    }

    /// The `index`-th NFT owned by `owner`
    pub async fn nft_by_owner(&self, owner: &str, index: usize) -> TonResult<OwnedNft> {
        let items = self.api.account_nfts(owner).await?;
        let count = items.len();

        let item = items
            .into_iter()
            .nth(index)
            .ok_or(TonError::NftOutOfRange { index, count })?;
        let item: NftItem = serde_json::from_value(item)
            .map_err(|e| tonapi::Error::Decode(format!("nft item: {}", e)))?;

        Ok(OwnedNft {
            nft: self.nft_summary(item).await?,
            last_page: count,
        })
    }

    /// A page of the account's history, served from the transaction cache
    pub async fn transactions(
        &self,
        address: &str,
        limit: usize,
        page: usize,
    ) -> TonResult<TransactionsPage> {
        let forms: AddressForms = address::resolve(&self.api, address).await?;
        let result = self.engine.get_page(&forms.raw, limit, page).await?;

        Ok(TransactionsPage {
            owner_address: forms.friendly,
            raw_owner_address: forms.raw,
            limit: result.limit,
            page: result.page,
            is_last_page: result.is_last_page,
            events_count: result.events_count,
            events: result.events,
        })
    }

    pub async fn jettons(&self, address: &str) -> TonResult<Vec<serde_json::Value>> {
        Ok(self.api.jetton_balances(address).await?)
    }

    pub async fn nfts(&self, address: &str) -> TonResult<Vec<serde_json::Value>> {
        Ok(self.api.account_nfts(address).await?)
    }

    async fn nft_summary(&self, item: NftItem) -> TonResult<NftSummary> {
        let owner = item.owner.as_ref().map(|o| o.address.as_str());
        let collection = item.collection.as_ref().map(|c| c.address.as_str());

        let (nft_address, owner_address, collection_address) = tokio::try_join!(
            address::friendly(&self.api, &item.address),
            self.friendly_opt(owner),
            self.friendly_opt(collection)
        )?;

        Ok(NftSummary {
            nft_address,
            collection_address,
            owner_address,
            owner_name: item.owner.as_ref().and_then(|o| o.name.clone()),
            nft_image: item.preview_url(NFT_IMAGE_PREVIEW).map(str::to_string),
            nft_name: item.metadata_str("name").map(str::to_string),
            nft_description: item.metadata_str("description").map(str::to_string),
            nft_attributes: item
                .metadata
                .get("attributes")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            approved_by: item.approved_by.clone(),
        })
    }

    async fn friendly_opt(&self, address: Option<&str>) -> tonapi::Result<Option<String>> {
        match address {
            Some(address) => address::friendly(&self.api, address).await.map(Some),
            None => Ok(None),
        }
    }
}
