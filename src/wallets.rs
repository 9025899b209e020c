use crate::{
    error::{
        ConnectionError,
        RpcError,
    },
    network::NetworkParams,
    provider::{
        ChainHandle,
        Eip1193,
    },
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::{
    fmt,
    str::FromStr,
    sync::Arc,
};

/// EIP-1193: the provider does not support the requested method.
const UNSUPPORTED_METHOD: i64 = 4200;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WalletKind {
    MetaMask,
    Phantom,
    Rabby,
    Backpack,
}

impl WalletKind {
    pub const ALL: [WalletKind; 4] = [
        WalletKind::MetaMask,
        WalletKind::Phantom,
        WalletKind::Rabby,
        WalletKind::Backpack,
    ];

    pub fn id(self) -> &'static str {
        match self {
            WalletKind::MetaMask => "metamask",
            WalletKind::Phantom => "phantom",
            WalletKind::Rabby => "rabby",
            WalletKind::Backpack => "backpack",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WalletKind::MetaMask => "MetaMask",
            WalletKind::Phantom => "Phantom",
            WalletKind::Rabby => "Rabby",
            WalletKind::Backpack => "Backpack",
        }
    }

    /// Where the wallet injects its provider.
    pub fn slot(self) -> InjectedSlot {
        match self {
            WalletKind::MetaMask | WalletKind::Rabby => InjectedSlot::Ethereum,
            WalletKind::Phantom => InjectedSlot::Solana,
            WalletKind::Backpack => InjectedSlot::Backpack,
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WalletKind {
    type Err = ConnectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        WalletKind::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted)
            .ok_or_else(|| ConnectionError::UnsupportedWallet(raw.trim().to_string()))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InjectedSlot {
    Ethereum,
    Solana,
    Backpack,
}

/// Providers the environment injected, one optional handle per slot.
#[derive(Clone, Default)]
pub struct InjectedProviders {
    ethereum: Option<Arc<dyn Eip1193>>,
    solana: Option<Arc<dyn Eip1193>>,
    backpack: Option<Arc<dyn Eip1193>>,
}

impl InjectedProviders {
    pub fn with(mut self, slot: InjectedSlot, provider: Arc<dyn Eip1193>) -> Self {
        match slot {
            InjectedSlot::Ethereum => self.ethereum = Some(provider),
            InjectedSlot::Solana => self.solana = Some(provider),
            InjectedSlot::Backpack => self.backpack = Some(provider),
        }
        self
    }

    pub fn get(&self, slot: InjectedSlot) -> Option<Arc<dyn Eip1193>> {
        match slot {
            InjectedSlot::Ethereum => self.ethereum.clone(),
            InjectedSlot::Solana => self.solana.clone(),
            InjectedSlot::Backpack => self.backpack.clone(),
        }
    }

    pub fn available(&self) -> Vec<WalletKind> {
        WalletKind::ALL
            .into_iter()
            .filter(|kind| self.get(kind.slot()).is_some())
            .collect()
    }
}

/// The capability set the connector needs from any wallet.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    fn kind(&self) -> WalletKind;

    /// Whether the wallet can sign EVM transactions and manage EVM chains.
    fn is_evm_compatible(&self) -> bool;

    /// Provider whose `accountsChanged`/`chainChanged` events the session follows.
    fn event_source(&self) -> Arc<dyn Eip1193>;

    /// Handle used for chain reads and, on EVM wallets, for sending.
    fn chain_handle(&self) -> ChainHandle;

    async fn request_accounts(&self) -> Result<Vec<String>, RpcError>;

    async fn chain_id(&self) -> Result<String, RpcError>;

    async fn switch_chain(&self, network: &NetworkParams) -> Result<(), RpcError>;

    async fn add_chain(&self, network: &NetworkParams) -> Result<(), RpcError>;
}

/// MetaMask, Rabby and Backpack all speak the EIP-1193 EVM dialect.
pub struct EvmWallet {
    kind: WalletKind,
    provider: Arc<dyn Eip1193>,
}

impl EvmWallet {
    pub fn new(kind: WalletKind, provider: Arc<dyn Eip1193>) -> Self {
        Self { kind, provider }
    }
}

#[async_trait]
impl WalletAdapter for EvmWallet {
    fn kind(&self) -> WalletKind {
        self.kind
    }

    fn is_evm_compatible(&self) -> bool {
        true
    }

    fn event_source(&self) -> Arc<dyn Eip1193> {
        self.provider.clone()
    }

    fn chain_handle(&self) -> ChainHandle {
        ChainHandle::new(self.provider.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<String>, RpcError> {
        self.chain_handle()
            .request("eth_requestAccounts", json!([]))
            .await
    }

    async fn chain_id(&self) -> Result<String, RpcError> {
        self.chain_handle().chain_id().await
    }

    async fn switch_chain(&self, network: &NetworkParams) -> Result<(), RpcError> {
        self.provider
            .request("wallet_switchEthereumChain", network.switch_chain_params())
            .await?;
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkParams) -> Result<(), RpcError> {
        self.provider
            .request("wallet_addEthereumChain", network.add_chain_params())
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhantomConnectResponse {
    public_key: String,
}

/// Phantom injects a Solana provider. It yields an account (the Solana public
/// key) but cannot sign for the EVM chain, so reads go through the RPC node.
pub struct PhantomWallet {
    solana: Arc<dyn Eip1193>,
    rpc: Arc<dyn Eip1193>,
}

impl PhantomWallet {
    pub fn new(solana: Arc<dyn Eip1193>, rpc: Arc<dyn Eip1193>) -> Self {
        Self { solana, rpc }
    }
}

#[async_trait]
impl WalletAdapter for PhantomWallet {
    fn kind(&self) -> WalletKind {
        WalletKind::Phantom
    }

    fn is_evm_compatible(&self) -> bool {
        false
    }

    fn event_source(&self) -> Arc<dyn Eip1193> {
        self.solana.clone()
    }

    fn chain_handle(&self) -> ChainHandle {
        ChainHandle::new(self.rpc.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<String>, RpcError> {
        let response: PhantomConnectResponse = ChainHandle::new(self.solana.clone())
            .request("connect", json!({}))
            .await?;
        Ok(vec![response.public_key])
    }

    async fn chain_id(&self) -> Result<String, RpcError> {
        self.chain_handle().chain_id().await
    }

    async fn switch_chain(&self, _network: &NetworkParams) -> Result<(), RpcError> {
        Err(RpcError::new(
            UNSUPPORTED_METHOD,
            "Phantom cannot switch EVM chains",
        ))
    }

    async fn add_chain(&self, _network: &NetworkParams) -> Result<(), RpcError> {
        Err(RpcError::new(UNSUPPORTED_METHOD, "Phantom cannot add EVM chains"))
    }
}

/// Picks the adapter for `kind`, failing if its provider was not injected.
pub fn adapter_for(
    kind: WalletKind,
    injected: &InjectedProviders,
    rpc: &Arc<dyn Eip1193>,
) -> Result<Box<dyn WalletAdapter>, ConnectionError> {
    let provider = injected
        .get(kind.slot())
        .ok_or(ConnectionError::ProviderNotFound(kind))?;
    let adapter: Box<dyn WalletAdapter> = match kind {
        WalletKind::Phantom => Box::new(PhantomWallet::new(provider, rpc.clone())),
        WalletKind::MetaMask | WalletKind::Rabby | WalletKind::Backpack => {
            Box::new(EvmWallet::new(kind, provider))
        }
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::MockProvider;

    #[test]
    fn from_str__is_case_insensitive() {
        assert_eq!("MetaMask".parse::<WalletKind>(), Ok(WalletKind::MetaMask));
        assert_eq!(" rabby ".parse::<WalletKind>(), Ok(WalletKind::Rabby));
        assert_eq!("BACKPACK".parse::<WalletKind>(), Ok(WalletKind::Backpack));
        assert_eq!("phantom".parse::<WalletKind>(), Ok(WalletKind::Phantom));
    }

    #[test]
    fn from_str__rejects_unknown_kind() {
        assert_eq!(
            "unknown".parse::<WalletKind>(),
            Err(ConnectionError::UnsupportedWallet("unknown".to_string()))
        );
    }

    #[test]
    fn adapter_for__missing_slot_is_provider_not_found() {
        // given
        let rpc: Arc<dyn Eip1193> = Arc::new(MockProvider::new());
        let injected = InjectedProviders::default()
            .with(InjectedSlot::Solana, Arc::new(MockProvider::new()));

        // when
        let result = adapter_for(WalletKind::Rabby, &injected, &rpc);

        // then
        assert_eq!(
            result.err(),
            Some(ConnectionError::ProviderNotFound(WalletKind::Rabby))
        );
    }

    #[test]
    fn available__lists_kinds_sharing_the_ethereum_slot() {
        let injected = InjectedProviders::default()
            .with(InjectedSlot::Ethereum, Arc::new(MockProvider::new()));
        assert_eq!(
            injected.available(),
            vec![WalletKind::MetaMask, WalletKind::Rabby]
        );
    }

    #[tokio::test]
    async fn phantom__reports_solana_public_key_as_account() {
        // given
        let solana = Arc::new(MockProvider::new());
        solana.respond("connect", json!({ "publicKey": "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU" }));
        let rpc: Arc<dyn Eip1193> = Arc::new(MockProvider::new());
        let adapter = PhantomWallet::new(solana, rpc);

        // when
        let accounts = adapter.request_accounts().await.unwrap();

        // then
        assert_eq!(
            accounts,
            vec!["7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU".to_string()]
        );
        assert!(!adapter.is_evm_compatible());
    }
}
