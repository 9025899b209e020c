use crate::{
    amount::DEFAULT_COMMISSION_RATE,
    contract::{
        ContractGateway,
        DEFAULT_RECEIPT_POLL_INTERVAL,
    },
    error::ConnectionError,
    network::NetworkParams,
    provider::{
        ChainHandle,
        Eip1193,
        EventSender,
    },
    session::{
        Session,
        SessionListeners,
    },
    wallets::{
        InjectedProviders,
        WalletAdapter,
        WalletKind,
        adapter_for,
    },
};
use alloy_primitives::{
    Address,
    U256,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{
    info,
    warn,
};

/// Turns a wallet choice into a [`Session`]: account access, chain
/// validation, contract binding and listener registration, in that order.
#[derive(Clone)]
pub struct WalletConnector {
    injected: InjectedProviders,
    rpc: Arc<dyn Eip1193>,
    network: NetworkParams,
    contract: Address,
    receipt_poll_interval: Duration,
}

impl WalletConnector {
    pub fn new(
        injected: InjectedProviders,
        rpc: Arc<dyn Eip1193>,
        network: NetworkParams,
        contract: Address,
    ) -> Self {
        Self {
            injected,
            rpc,
            network,
            contract,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    pub fn network(&self) -> &NetworkParams {
        &self.network
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn available_wallets(&self) -> Vec<WalletKind> {
        self.injected.available()
    }

    pub async fn connect(
        &self,
        kind: &str,
        events: EventSender,
    ) -> Result<Session, ConnectionError> {
        let kind: WalletKind = kind.parse()?;
        let adapter = adapter_for(kind, &self.injected, &self.rpc)?;
        info!(wallet = %kind, "requesting accounts");

        let account = adapter
            .request_accounts()
            .await
            .map_err(ConnectionError::Provider)?
            .into_iter()
            .next()
            .ok_or(ConnectionError::NoAccounts(kind))?;

        if adapter.is_evm_compatible() {
            self.ensure_chain(adapter.as_ref()).await?;
        }

        let chain = adapter.chain_handle();
        let address = if adapter.is_evm_compatible() {
            account.parse::<Address>().ok()
        } else {
            None
        };
        let gateway = address.map(|_| {
            Arc::new(
                ContractGateway::new(self.contract, chain.clone())
                    .with_receipt_poll_interval(self.receipt_poll_interval),
            )
        });

        let (balance, contract_balance, commission_rate) =
            prefetch(&chain, address, gateway.as_deref()).await;

        let listeners = SessionListeners::register(adapter.event_source(), events);
        info!(
            wallet = %kind,
            %account,
            contract_bound = gateway.is_some(),
            commission_rate,
            "wallet connected"
        );

        Ok(Session {
            wallet: kind,
            account,
            address,
            chain,
            gateway,
            commission_rate,
            balance,
            contract_balance,
            listeners,
            refresher: None,
            refresh: None,
        })
    }

    /// Switches the wallet to the target chain, registering it first when the
    /// wallet does not know it.
    async fn ensure_chain(&self, adapter: &dyn WalletAdapter) -> Result<(), ConnectionError> {
        let current = adapter
            .chain_id()
            .await
            .map_err(ConnectionError::Provider)?;
        if self.network.matches_chain_id(&current) {
            return Ok(());
        }
        info!(
            %current,
            target = %self.network.chain_id_hex(),
            "switching wallet network"
        );
        match adapter.switch_chain(&self.network).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unrecognized_chain() => {
                info!(chain = %self.network.chain_name, "network unknown to wallet; adding it");
                adapter
                    .add_chain(&self.network)
                    .await
                    .map_err(ConnectionError::ChainSwitchRejected)?;
                adapter
                    .switch_chain(&self.network)
                    .await
                    .map_err(ConnectionError::ChainSwitchRejected)
            }
            Err(err) => Err(ConnectionError::ChainSwitchRejected(err)),
        }
    }
}

/// Initial balances and rate. Failed reads fall back to zero and the default
/// rate rather than failing the connection.
async fn prefetch(
    chain: &ChainHandle,
    address: Option<Address>,
    gateway: Option<&ContractGateway>,
) -> (U256, U256, u64) {
    let player = async {
        let Some(address) = address else {
            return U256::ZERO;
        };
        chain.get_balance(address).await.unwrap_or_else(|err| {
            warn!(%err, %address, "initial balance read failed");
            U256::ZERO
        })
    };
    let contract = async {
        match gateway {
            Some(gateway) => {
                futures::join!(gateway.read_balance(), gateway.read_commission_rate())
            }
            None => (U256::ZERO, DEFAULT_COMMISSION_RATE),
        }
    };
    let (balance, (contract_balance, commission_rate)) = futures::join!(player, contract);
    (balance, contract_balance, commission_rate)
}
