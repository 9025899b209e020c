use crate::{
    contract::ContractGateway,
    provider::{
        ChainHandle,
        Eip1193,
        EventSender,
        ListenerId,
        ProviderEventKind,
    },
    wallets::WalletKind,
};
use alloy_primitives::{
    Address,
    U256,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        Notify,
        mpsc,
    },
    task::JoinHandle,
    time::{
        self,
        Instant,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(10_000);

/// `0x1234...abcd`. Strings too short to abbreviate come back unchanged.
pub fn shorten_account(account: &str) -> String {
    let chars: Vec<char> = account.chars().collect();
    if chars.len() <= 10 {
        return account.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Account-change and chain-change listeners registered for one session.
/// Dropping the guard deregisters both.
pub struct SessionListeners {
    provider: Arc<dyn Eip1193>,
    ids: Vec<ListenerId>,
}

impl SessionListeners {
    pub fn register(provider: Arc<dyn Eip1193>, events: EventSender) -> Self {
        let ids = vec![
            provider.on(ProviderEventKind::AccountsChanged, events.clone()),
            provider.on(ProviderEventKind::ChainChanged, events),
        ];
        debug!(?ids, "provider listeners registered");
        Self { provider, ids }
    }

    pub fn ids(&self) -> &[ListenerId] {
        &self.ids
    }
}

impl Drop for SessionListeners {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            if !self.provider.remove_listener(id) {
                debug!(id, "listener already removed");
            }
        }
    }
}

/// Result of one refresh round. `None` means that read failed and the
/// previous value stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account: String,
    pub player: Option<U256>,
    pub pool: Option<U256>,
}

/// Reads the player and pool balances concurrently. Failures are logged and
/// reported as `None`.
pub async fn read_balances(
    account: &str,
    player: Option<Address>,
    chain: &ChainHandle,
    gateway: Option<&ContractGateway>,
) -> BalanceUpdate {
    let player_read = async {
        let address = player?;
        match chain.get_balance(address).await {
            Ok(balance) => Some(balance),
            Err(err) => {
                warn!(%err, %address, "player balance read failed");
                None
            }
        }
    };
    let pool_read = async {
        match gateway?.try_read_balance().await {
            Ok(balance) => Some(balance),
            Err(err) => {
                warn!(%err, "pool balance read failed");
                None
            }
        }
    };
    let (player, pool) = futures::join!(player_read, pool_read);
    BalanceUpdate {
        account: account.to_string(),
        player,
        pool,
    }
}

/// Background task re-reading balances every `interval`, or immediately on
/// [`BalanceRefresher::refresh_now`]. Aborted on drop.
pub struct BalanceRefresher {
    handle: JoinHandle<()>,
    trigger: Arc<Notify>,
}

impl BalanceRefresher {
    pub fn spawn(
        account: String,
        player: Option<Address>,
        chain: ChainHandle,
        gateway: Option<Arc<ContractGateway>>,
        interval: Duration,
        updates: mpsc::UnboundedSender<BalanceUpdate>,
    ) -> Self {
        let trigger = Arc::new(Notify::new());
        let notified = trigger.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = notified.notified() => {}
                }
                let update =
                    read_balances(&account, player, &chain, gateway.as_deref()).await;
                if updates.send(update).is_err() {
                    debug!("balance update receiver dropped; stopping refresher");
                    break;
                }
            }
        });
        Self { handle, trigger }
    }

    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for BalanceRefresher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountSwitch {
    Switched,
    Cleared,
    Unchanged,
}

/// A connected wallet: the account, chain handle, bound contract and the
/// background resources tied to them.
pub struct Session {
    pub(crate) wallet: WalletKind,
    pub(crate) account: String,
    pub(crate) address: Option<Address>,
    pub(crate) chain: ChainHandle,
    pub(crate) gateway: Option<Arc<ContractGateway>>,
    pub(crate) commission_rate: u64,
    pub(crate) balance: U256,
    pub(crate) contract_balance: U256,
    pub(crate) listeners: SessionListeners,
    pub(crate) refresher: Option<BalanceRefresher>,
    pub(crate) refresh: Option<(Duration, mpsc::UnboundedSender<BalanceUpdate>)>,
}

impl Session {
    pub fn wallet(&self) -> WalletKind {
        self.wallet
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// EVM address of the account. `None` for non-EVM wallets.
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn chain(&self) -> &ChainHandle {
        &self.chain
    }

    pub fn gateway(&self) -> Option<&Arc<ContractGateway>> {
        self.gateway.as_ref()
    }

    pub fn commission_rate(&self) -> u64 {
        self.commission_rate
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn contract_balance(&self) -> U256 {
        self.contract_balance
    }

    pub fn listeners(&self) -> &SessionListeners {
        &self.listeners
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresher
            .as_ref()
            .is_some_and(BalanceRefresher::is_running)
    }

    /// Starts the periodic refresh. Only sessions with a bound contract get one.
    pub fn start_refresher(
        &mut self,
        interval: Duration,
        updates: mpsc::UnboundedSender<BalanceUpdate>,
    ) {
        let Some(gateway) = self.gateway.clone() else {
            debug!(wallet = %self.wallet, "no contract bound; balance refresh disabled");
            return;
        };
        self.refresh = Some((interval, updates.clone()));
        self.refresher = Some(BalanceRefresher::spawn(
            self.account.clone(),
            self.address,
            self.chain.clone(),
            Some(gateway),
            interval,
            updates,
        ));
    }

    pub fn refresh_now(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.refresh_now();
        }
    }

    /// Applies an update if it belongs to the current account.
    pub fn apply_balance_update(&mut self, update: &BalanceUpdate) -> bool {
        if update.account != self.account {
            debug!(stale = %update.account, "ignoring balance update for previous account");
            return false;
        }
        if let Some(player) = update.player {
            self.balance = player;
        }
        if let Some(pool) = update.pool {
            self.contract_balance = pool;
        }
        true
    }

    /// Follows an `accountsChanged` event. An empty list means the wallet
    /// disconnected and the session should be cleared by the caller.
    pub fn switch_account(&mut self, accounts: &[String]) -> AccountSwitch {
        let Some(next) = accounts.first() else {
            info!(wallet = %self.wallet, "wallet reported no accounts");
            return AccountSwitch::Cleared;
        };
        if next.eq_ignore_ascii_case(&self.account) {
            return AccountSwitch::Unchanged;
        }
        info!(from = %self.account, to = %next, "active account changed");
        self.account = next.clone();
        self.address = next.parse().ok();
        self.balance = U256::ZERO;
        if let Some((interval, updates)) = self.refresh.clone() {
            self.refresher = None;
            self.start_refresher(interval, updates);
            self.refresh_now();
        }
        AccountSwitch::Switched
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        error::RpcError,
        test_helpers::MockProvider,
    };

    #[test]
    fn shorten_account__keeps_prefix_and_suffix() {
        assert_eq!(
            shorten_account("0x1234567890abcdef1234567890abcdef1234abcd"),
            "0x1234...abcd"
        );
        assert_eq!(shorten_account("0x12"), "0x12");
    }

    #[test]
    fn listeners__dropping_guard_deregisters_both() {
        // given
        let provider = Arc::new(MockProvider::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let guard = SessionListeners::register(provider.clone(), tx);
        assert_eq!(provider.listener_count(), 2);

        // when
        drop(guard);

        // then
        assert_eq!(provider.listener_count(), 0);
    }

    #[tokio::test]
    async fn read_balances__failed_read_yields_no_update() {
        // given
        let provider = Arc::new(MockProvider::new());
        provider.respond("eth_getBalance", serde_json::json!("0x64"));
        provider.fail("eth_call", RpcError::transport("node down"));
        let chain = ChainHandle::new(provider.clone());
        let gateway = ContractGateway::new(Address::repeat_byte(0xaa), chain.clone());

        // when
        let update = read_balances(
            "0x01",
            Some(Address::repeat_byte(0x01)),
            &chain,
            Some(&gateway),
        )
        .await;

        // then
        assert_eq!(update.player, Some(U256::from(100u64)));
        assert_eq!(update.pool, None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresher__reads_on_every_interval() {
        // given
        let provider = Arc::new(MockProvider::new());
        provider.respond("eth_getBalance", serde_json::json!("0x1"));
        provider.mock_contract_reads(U256::from(9u64), 10);
        let chain = ChainHandle::new(provider.clone());
        let gateway = Arc::new(ContractGateway::new(Address::repeat_byte(0xaa), chain.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        let refresher = BalanceRefresher::spawn(
            "0x01".to_string(),
            Some(Address::repeat_byte(0x01)),
            chain,
            Some(gateway),
            REFRESH_INTERVAL,
            tx,
        );
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        // then
        assert_eq!(first.pool, Some(U256::from(9u64)));
        assert_eq!(second.player, Some(U256::from(1u64)));
        assert!(refresher.is_running());
    }
}
