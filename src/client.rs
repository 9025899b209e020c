use crate::ui;
use alloy_primitives::Address;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use nadsflip::{
    amount::{
        display_total,
        format_balance,
        format_fixed,
        step_wager,
    },
    betting::{
        BetOutcome,
        BetPhase,
        BetProgress,
        BettingSession,
        Guess,
        SETTLE_ANIMATION_DELAY,
        drive_bet,
        schedule_animation_reset,
    },
    connector::WalletConnector,
    error::{
        BetError,
        ConnectionError,
    },
    network::NetworkParams,
    provider::{
        Eip1193,
        HttpProvider,
        ProviderEvent,
    },
    session::{
        AccountSwitch,
        BalanceUpdate,
        REFRESH_INTERVAL,
        Session,
        shorten_account,
    },
    wallets::{
        InjectedProviders,
        InjectedSlot,
        WalletKind,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub const DEFAULT_WAGER: &str = "0.01";
const MAX_ERRORS: usize = 5;
const COIN_FRAME_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkParams,
    pub contract: Address,
    pub ethereum_url: Option<String>,
    pub solana_url: Option<String>,
    pub backpack_url: Option<String>,
    pub auto_connect: Option<String>,
    pub receipt_poll_interval: Duration,
    pub event_poll_interval: Duration,
}

impl AppConfig {
    /// Fills the injected provider slots from the configured endpoints.
    pub fn connector(&self) -> Result<WalletConnector> {
        let http = |url: &str| -> Result<Arc<dyn Eip1193>> {
            let provider =
                HttpProvider::with_event_poll_interval(url, self.event_poll_interval)
                    .map_err(|e| eyre!("provider for {url}: {e}"))?;
            Ok(Arc::new(provider))
        };
        let mut injected = InjectedProviders::default();
        for (slot, url) in [
            (InjectedSlot::Ethereum, &self.ethereum_url),
            (InjectedSlot::Solana, &self.solana_url),
            (InjectedSlot::Backpack, &self.backpack_url),
        ] {
            if let Some(url) = url {
                injected = injected.with(slot, http(url)?);
            }
        }
        let rpc = http(&self.network.rpc_url).wrap_err("creating RPC node provider")?;
        Ok(
            WalletConnector::new(injected, rpc, self.network.clone(), self.contract)
                .with_receipt_poll_interval(self.receipt_poll_interval),
        )
    }
}

#[derive(Clone, Debug)]
pub struct AccountView {
    pub wallet: WalletKind,
    pub short_account: String,
    pub balance: String,
    pub contract_bound: bool,
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub network_name: String,
    pub contract_url: String,
    pub available_wallets: Vec<WalletKind>,
    pub connecting: Option<String>,
    pub account: Option<AccountView>,
    pub pool: String,
    pub commission_rate: u64,
    pub wager: String,
    pub total: String,
    pub phase: BetPhase,
    pub controls_locked: bool,
    pub coin_frame: usize,
    pub result: Option<String>,
    pub result_tx_url: Option<String>,
    pub history: Vec<BetOutcome>,
    pub status: String,
    pub errors: Vec<String>,
}

pub struct ConnectOutcome {
    epoch: u64,
    result: Result<Session, ConnectionError>,
}

/// Receiving ends of everything background work reports back on.
pub struct ControllerEvents {
    pub connect: mpsc::UnboundedReceiver<ConnectOutcome>,
    pub provider: mpsc::UnboundedReceiver<ProviderEvent>,
    pub balances: mpsc::UnboundedReceiver<BalanceUpdate>,
    pub bets: mpsc::UnboundedReceiver<BetProgress>,
}

pub struct AppController {
    connector: WalletConnector,
    session: Option<Session>,
    betting: BettingSession,
    wager_input: String,
    status: String,
    errors: Vec<String>,
    connecting: Option<String>,
    connect_epoch: u64,
    coin_frame: usize,
    refresh_interval: Duration,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    provider_tx: mpsc::UnboundedSender<ProviderEvent>,
    balance_tx: mpsc::UnboundedSender<BalanceUpdate>,
    bet_tx: mpsc::UnboundedSender<BetProgress>,
}

impl AppController {
    pub fn new(connector: WalletConnector) -> (Self, ControllerEvents) {
        let (connect_tx, connect) = mpsc::unbounded_channel();
        let (provider_tx, provider) = mpsc::unbounded_channel();
        let (balance_tx, balances) = mpsc::unbounded_channel();
        let (bet_tx, bets) = mpsc::unbounded_channel();
        let controller = Self {
            connector,
            session: None,
            betting: BettingSession::new(),
            wager_input: DEFAULT_WAGER.to_string(),
            status: String::from("Connect a wallet to play"),
            errors: Vec::new(),
            connecting: None,
            connect_epoch: 0,
            coin_frame: 0,
            refresh_interval: REFRESH_INTERVAL,
            connect_tx,
            provider_tx,
            balance_tx,
            bet_tx,
        };
        let events = ControllerEvents {
            connect,
            provider,
            balances,
            bets,
        };
        (controller, events)
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub fn betting(&self) -> &BettingSession {
        &self.betting
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        debug!(status = %self.status, "status");
    }

    fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    pub fn dismiss_errors(&mut self) {
        self.errors.clear();
    }

    /// Starts connecting in the background. The outcome arrives on the
    /// `connect` channel. Requests made while one is pending are ignored.
    pub fn request_connect(&mut self, kind: String) {
        if let Some(pending) = &self.connecting {
            info!(%pending, requested = %kind, "connect already in progress");
            return;
        }
        self.connect_epoch += 1;
        let epoch = self.connect_epoch;
        self.set_status(format!("Connecting to {kind}..."));
        self.connecting = Some(kind.clone());
        let connector = self.connector.clone();
        let events = self.provider_tx.clone();
        let outcomes = self.connect_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&kind, events).await;
            let _ = outcomes.send(ConnectOutcome { epoch, result });
        });
    }

    pub fn on_connected(&mut self, outcome: ConnectOutcome) {
        if outcome.epoch != self.connect_epoch {
            debug!(epoch = outcome.epoch, "dropping stale connect result");
            return;
        }
        self.connecting = None;
        match outcome.result {
            Ok(mut session) => {
                session.start_refresher(self.refresh_interval, self.balance_tx.clone());
                let label = session.wallet().label();
                if session.gateway().is_none() {
                    self.set_status(format!(
                        "Connected to {label} (read-only: bets need an EVM wallet)"
                    ));
                } else {
                    self.set_status(format!("Connected to {label}"));
                }
                self.errors.clear();
                self.session = Some(session);
            }
            Err(err) => {
                self.set_status("Connection failed");
                self.push_error(err.to_string());
            }
        }
    }

    pub fn on_provider_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.switch_account(&accounts) {
                    AccountSwitch::Switched => {
                        let account = shorten_account(session.account());
                        self.set_status(format!("Switched to account {account}"));
                    }
                    AccountSwitch::Cleared => {
                        self.disconnect();
                        self.set_status("Wallet disconnected");
                    }
                    AccountSwitch::Unchanged => {}
                }
            }
            ProviderEvent::ChainChanged(chain) => {
                if self.session.is_none() {
                    return;
                }
                info!(%chain, "chain changed; reloading");
                self.reload();
                self.set_status(format!("Network changed to {chain}; reconnect to continue"));
            }
        }
    }

    /// Any connect still in flight belongs to the state being discarded.
    fn abandon_pending_connect(&mut self) {
        if let Some(pending) = self.connecting.take() {
            info!(%pending, "abandoning pending connect");
        }
        self.connect_epoch += 1;
    }

    /// Back to a freshly started app.
    fn reload(&mut self) {
        self.abandon_pending_connect();
        self.session = None;
        self.betting.reset();
        self.wager_input = DEFAULT_WAGER.to_string();
        self.errors.clear();
        self.coin_frame = 0;
    }

    pub fn disconnect(&mut self) {
        self.abandon_pending_connect();
        if let Some(session) = self.session.take() {
            info!(wallet = %session.wallet(), "disconnecting");
        }
        self.betting.reset();
        self.set_status("Disconnected");
    }

    pub fn refresh(&mut self) {
        match &self.session {
            Some(session) => {
                session.refresh_now();
                self.set_status("Refreshing balances...");
            }
            None => self.set_status("Connect a wallet first"),
        }
    }

    pub fn set_wager(&mut self, raw: String) {
        self.wager_input = raw;
    }

    pub fn step_wager(&mut self, steps: i64) {
        self.wager_input = step_wager(&self.wager_input, steps);
    }

    pub fn place_bet(&mut self, guess: Guess) {
        if let Err(err) = self.try_place_bet(guess) {
            warn!(%err, "bet refused");
            self.push_error(err.to_string());
        }
    }

    fn try_place_bet(&mut self, guess: Guess) -> Result<(), BetError> {
        let session = self.session.as_ref().ok_or(BetError::NotConnected)?;
        let gateway = session.gateway().cloned().ok_or(BetError::NotConnected)?;
        let from = session.address().ok_or(BetError::NotConnected)?;
        let attempt =
            self.betting
                .begin(&self.wager_input, guess, session.commission_rate())?;
        self.errors.clear();
        self.set_status(format!(
            "Flipping {} for {} MON...",
            guess,
            format_fixed(attempt.total, 5)
        ));
        tokio::spawn(drive_bet(gateway, from, attempt, self.bet_tx.clone()));
        Ok(())
    }

    pub fn on_bet_progress(&mut self, progress: BetProgress) {
        if self.betting.ignores(&progress) {
            debug!(?progress, "ignoring progress for a stale bet");
            return;
        }
        match progress {
            BetProgress::Submitted {
                attempt_id,
                tx_hash,
            } => {
                self.betting.mark_submitted(attempt_id, tx_hash);
                self.set_status(format!("Waiting for confirmation of {tx_hash:#x}..."));
            }
            BetProgress::Mined {
                attempt_id,
                tx_hash,
                event,
            } => {
                if let Some(outcome) = self.betting.settle(attempt_id, tx_hash, event) {
                    self.set_status(result_message(&outcome));
                }
                if let Some(session) = &self.session {
                    session.refresh_now();
                }
                schedule_animation_reset(
                    attempt_id,
                    SETTLE_ANIMATION_DELAY,
                    self.bet_tx.clone(),
                );
            }
            BetProgress::Failed { attempt_id, error } => {
                self.betting.fail(attempt_id, &error);
                self.set_status("Bet failed");
                self.push_error(error.to_string());
            }
            BetProgress::AnimationDone { attempt_id } => {
                self.betting.finish_animation(attempt_id);
                self.coin_frame = 0;
            }
        }
    }

    pub fn on_balance_update(&mut self, update: BalanceUpdate) {
        if let Some(session) = self.session.as_mut() {
            session.apply_balance_update(&update);
        }
    }

    /// Advances the coin animation. Returns whether anything changed.
    pub fn tick_animation(&mut self) -> bool {
        if self.betting.is_in_flight() {
            self.coin_frame = self.coin_frame.wrapping_add(1);
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let network = self.connector.network();
        let account = self.session.as_ref().map(|session| AccountView {
            wallet: session.wallet(),
            short_account: shorten_account(session.account()),
            balance: format_balance(session.balance()),
            contract_bound: session.gateway().is_some(),
        });
        let (pool, commission_rate) = match &self.session {
            Some(session) => (
                format_balance(session.contract_balance()),
                session.commission_rate(),
            ),
            None => (String::from("-"), nadsflip::amount::DEFAULT_COMMISSION_RATE),
        };
        let last = self.betting.last_outcome();
        AppSnapshot {
            network_name: network.chain_name.clone(),
            contract_url: network.explorer_address_url(&self.connector.contract()),
            available_wallets: self.connector.available_wallets(),
            connecting: self.connecting.clone(),
            account,
            pool,
            commission_rate,
            wager: self.wager_input.clone(),
            total: display_total(&self.wager_input, commission_rate),
            phase: self.betting.phase().clone(),
            controls_locked: self.betting.is_in_flight(),
            coin_frame: self.coin_frame,
            result: last.map(result_message),
            result_tx_url: last.map(|o| network.explorer_tx_url(&o.tx_hash)),
            history: self.betting.history().recent(3).cloned().collect(),
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }
}

pub fn result_message(outcome: &BetOutcome) -> String {
    if outcome.won {
        let payout = outcome.wager.saturating_mul(alloy_primitives::U256::from(2u64));
        format!("You won {} MON", format_balance(payout))
    } else {
        format!("You lost {} MON", format_fixed(outcome.total_charged, 5))
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let connector = config.connector()?;
    let (mut controller, mut events) = AppController::new(connector);
    if let Some(kind) = config.auto_connect.clone() {
        controller.request_connect(kind);
    }
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut controller, &mut events, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop(
    controller: &mut AppController,
    events: &mut ControllerEvents,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    let mut animation = time::interval(COIN_FRAME_INTERVAL);
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::Connect(kind) => controller.request_connect(kind),
                    ui::UserEvent::Flip(guess) => controller.place_bet(guess),
                    ui::UserEvent::StepWager(steps) => controller.step_wager(steps),
                    ui::UserEvent::SetWager(raw) => controller.set_wager(raw),
                    ui::UserEvent::Refresh => controller.refresh(),
                    ui::UserEvent::Disconnect => controller.disconnect(),
                    ui::UserEvent::DismissErrors => controller.dismiss_errors(),
                }
            }
            Some(outcome) = events.connect.recv() => controller.on_connected(outcome),
            Some(event) = events.provider.recv() => controller.on_provider_event(event),
            Some(update) = events.balances.recv() => controller.on_balance_update(update),
            Some(progress) = events.bets.recv() => controller.on_bet_progress(progress),
            _ = animation.tick() => {
                if !controller.tick_animation() {
                    continue;
                }
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("draw failed")?;
    }
    Ok(())
}
