use crate::{
    amount::DEFAULT_COMMISSION_RATE,
    betting::Guess,
    error::{
        BetError,
        ReadFailure,
        RpcError,
    },
    provider::{
        ChainHandle,
        TransactionReceipt,
        TransactionRequest,
    },
};
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use alloy_sol_types::{
    SolCall,
    SolEvent,
    sol,
};
use std::{
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::time;
use tracing::{
    debug,
    warn,
};

sol! {
    interface ICoinFlip {
        function getContractBalance() external view returns (uint256);
        function commissionRate() external view returns (uint256);
        function flipCoin(bool guess) external payable;

        event BetPlaced(address player, uint256 amount, bool outcome, bool won);
    }
}

/// Gas ceiling for `flipCoin`, bounding the worst-case cost of a flip.
pub const FLIP_GAS_LIMIT: u64 = 300_000;
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetPlacedEvent {
    pub player: Address,
    pub amount: U256,
    pub outcome: Guess,
    pub won: bool,
}

#[derive(Debug)]
struct GatewayCache {
    contract_balance: U256,
    commission_rate: u64,
}

/// Typed handle on the deployed coin-flip contract. Reads never fail: on RPC
/// errors they log and hand back the last good value.
pub struct ContractGateway {
    address: Address,
    chain: ChainHandle,
    receipt_poll_interval: Duration,
    cache: Mutex<GatewayCache>,
}

impl ContractGateway {
    pub fn new(address: Address, chain: ChainHandle) -> Self {
        Self {
            address,
            chain,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            cache: Mutex::new(GatewayCache {
                contract_balance: U256::ZERO,
                commission_rate: DEFAULT_COMMISSION_RATE,
            }),
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn cache(&self) -> MutexGuard<'_, GatewayCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached_balance(&self) -> U256 {
        self.cache().contract_balance
    }

    pub fn cached_commission_rate(&self) -> u64 {
        self.cache().commission_rate
    }

    async fn call<C: SolCall>(&self, call: C) -> Result<C::Return, RpcError> {
        let raw = self.chain.call(self.address, &call.abi_encode()).await?;
        C::abi_decode_returns(&raw, true).map_err(|e| {
            RpcError::transport(format!("could not decode {} result: {e}", C::SIGNATURE))
        })
    }

    pub async fn try_read_balance(&self) -> Result<U256, ReadFailure> {
        let balance = self
            .call(ICoinFlip::getContractBalanceCall {})
            .await
            .map_err(|e| ReadFailure::new("contract balance", e))?
            ._0;
        self.cache().contract_balance = balance;
        Ok(balance)
    }

    pub async fn read_balance(&self) -> U256 {
        match self.try_read_balance().await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(%err, "keeping previous contract balance");
                self.cached_balance()
            }
        }
    }

    pub async fn try_read_commission_rate(&self) -> Result<u64, ReadFailure> {
        let raw = self
            .call(ICoinFlip::commissionRateCall {})
            .await
            .map_err(|e| ReadFailure::new("commission rate", e))?
            ._0;
        let rate = u64::try_from(raw).map_err(|_| {
            ReadFailure::new(
                "commission rate",
                RpcError::transport(format!("commission rate {raw} out of range")),
            )
        })?;
        self.cache().commission_rate = rate;
        Ok(rate)
    }

    pub async fn read_commission_rate(&self) -> u64 {
        match self.try_read_commission_rate().await {
            Ok(rate) => rate,
            Err(err) => {
                warn!(%err, "keeping previous commission rate");
                self.cached_commission_rate()
            }
        }
    }

    pub async fn submit_guess(
        &self,
        from: Address,
        guess: Guess,
        total_value: U256,
    ) -> Result<PendingTransaction, BetError> {
        let data = ICoinFlip::flipCoinCall {
            guess: guess.as_bool(),
        }
        .abi_encode();
        let tx = TransactionRequest::new(from, self.address, total_value, FLIP_GAS_LIMIT, &data);
        let hash = self
            .chain
            .send_transaction(&tx)
            .await
            .map_err(BetError::SubmissionRejected)?;
        debug!(%hash, %total_value, ?guess, "flipCoin submitted");
        Ok(PendingTransaction {
            hash,
            chain: self.chain.clone(),
            poll_interval: self.receipt_poll_interval,
        })
    }

    /// First `BetPlaced` emitted by this contract in the receipt.
    pub fn parse_bet_placed(&self, receipt: &TransactionReceipt) -> Option<BetPlacedEvent> {
        receipt
            .logs
            .iter()
            .filter(|log| log.address == self.address)
            .filter(|log| log.topics.first() == Some(&ICoinFlip::BetPlaced::SIGNATURE_HASH))
            .find_map(|log| {
                match ICoinFlip::BetPlaced::decode_raw_log(
                    log.topics.iter().copied(),
                    &log.data,
                    true,
                ) {
                    Ok(event) => Some(BetPlacedEvent {
                        player: event.player,
                        amount: event.amount,
                        outcome: Guess::from_bool(event.outcome),
                        won: event.won,
                    }),
                    Err(err) => {
                        warn!(%err, "undecodable BetPlaced log");
                        None
                    }
                }
            })
    }
}

/// A transaction the node accepted but that may not be mined yet.
#[derive(Clone)]
pub struct PendingTransaction {
    hash: B256,
    chain: ChainHandle,
    poll_interval: Duration,
}

impl PendingTransaction {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Polls until the receipt shows up. A reverted transaction is an error.
    pub async fn wait(&self) -> Result<TransactionReceipt, BetError> {
        loop {
            match self.chain.transaction_receipt(self.hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => return Ok(receipt),
                Ok(Some(_)) => return Err(BetError::Reverted(format!("{:#x}", self.hash))),
                Ok(None) => time::sleep(self.poll_interval).await,
                Err(err) => return Err(BetError::Confirmation(err)),
            }
        }
    }
}
