use crate::{
    contract::ICoinFlip,
    error::RpcError,
    network::MONAD_TESTNET_CHAIN_ID,
    provider::{
        Eip1193,
        EventSender,
        ListenerId,
        ListenerRegistry,
        ProviderEvent,
        ProviderEventKind,
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
};
use async_trait::async_trait;
use serde_json::{
    Value,
    json,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

type Reply = Result<Value, RpcError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted in-memory wallet provider.
///
/// Replies are keyed by method. `eth_call` replies can also be keyed by the
/// 4-byte selector (`eth_call:0x12345678`), which takes precedence over a
/// plain `eth_call` script. One-shot replies are consumed before sticky ones.
/// Every request is recorded.
#[derive(Debug, Default)]
pub struct MockProvider {
    sticky: Mutex<HashMap<String, Reply>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Value)>>,
    listeners: ListenerRegistry,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_sticky(&self, key: &str, reply: Reply) {
        let mut sticky = lock(&self.sticky);
        let prefix = format!("{key}:");
        sticky.retain(|existing, _| !existing.starts_with(&prefix));
        sticky.insert(key.to_string(), reply);
    }

    /// Answer every `method` request with `value` until re-scripted.
    pub fn respond(&self, method: &str, value: Value) {
        self.set_sticky(method, Ok(value));
    }

    /// Fail every `method` request with `err` until re-scripted.
    pub fn fail(&self, method: &str, err: RpcError) {
        self.set_sticky(method, Err(err));
    }

    pub fn respond_once(&self, method: &str, value: Value) {
        lock(&self.queued)
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(value));
    }

    pub fn fail_once(&self, method: &str, err: RpcError) {
        lock(&self.queued)
            .entry(method.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Scripts `getContractBalance` and `commissionRate`.
    pub fn mock_contract_reads(&self, pool: U256, commission_rate: u64) {
        let mut sticky = lock(&self.sticky);
        sticky.insert(
            selector_key(&ICoinFlip::getContractBalanceCall::SELECTOR),
            Ok(json!(encode_uint(pool))),
        );
        sticky.insert(
            selector_key(&ICoinFlip::commissionRateCall::SELECTOR),
            Ok(json!(encode_uint(U256::from(commission_rate)))),
        );
    }

    /// A wallet already on the target chain that grants `account`.
    pub fn script_wallet(&self, account: &str, balance: U256, pool: U256, commission_rate: u64) {
        self.respond("eth_requestAccounts", json!([account]));
        self.respond("eth_accounts", json!([account]));
        self.respond(
            "eth_chainId",
            json!(format!("0x{MONAD_TESTNET_CHAIN_ID:x}")),
        );
        self.respond("eth_getBalance", json!(format!("0x{balance:x}")));
        self.mock_contract_reads(pool, commission_rate);
    }

    pub fn emit(&self, event: ProviderEvent) {
        self.listeners.emit(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener_count_for(&self, kind: ProviderEventKind) -> usize {
        self.listeners.count(kind)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    pub fn last_call(&self, method: &str) -> Option<(String, Value)> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .cloned()
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|(m, _)| m == method).count()
    }

    fn reply_for(&self, method: &str, params: &Value) -> Reply {
        let specific = (method == "eth_call")
            .then(|| params[0]["data"].as_str())
            .flatten()
            .and_then(|data| data.get(..10))
            .map(|selector| format!("eth_call:{selector}"));
        let keys: Vec<&str> = specific.as_deref().into_iter().chain([method]).collect();

        {
            let mut queued = lock(&self.queued);
            for key in &keys {
                if let Some(reply) = queued.get_mut(*key).and_then(VecDeque::pop_front) {
                    return reply;
                }
            }
        }
        let sticky = lock(&self.sticky);
        keys.iter()
            .find_map(|key| sticky.get(*key).cloned())
            .unwrap_or_else(|| {
                Err(RpcError::new(
                    -32601,
                    format!("no scripted reply for {method}"),
                ))
            })
    }
}

#[async_trait]
impl Eip1193 for MockProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let reply = self.reply_for(method, &params);
        lock(&self.calls).push((method.to_string(), params));
        reply
    }

    fn on(&self, kind: ProviderEventKind, listener: EventSender) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

fn selector_key(selector: &[u8; 4]) -> String {
    format!("eth_call:0x{}", hex::encode(selector))
}

/// ABI word for a `uint256` return value.
pub fn encode_uint(value: U256) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

/// JSON log entry carrying an ABI-encoded `BetPlaced` event.
pub fn bet_placed_log(
    contract: Address,
    player: Address,
    amount: U256,
    outcome: bool,
    won: bool,
) -> Value {
    let event = ICoinFlip::BetPlaced {
        player,
        amount,
        outcome,
        won,
    };
    json!({
        "address": contract,
        "topics": [ICoinFlip::BetPlaced::SIGNATURE_HASH],
        "data": format!("0x{}", hex::encode(event.encode_data())),
    })
}

/// JSON receipt of a successfully mined transaction.
pub fn receipt_json(hash: B256, logs: Vec<Value>) -> Value {
    json!({
        "transactionHash": hash,
        "blockNumber": "0x1",
        "status": "0x1",
        "logs": logs,
    })
}
