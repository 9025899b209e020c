use crate::error::RpcError;
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::{
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            ProviderEvent::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => ProviderEventKind::ChainChanged,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
}

pub type ListenerId = u64;
pub type EventSender = mpsc::UnboundedSender<ProviderEvent>;

/// The request/event surface every injected wallet exposes (EIP-1193).
#[async_trait]
pub trait Eip1193: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Register a listener for one event kind.
    fn on(&self, kind: ProviderEventKind, listener: EventSender) -> ListenerId;

    /// Returns false if the id was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ProviderEventKind, EventSender)>>,
}

impl ListenerRegistry {
    fn entries(
        &self,
    ) -> MutexGuard<'_, Vec<(ListenerId, ProviderEventKind, EventSender)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, kind: ProviderEventKind, listener: EventSender) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries().push((id, kind, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(existing, _, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: ProviderEventKind) -> usize {
        self.entries().iter().filter(|(_, k, _)| *k == kind).count()
    }

    /// Deliver to every listener of the event's kind.
    pub fn emit(&self, event: &ProviderEvent) {
        let kind = event.kind();
        for (id, _, listener) in self.entries().iter().filter(|(_, k, _)| *k == kind) {
            if listener.send(event.clone()).is_err() {
                debug!(id, ?kind, "listener receiver dropped");
            }
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Clone, Debug)]
struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let res = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::transport(format!("{method} request failed: {e}")))?;
        let status = res.status();
        let bytes = res.bytes().await.map_err(|e| {
            RpcError::transport(format!("failed to read {method} response: {e}"))
        })?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(RpcError::transport(format!(
                "{} responded with {status} to {method}: {body}",
                self.url
            )));
        }
        let response: RpcResponse = serde_json::from_slice(&bytes).map_err(|e| {
            RpcError::transport(format!("invalid {method} response: {e}"))
        })?;
        match response.error {
            Some(err) => Err(err),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }
}

/// EIP-1193 over plain JSON-RPC HTTP. Wallet bridges that expose an HTTP
/// endpoint (and the public RPC node) are reached through this. HTTP has no
/// push channel, so account and chain changes are detected by polling while
/// at least one listener is registered.
pub struct HttpProvider {
    client: RpcClient,
    listeners: Arc<ListenerRegistry>,
    event_poll_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HttpProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_event_poll_interval(url, DEFAULT_EVENT_POLL_INTERVAL)
    }

    pub fn with_event_poll_interval(
        url: impl Into<String>,
        event_poll_interval: Duration,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            RpcError::transport(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            client: RpcClient {
                url: url.into(),
                http,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            listeners: Arc::new(ListenerRegistry::default()),
            event_poll_interval,
            watcher: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.client.url
    }

    fn ensure_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(url = %self.client.url, "no async runtime; provider events disabled");
            return;
        };
        *watcher = Some(runtime.spawn(watch_for_changes(
            self.client.clone(),
            self.listeners.clone(),
            self.event_poll_interval,
        )));
    }

    fn stop_watcher(&self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for HttpProvider {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

#[async_trait]
impl Eip1193 for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.client.call(method, params).await
    }

    fn on(&self, kind: ProviderEventKind, listener: EventSender) -> ListenerId {
        let id = self.listeners.add(kind, listener);
        self.ensure_watcher();
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.listeners.remove(id);
        if self.listeners.is_empty() {
            self.stop_watcher();
        }
        removed
    }
}

async fn watch_for_changes(
    client: RpcClient,
    listeners: Arc<ListenerRegistry>,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    let mut last_accounts: Option<Vec<String>> = None;
    let mut last_chain: Option<String> = None;
    loop {
        ticker.tick().await;
        if listeners.is_empty() {
            break;
        }
        match client.call("eth_accounts", json!([])).await {
            Ok(value) => match serde_json::from_value::<Vec<String>>(value) {
                Ok(accounts) => {
                    if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                        listeners.emit(&ProviderEvent::AccountsChanged(accounts.clone()));
                    }
                    last_accounts = Some(accounts);
                }
                Err(err) => debug!(%err, "undecodable eth_accounts payload"),
            },
            Err(err) => debug!(%err, "eth_accounts poll failed"),
        }
        match client.call("eth_chainId", json!([])).await {
            Ok(Value::String(chain)) => {
                let chain = chain.to_lowercase();
                if last_chain.as_ref().is_some_and(|prev| *prev != chain) {
                    listeners.emit(&ProviderEvent::ChainChanged(chain.clone()));
                }
                last_chain = Some(chain);
            }
            Ok(other) => debug!(?other, "unexpected eth_chainId payload"),
            Err(err) => debug!(%err, "eth_chainId poll failed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub gas: String,
    pub data: String,
}

impl TransactionRequest {
    pub fn new(from: Address, to: Address, value: U256, gas: u64, data: &[u8]) -> Self {
        Self {
            from,
            to,
            value: format!("0x{value:x}"),
            gas: format!("0x{gas:x}"),
            data: format!("0x{}", hex::encode(data)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    /// Pre-Byzantium receipts carry no status; treat them as successful.
    pub fn succeeded(&self) -> bool {
        self.status.as_deref().is_none_or(|status| status != "0x0")
    }
}

/// Typed reads and writes on top of a raw EIP-1193 transport.
#[derive(Clone)]
pub struct ChainHandle {
    transport: Arc<dyn Eip1193>,
}

impl ChainHandle {
    pub fn new(transport: Arc<dyn Eip1193>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Eip1193> {
        &self.transport
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let value = self.transport.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::transport(format!("unexpected {method} result: {e}")))
    }

    pub async fn chain_id(&self) -> Result<String, RpcError> {
        self.request("eth_chainId", json!([])).await
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        self.request("eth_getBalance", json!([address, "latest"]))
            .await
    }

    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, RpcError> {
        let call = json!({
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        });
        self.request("eth_call", json!([call, "latest"])).await
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, RpcError> {
        self.request("eth_sendTransaction", json!([tx])).await
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([hash]))
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::error::TRANSPORT_ERROR;
    use std::sync::atomic::AtomicUsize;
    use tokio::{
        io::{
            AsyncReadExt,
            AsyncWriteExt,
        },
        net::{
            TcpListener,
            TcpStream,
        },
    };

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";
    const OTHER_ACCOUNT: &str = "0x00000000000000000000000000000000000000b2";
    const POLL: Duration = Duration::from_millis(20);

    /// Maps a method name to an HTTP status and the JSON-RPC body (without id).
    type StubHandler = Arc<dyn Fn(&str) -> (u16, Value) + Send + Sync>;

    /// Minimal JSON-RPC node on localhost. Returns its URL and a counter of
    /// requests served.
    async fn spawn_rpc_stub(handler: StubHandler) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_one(socket, handler.clone()));
            }
        });
        (url, served)
    }

    async fn serve_one(mut socket: TcpStream, handler: StubHandler) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|len| len.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let request: Value = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
        let (status, mut body) = handler(request["method"].as_str().unwrap_or_default());
        body["jsonrpc"] = json!("2.0");
        body["id"] = request["id"].clone();
        let body = body.to_string();
        let response = format!(
            "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    fn ok(result: Value) -> (u16, Value) {
        (200, json!({ "result": result }))
    }

    /// Answers the first `switch_after` calls with `before`, later ones with `after`.
    fn changes_after(switch_after: usize, before: Value, after: Value) -> impl Fn() -> Value {
        let calls = AtomicUsize::new(0);
        move || {
            if calls.fetch_add(1, Ordering::SeqCst) < switch_after {
                before.clone()
            } else {
                after.clone()
            }
        }
    }

    #[test]
    fn listener_registry__emits_only_to_matching_kind() {
        // given
        let registry = ListenerRegistry::default();
        let (accounts_tx, mut accounts_rx) = mpsc::unbounded_channel();
        let (chain_tx, mut chain_rx) = mpsc::unbounded_channel();
        registry.add(ProviderEventKind::AccountsChanged, accounts_tx);
        registry.add(ProviderEventKind::ChainChanged, chain_tx);

        // when
        registry.emit(&ProviderEvent::ChainChanged("0x1".to_string()));

        // then
        assert_eq!(
            chain_rx.try_recv().ok(),
            Some(ProviderEvent::ChainChanged("0x1".to_string()))
        );
        assert!(accounts_rx.try_recv().is_err());
    }

    #[test]
    fn listener_registry__remove_is_idempotent() {
        let registry = ListenerRegistry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.add(ProviderEventKind::AccountsChanged, tx);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn transaction_request__encodes_quantities_as_hex() {
        let tx = TransactionRequest::new(
            Address::ZERO,
            Address::ZERO,
            U256::from(11_000_000_000_000_000u64),
            300_000,
            &[0xde, 0xad],
        );
        assert_eq!(tx.value, "0x27147114878000");
        assert_eq!(tx.gas, "0x493e0");
        assert_eq!(tx.data, "0xdead");
    }

    #[test]
    fn receipt__status_zero_is_failure() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "11".repeat(32)),
            "status": "0x0",
            "logs": [],
        }))
        .unwrap();
        assert!(!receipt.succeeded());
    }

    #[tokio::test]
    async fn http_provider__maps_rpc_error_object() {
        // given
        let (url, _) = spawn_rpc_stub(Arc::new(|_method: &str| {
            (
                200,
                json!({ "error": { "code": 4001, "message": "User rejected the request." } }),
            )
        }))
        .await;
        let provider = HttpProvider::new(url).unwrap();

        // when
        let result = provider.request("eth_sendTransaction", json!([])).await;

        // then
        assert_eq!(result, Err(RpcError::user_rejected()));
    }

    #[tokio::test]
    async fn http_provider__non_success_status_is_transport_error() {
        let (url, _) =
            spawn_rpc_stub(Arc::new(|_method: &str| (503, json!({ "result": "0x1" })))).await;
        let provider = HttpProvider::new(url).unwrap();

        let err = provider
            .request("eth_chainId", json!([]))
            .await
            .unwrap_err();

        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[tokio::test]
    async fn http_provider__changed_chain_id_emits_chain_changed() {
        // given
        let chain = changes_after(1, json!("0x27AF"), json!("0x1"));
        let (url, _) = spawn_rpc_stub(Arc::new(move |method: &str| match method {
            "eth_chainId" => ok(chain()),
            _ => ok(json!([ACCOUNT])),
        }))
        .await;
        let provider = HttpProvider::with_event_poll_interval(url, POLL).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        provider.on(ProviderEventKind::ChainChanged, tx);
        let event = time::timeout(Duration::from_secs(2), rx.recv()).await;

        // then
        assert_eq!(
            event.unwrap(),
            Some(ProviderEvent::ChainChanged("0x1".to_string()))
        );
    }

    #[tokio::test]
    async fn http_provider__undecodable_accounts_reply_is_not_an_empty_list() {
        // given
        let calls = AtomicUsize::new(0);
        let (url, _) = spawn_rpc_stub(Arc::new(move |method: &str| match method {
            "eth_accounts" => match calls.fetch_add(1, Ordering::SeqCst) {
                0 => ok(json!([ACCOUNT])),
                1..=3 => ok(json!(null)),
                _ => ok(json!([OTHER_ACCOUNT])),
            },
            _ => ok(json!("0x27AF")),
        }))
        .await;
        let provider = HttpProvider::with_event_poll_interval(url, POLL).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        provider.on(ProviderEventKind::AccountsChanged, tx);
        let event = time::timeout(Duration::from_secs(2), rx.recv()).await;

        // then
        assert_eq!(
            event.unwrap(),
            Some(ProviderEvent::AccountsChanged(vec![OTHER_ACCOUNT.to_string()]))
        );
    }

    #[tokio::test]
    async fn http_provider__removing_last_listener_stops_polling() {
        // given
        let (url, served) = spawn_rpc_stub(Arc::new(|method: &str| match method {
            "eth_chainId" => ok(json!("0x27AF")),
            _ => ok(json!([ACCOUNT])),
        }))
        .await;
        let provider = HttpProvider::with_event_poll_interval(url, POLL).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = provider.on(ProviderEventKind::AccountsChanged, tx);
        time::sleep(POLL * 5).await;
        assert!(served.load(Ordering::SeqCst) > 0);

        // when
        assert!(provider.remove_listener(id));
        time::sleep(POLL * 5).await;
        let after_removal = served.load(Ordering::SeqCst);
        time::sleep(POLL * 10).await;

        // then
        assert_eq!(served.load(Ordering::SeqCst), after_removal);
    }
}
