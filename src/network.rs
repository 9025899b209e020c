use alloy_primitives::{
    Address,
    B256,
};
use serde_json::{
    Value,
    json,
};

pub const MONAD_TESTNET_CHAIN_ID: u64 = 0x27AF;
pub const MONAD_TESTNET_RPC_URL: &str = "https://testnet-rpc.monad.xyz";
pub const MONAD_TESTNET_EXPLORER_URL: &str = "https://testnet.monadexplorer.com";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xa668d8e939521858b11b5683a0b9177026fd482a";

/// Parameters of the chain the client plays on. Used both to validate the
/// wallet's active chain and to register the chain with wallets that do not
/// know it yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub decimals: u8,
    pub rpc_url: String,
    pub explorer_url: String,
}

impl NetworkParams {
    pub fn monad_testnet() -> Self {
        Self {
            chain_id: MONAD_TESTNET_CHAIN_ID,
            chain_name: "Monad Testnet".to_string(),
            currency_name: "MON".to_string(),
            currency_symbol: "MON".to_string(),
            decimals: 18,
            rpc_url: MONAD_TESTNET_RPC_URL.to_string(),
            explorer_url: MONAD_TESTNET_EXPLORER_URL.to_string(),
        }
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    /// `0x27AF` for Monad Testnet, in the upper-case form wallets are handed.
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:X}", self.chain_id)
    }

    pub fn matches_chain_id(&self, reported: &str) -> bool {
        parse_chain_id(reported) == Some(self.chain_id)
    }

    pub fn switch_chain_params(&self) -> Value {
        json!([{ "chainId": self.chain_id_hex() }])
    }

    pub fn add_chain_params(&self) -> Value {
        json!([{
            "chainId": self.chain_id_hex(),
            "chainName": self.chain_name,
            "nativeCurrency": {
                "name": self.currency_name,
                "symbol": self.currency_symbol,
                "decimals": self.decimals,
            },
            "rpcUrls": [self.rpc_url],
            "blockExplorerUrls": [self.explorer_url],
        }])
    }

    pub fn explorer_address_url(&self, address: &Address) -> String {
        format!(
            "{}/address/{:#x}",
            self.explorer_url.trim_end_matches('/'),
            address
        )
    }

    pub fn explorer_tx_url(&self, hash: &B256) -> String {
        format!("{}/tx/{:#x}", self.explorer_url.trim_end_matches('/'), hash)
    }
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self::monad_testnet()
    }
}

/// Wallets report chain ids as hex quantities with inconsistent casing.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16).ok(),
        None => raw.parse().ok(),
    }
}
