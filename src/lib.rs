pub mod amount;

pub mod betting;

pub mod connector;

pub mod contract;

pub mod error;

pub mod network;

pub mod provider;

pub mod session;

pub mod wallets;

pub mod test_helpers;
