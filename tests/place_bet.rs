#![allow(non_snake_case)]
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use chrono::Utc;
use nadsflip::{
    betting::{
        BetOutcome,
        BetPhase,
        BetProgress,
        BettingSession,
        Guess,
        HISTORY_DEPTH,
        OutcomeSource,
        SETTLE_ANIMATION_DELAY,
        drive_bet,
        schedule_animation_reset,
    },
    contract::ContractGateway,
    error::{
        BetError,
        RpcError,
    },
    provider::ChainHandle,
    test_helpers::{
        MockProvider,
        bet_placed_log,
        receipt_json,
    },
};
use serde_json::json;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;

fn contract() -> Address {
    Address::repeat_byte(0xaa)
}

fn player() -> Address {
    Address::repeat_byte(0x01)
}

fn gateway(provider: &Arc<MockProvider>) -> Arc<ContractGateway> {
    Arc::new(
        ContractGateway::new(contract(), ChainHandle::new(provider.clone()))
            .with_receipt_poll_interval(Duration::from_millis(10)),
    )
}

/// Runs one bet through the state machine until it settles or fails.
async fn play(
    session: &mut BettingSession,
    provider: &Arc<MockProvider>,
    wager: &str,
    guess: Guess,
) -> Vec<BetProgress> {
    let attempt = session.begin(wager, guess, 10).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    drive_bet(gateway(provider), player(), attempt, tx).await;
    let mut seen = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        match &progress {
            BetProgress::Submitted {
                attempt_id,
                tx_hash,
            } => {
                session.mark_submitted(*attempt_id, *tx_hash);
            }
            BetProgress::Mined {
                attempt_id,
                tx_hash,
                event,
            } => {
                session.settle(*attempt_id, *tx_hash, *event);
            }
            BetProgress::Failed { attempt_id, error } => {
                session.fail(*attempt_id, error);
            }
            BetProgress::AnimationDone { attempt_id } => {
                session.finish_animation(*attempt_id);
            }
        }
        seen.push(progress);
    }
    seen
}

#[tokio::test]
async fn place_bet__settles_from_bet_placed_event() {
    // given
    let provider = Arc::new(MockProvider::new());
    let hash = B256::repeat_byte(0x10);
    let wager = U256::from(250_000_000_000_000_000u64);
    provider.respond("eth_sendTransaction", json!(hash));
    provider.respond_once("eth_getTransactionReceipt", json!(null));
    provider.respond(
        "eth_getTransactionReceipt",
        receipt_json(hash, vec![bet_placed_log(contract(), player(), wager, false, true)]),
    );
    let mut session = BettingSession::new();

    // when
    let progress = play(&mut session, &provider, "0.25", Guess::Tails).await;

    // then
    assert_eq!(progress.len(), 2);
    let outcome = session.last_outcome().unwrap();
    assert_eq!(outcome.outcome, Guess::Tails);
    assert!(outcome.won);
    assert_eq!(outcome.source, OutcomeSource::Event);
    assert_eq!(outcome.total_charged, U256::from(275_000_000_000_000_000u64));
    assert_eq!(session.history().len(), 1);
    let (_, params) = provider.last_call("eth_sendTransaction").unwrap();
    assert_eq!(params[0]["value"], "0x3d0ff0b013b8000");
}

#[tokio::test]
async fn place_bet__missing_event_assumes_guess_and_loss() {
    // given
    let provider = Arc::new(MockProvider::new());
    let hash = B256::repeat_byte(0x20);
    provider.respond("eth_sendTransaction", json!(hash));
    provider.respond("eth_getTransactionReceipt", receipt_json(hash, vec![]));
    let mut session = BettingSession::new();

    // when
    play(&mut session, &provider, "0.01", Guess::Heads).await;

    // then
    let outcome = session.last_outcome().unwrap();
    assert_eq!(outcome.outcome, Guess::Heads);
    assert!(!outcome.won);
    assert_eq!(outcome.source, OutcomeSource::AssumedFromGuess);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn place_bet__rejected_signature_moves_to_error_and_allows_retry() {
    // given
    let provider = Arc::new(MockProvider::new());
    provider.fail_once("eth_sendTransaction", RpcError::user_rejected());
    let hash = B256::repeat_byte(0x30);
    provider.respond("eth_sendTransaction", json!(hash));
    provider.respond("eth_getTransactionReceipt", receipt_json(hash, vec![]));
    let mut session = BettingSession::new();

    // when
    let first = play(&mut session, &provider, "0.01", Guess::Heads).await;

    // then
    assert_eq!(
        first,
        vec![BetProgress::Failed {
            attempt_id: 1,
            error: BetError::SubmissionRejected(RpcError::user_rejected()),
        }]
    );
    assert!(matches!(session.phase(), BetPhase::Error(_)));

    // when
    let retry = play(&mut session, &provider, "0.01", Guess::Heads).await;

    // then
    assert_eq!(retry.len(), 2);
    assert!(matches!(session.phase(), BetPhase::Settled { .. }));
}

#[tokio::test]
async fn place_bet__reverted_transaction_fails() {
    // given
    let provider = Arc::new(MockProvider::new());
    let hash = B256::repeat_byte(0x40);
    provider.respond("eth_sendTransaction", json!(hash));
    provider.respond(
        "eth_getTransactionReceipt",
        json!({ "transactionHash": hash, "status": "0x0", "logs": [] }),
    );
    let mut session = BettingSession::new();

    // when
    play(&mut session, &provider, "0.01", Guess::Tails).await;

    // then
    assert_eq!(
        session.phase(),
        &BetPhase::Error(BetError::Reverted(format!("{hash:#x}")).to_string())
    );
}

#[tokio::test]
async fn place_bet__second_bet_refused_while_first_in_flight() {
    // given
    let provider = Arc::new(MockProvider::new());
    provider.respond("eth_sendTransaction", json!(B256::repeat_byte(0x50)));
    let mut session = BettingSession::new();
    let attempt = session.begin("0.01", Guess::Heads, 10).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    provider.respond("eth_getTransactionReceipt", json!(null));
    let driver = tokio::spawn(drive_bet(gateway(&provider), player(), attempt, tx));
    if let Some(BetProgress::Submitted {
        attempt_id,
        tx_hash,
    }) = rx.recv().await
    {
        session.mark_submitted(attempt_id, tx_hash);
    }

    // when
    let second = session.begin("0.01", Guess::Tails, 10);

    // then
    assert_eq!(second, Err(BetError::AlreadyInFlight));
    assert_eq!(provider.call_count("eth_sendTransaction"), 1);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn place_bet__controls_stay_locked_until_animation_finishes() {
    // given
    let provider = Arc::new(MockProvider::new());
    let hash = B256::repeat_byte(0x60);
    provider.respond("eth_sendTransaction", json!(hash));
    provider.respond("eth_getTransactionReceipt", receipt_json(hash, vec![]));
    let mut session = BettingSession::new();
    play(&mut session, &provider, "0.01", Guess::Heads).await;
    let attempt_id = match session.phase() {
        BetPhase::Settled { attempt, .. } => attempt.id,
        other => panic!("unexpected phase {other:?}"),
    };
    let (tx, mut rx) = mpsc::unbounded_channel();

    // when
    let start = tokio::time::Instant::now();
    schedule_animation_reset(attempt_id, SETTLE_ANIMATION_DELAY, tx);
    assert!(session.is_in_flight());
    let done = rx.recv().await.unwrap();
    assert!(!session.ignores(&done));
    if let BetProgress::AnimationDone { attempt_id } = done {
        session.finish_animation(attempt_id);
    }

    // then
    assert!(start.elapsed() >= SETTLE_ANIMATION_DELAY);
    assert_eq!(session.phase(), &BetPhase::Idle);
    assert!(!session.is_in_flight());
}

#[test]
fn history__keeps_ten_most_recent_first() {
    // given
    let mut session = BettingSession::new();
    let outcome = |n: u8| BetOutcome {
        tx_hash: B256::repeat_byte(n),
        amount: U256::from(1u64),
        wager: U256::from(1u64),
        total_charged: U256::from(1u64),
        guess: Guess::Heads,
        outcome: Guess::Heads,
        won: true,
        timestamp: Utc::now(),
        source: OutcomeSource::Event,
    };

    // when
    let mut history = session.history().clone();
    for n in 1..=12 {
        history.push(outcome(n));
    }
    session.reset();

    // then
    assert_eq!(history.len(), HISTORY_DEPTH);
    assert_eq!(history.iter().next().unwrap().tx_hash, B256::repeat_byte(12));
    assert_eq!(history.iter().last().unwrap().tx_hash, B256::repeat_byte(3));
    assert!(session.history().is_empty());
}
