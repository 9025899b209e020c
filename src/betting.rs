use crate::{
    amount::{
        parse_wager,
        total_with_commission,
    },
    contract::{
        BetPlacedEvent,
        ContractGateway,
    },
    error::BetError,
};
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{
    error,
    info,
    warn,
};

pub const HISTORY_DEPTH: usize = 10;
pub const SETTLE_ANIMATION_DELAY: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Guess {
    Heads,
    Tails,
}

impl Guess {
    pub fn from_bool(heads: bool) -> Self {
        if heads { Guess::Heads } else { Guess::Tails }
    }

    pub fn as_bool(self) -> bool {
        matches!(self, Guess::Heads)
    }

    pub fn label(self) -> &'static str {
        match self {
            Guess::Heads => "Heads",
            Guess::Tails => "Tails",
        }
    }
}

impl fmt::Display for Guess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetAttempt {
    pub id: u64,
    pub wager: U256,
    pub total: U256,
    pub guess: Guess,
}

/// Whether an outcome was read from the `BetPlaced` event or assumed because
/// the receipt carried none.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeSource {
    Event,
    AssumedFromGuess,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetOutcome {
    pub tx_hash: B256,
    pub amount: U256,
    pub wager: U256,
    pub total_charged: U256,
    pub guess: Guess,
    pub outcome: Guess,
    pub won: bool,
    pub timestamp: DateTime<Utc>,
    pub source: OutcomeSource,
}

/// Most recent outcome first, capped at [`HISTORY_DEPTH`].
#[derive(Clone, Debug, Default)]
pub struct BetHistory {
    entries: VecDeque<BetOutcome>,
}

impl BetHistory {
    pub fn push(&mut self, outcome: BetOutcome) {
        self.entries.push_front(outcome);
        self.entries.truncate(HISTORY_DEPTH);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BetOutcome> {
        self.entries.iter()
    }

    pub fn recent(&self, n: usize) -> impl Iterator<Item = &BetOutcome> {
        self.entries.iter().take(n)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BetPhase {
    Idle,
    Submitting(BetAttempt),
    AwaitingConfirmation { attempt: BetAttempt, tx_hash: B256 },
    Settled { attempt: BetAttempt, outcome: BetOutcome },
    Error(String),
}

/// Progress reported by [`drive_bet`] and the settle timer, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum BetProgress {
    Submitted {
        attempt_id: u64,
        tx_hash: B256,
    },
    Mined {
        attempt_id: u64,
        tx_hash: B256,
        event: Option<BetPlacedEvent>,
    },
    Failed {
        attempt_id: u64,
        error: BetError,
    },
    AnimationDone {
        attempt_id: u64,
    },
}

/// State machine for a single flip at a time, plus the outcomes it produced.
#[derive(Debug)]
pub struct BettingSession {
    phase: BetPhase,
    history: BetHistory,
    last_outcome: Option<BetOutcome>,
    next_attempt_id: u64,
}

impl Default for BettingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BettingSession {
    pub fn new() -> Self {
        Self {
            phase: BetPhase::Idle,
            history: BetHistory::default(),
            last_outcome: None,
            next_attempt_id: 1,
        }
    }

    pub fn phase(&self) -> &BetPhase {
        &self.phase
    }

    pub fn history(&self) -> &BetHistory {
        &self.history
    }

    pub fn last_outcome(&self) -> Option<&BetOutcome> {
        self.last_outcome.as_ref()
    }

    /// Controls stay disabled from submission until the settle animation ends.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.phase,
            BetPhase::Submitting(_)
                | BetPhase::AwaitingConfirmation { .. }
                | BetPhase::Settled { .. }
        )
    }

    fn current_attempt(&self) -> Option<&BetAttempt> {
        match &self.phase {
            BetPhase::Submitting(attempt)
            | BetPhase::AwaitingConfirmation { attempt, .. }
            | BetPhase::Settled { attempt, .. } => Some(attempt),
            BetPhase::Idle | BetPhase::Error(_) => None,
        }
    }

    fn is_current(&self, attempt_id: u64) -> bool {
        self.current_attempt()
            .is_some_and(|attempt| attempt.id == attempt_id)
    }

    /// Idle/Error → Submitting. Refused while another flip is in flight or
    /// when the wager is not a playable amount.
    pub fn begin(
        &mut self,
        raw_wager: &str,
        guess: Guess,
        commission_rate: u64,
    ) -> Result<BetAttempt, BetError> {
        if self.is_in_flight() {
            return Err(BetError::AlreadyInFlight);
        }
        let wager = parse_wager(raw_wager)?;
        let attempt = BetAttempt {
            id: self.next_attempt_id,
            wager,
            total: total_with_commission(wager, commission_rate),
            guess,
        };
        self.next_attempt_id += 1;
        self.last_outcome = None;
        self.phase = BetPhase::Submitting(attempt);
        Ok(attempt)
    }

    pub fn mark_submitted(&mut self, attempt_id: u64, tx_hash: B256) -> bool {
        match self.phase {
            BetPhase::Submitting(attempt) if attempt.id == attempt_id => {
                self.phase = BetPhase::AwaitingConfirmation { attempt, tx_hash };
                true
            }
            _ => false,
        }
    }

    /// AwaitingConfirmation → Settled. Without a `BetPlaced` event the outcome
    /// is assumed to equal the guess and the bet counts as lost; such outcomes
    /// are tagged and kept out of the history.
    pub fn settle(
        &mut self,
        attempt_id: u64,
        tx_hash: B256,
        event: Option<BetPlacedEvent>,
    ) -> Option<BetOutcome> {
        let attempt = match self.phase {
            BetPhase::AwaitingConfirmation { attempt, .. } if attempt.id == attempt_id => {
                attempt
            }
            _ => return None,
        };
        let outcome = match event {
            Some(event) => BetOutcome {
                tx_hash,
                amount: event.amount,
                wager: attempt.wager,
                total_charged: attempt.total,
                guess: attempt.guess,
                outcome: event.outcome,
                won: event.won,
                timestamp: Utc::now(),
                source: OutcomeSource::Event,
            },
            None => {
                warn!(%tx_hash, "BetPlaced event not found in receipt; assuming outcome = guess, lost");
                BetOutcome {
                    tx_hash,
                    amount: attempt.wager,
                    wager: attempt.wager,
                    total_charged: attempt.total,
                    guess: attempt.guess,
                    outcome: attempt.guess,
                    won: false,
                    timestamp: Utc::now(),
                    source: OutcomeSource::AssumedFromGuess,
                }
            }
        };
        if outcome.source == OutcomeSource::Event {
            self.history.push(outcome.clone());
        }
        self.last_outcome = Some(outcome.clone());
        self.phase = BetPhase::Settled {
            attempt,
            outcome: outcome.clone(),
        };
        Some(outcome)
    }

    /// Submitting/AwaitingConfirmation → Error, freeing the controls.
    pub fn fail(&mut self, attempt_id: u64, err: &BetError) -> bool {
        let failing = matches!(
            self.phase,
            BetPhase::Submitting(attempt) | BetPhase::AwaitingConfirmation { attempt, .. }
                if attempt.id == attempt_id
        );
        if failing {
            self.phase = BetPhase::Error(err.to_string());
        }
        failing
    }

    /// Settled → Idle once the flip animation has played out.
    pub fn finish_animation(&mut self, attempt_id: u64) -> bool {
        match self.phase {
            BetPhase::Settled { attempt, .. } if attempt.id == attempt_id => {
                self.phase = BetPhase::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn ignores(&self, progress: &BetProgress) -> bool {
        let attempt_id = match progress {
            BetProgress::Submitted { attempt_id, .. }
            | BetProgress::Mined { attempt_id, .. }
            | BetProgress::Failed { attempt_id, .. }
            | BetProgress::AnimationDone { attempt_id } => *attempt_id,
        };
        !self.is_current(attempt_id)
    }

    /// Forget everything, as after a chain change.
    pub fn reset(&mut self) {
        self.phase = BetPhase::Idle;
        self.history.clear();
        self.last_outcome = None;
    }
}

/// Runs one flip end to end: submit, wait for the receipt, read the event.
/// Steps are strictly sequential and reported over `progress` in order.
pub async fn drive_bet(
    gateway: Arc<ContractGateway>,
    from: Address,
    attempt: BetAttempt,
    progress: mpsc::UnboundedSender<BetProgress>,
) {
    let attempt_id = attempt.id;
    info!(
        attempt_id,
        guess = %attempt.guess,
        wager = %attempt.wager,
        total = %attempt.total,
        "placing bet"
    );
    let report = |p: BetProgress| {
        if progress.send(p).is_err() {
            warn!(attempt_id, "bet progress receiver dropped");
        }
    };
    let pending = match gateway.submit_guess(from, attempt.guess, attempt.total).await {
        Ok(pending) => pending,
        Err(error) => {
            error!(attempt_id, %error, "bet submission failed");
            report(BetProgress::Failed { attempt_id, error });
            return;
        }
    };
    let tx_hash = pending.hash();
    info!(attempt_id, %tx_hash, "transaction sent");
    report(BetProgress::Submitted {
        attempt_id,
        tx_hash,
    });
    match pending.wait().await {
        Ok(receipt) => {
            info!(attempt_id, %tx_hash, block = ?receipt.block_number, "transaction mined");
            let event = gateway.parse_bet_placed(&receipt);
            report(BetProgress::Mined {
                attempt_id,
                tx_hash,
                event,
            });
        }
        Err(error) => {
            error!(attempt_id, %tx_hash, %error, "bet confirmation failed");
            report(BetProgress::Failed { attempt_id, error });
        }
    }
}

/// Fires `AnimationDone` after `delay`, separating "outcome known" from
/// "controls released".
pub fn schedule_animation_reset(
    attempt_id: u64,
    delay: Duration,
    progress: mpsc::UnboundedSender<BetProgress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        time::sleep(delay).await;
        let _ = progress.send(BetProgress::AnimationDone { attempt_id });
    })
}
