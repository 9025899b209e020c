use crate::client::AppSnapshot;
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use itertools::Itertools;
use nadsflip::{
    amount::step_wager,
    betting::{
        BetOutcome,
        BetPhase,
        Guess,
        OutcomeSource,
    },
    wallets::WalletKind,
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::{
    io::stdout,
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use unicode_width::UnicodeWidthStr;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const COIN_FRAMES: [&str; 4] = ["( H )", "( | )", "( T )", "( | )"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Connect(String),
    Flip(Guess),
    StepWager(i64),
    SetWager(String),
    Refresh,
    Disconnect,
    DismissErrors,
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
    connected: bool,
    controls_locked: bool,
    wager: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    WagerModal(WagerState),
    QuitModal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct WagerState {
    buffer: String,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Reads terminal events on a dedicated thread so the async loop never blocks
/// on stdin.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        loop {
            match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Ok(true) => {
                    if tx.send(event::read()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    let event = input_events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input closed"))??;
    Ok(event)
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let k = match event {
        Event::Key(k) => k,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    match &mut state.mode {
        Mode::WagerModal(ws) => {
            return match k.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    let raw = ws.buffer.clone();
                    state.mode = Mode::Normal;
                    Some(UserEvent::SetWager(raw))
                }
                KeyCode::Up => {
                    ws.buffer = step_wager(&ws.buffer, 1);
                    Some(UserEvent::Redraw)
                }
                KeyCode::Down => {
                    ws.buffer = step_wager(&ws.buffer, -1);
                    Some(UserEvent::Redraw)
                }
                KeyCode::Backspace => {
                    ws.buffer.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) if c.is_ascii_digit() || (c == '.' && !ws.buffer.contains('.')) => {
                    ws.buffer.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }
    let can_bet = state.connected && !state.controls_locked;
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char(c @ '1'..='4') => {
            let idx = c.to_digit(10)? as usize - 1;
            WalletKind::ALL
                .get(idx)
                .map(|kind| UserEvent::Connect(kind.id().to_string()))
        }
        KeyCode::Char('h') if can_bet => Some(UserEvent::Flip(Guess::Heads)),
        KeyCode::Char('t') if can_bet => Some(UserEvent::Flip(Guess::Tails)),
        KeyCode::Char('w') if !state.controls_locked => {
            state.mode = Mode::WagerModal(WagerState {
                buffer: state.wager.clone(),
            });
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('+') | KeyCode::Up if !state.controls_locked => {
            Some(UserEvent::StepWager(1))
        }
        KeyCode::Char('-') | KeyCode::Down if !state.controls_locked => {
            Some(UserEvent::StepWager(-1))
        }
        KeyCode::Char('r') if state.connected => Some(UserEvent::Refresh),
        KeyCode::Char('d') if state.connected => Some(UserEvent::Disconnect),
        KeyCode::Char('x') => Some(UserEvent::DismissErrors),
        _ => None,
    }
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.connected = snap.account.is_some();
    state.controls_locked = snap.controls_locked;
    state.wager = snap.wager.clone();
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // header
            Constraint::Length(9), // wager + coin
            Constraint::Length(6), // recent flips
            Constraint::Min(4),    // status/errors
            Constraint::Length(3), // help
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_table(f, chunks[1], snap);
    draw_history(f, chunks[2], snap);
    draw_status(f, chunks[3], snap);
    draw_help(f, chunks[4], snap);
    draw_footer(f, chunks[5], snap);
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let title = format!("NadsFlip | {}", snap.network_name);
    let lines = match &snap.account {
        Some(account) => {
            let mut lines = vec![Line::from(format!(
                "{}: {} | Balance: {} MON",
                account.wallet.label(),
                account.short_account,
                account.balance
            ))];
            if !account.contract_bound {
                lines.push(Line::styled(
                    "Read-only wallet: betting needs an EVM wallet",
                    Style::default().fg(Color::Yellow),
                ));
            }
            lines
        }
        None => {
            let options = WalletKind::ALL
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    if snap.available_wallets.contains(kind) {
                        format!("{} {}", i + 1, kind.label())
                    } else {
                        format!("{} {} (not found)", i + 1, kind.label())
                    }
                })
                .join(" | ");
            let mut lines = vec![Line::from(format!("Connect: {options}"))];
            if let Some(pending) = &snap.connecting {
                lines.push(Line::styled(
                    format!("Connecting to {pending}..."),
                    Style::default().fg(Color::Cyan),
                ));
            }
            lines
        }
    };
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_table(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let wager_style = if snap.controls_locked {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };
    let lines = vec![
        Line::from(format!("Prize pool: {} MON", snap.pool)),
        Line::from(""),
        Line::styled(format!("Wager: {} MON", snap.wager), wager_style),
        Line::from(format!("Commission: {}%", snap.commission_rate)),
        Line::from(format!("Total with commission: {} MON", snap.total)),
    ];
    let bet = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Bet"));
    f.render_widget(bet, cols[0]);

    let block = Block::default().borders(Borders::ALL).title("Coin");
    let inner = block.inner(cols[1]);
    f.render_widget(block, cols[1]);
    let (face, caption, color) = coin_view(snap);
    let lines = vec![
        Line::from(""),
        Line::styled(centered(&face, inner.width), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Line::from(""),
        Line::styled(centered(&caption, inner.width), Style::default().fg(color)),
    ];
    f.render_widget(Paragraph::new(lines), inner);
}

fn coin_view(snap: &AppSnapshot) -> (String, String, Color) {
    match &snap.phase {
        BetPhase::Idle => match &snap.result {
            Some(result) => (String::from("( ? )"), result.clone(), Color::White),
            None => (String::from("( ? )"), String::from("Pick heads or tails"), Color::White),
        },
        BetPhase::Submitting(attempt) => (
            COIN_FRAMES[snap.coin_frame % COIN_FRAMES.len()].to_string(),
            format!("Confirm {} in your wallet", attempt.guess),
            Color::Cyan,
        ),
        BetPhase::AwaitingConfirmation { .. } => (
            COIN_FRAMES[snap.coin_frame % COIN_FRAMES.len()].to_string(),
            String::from("Flipping..."),
            Color::Cyan,
        ),
        BetPhase::Settled { outcome, .. } => {
            let face = match outcome.outcome {
                Guess::Heads => "( H )",
                Guess::Tails => "( T )",
            };
            let color = if outcome.won { Color::Green } else { Color::Red };
            (
                face.to_string(),
                snap.result.clone().unwrap_or_default(),
                color,
            )
        }
        BetPhase::Error(msg) => (String::from("( ! )"), msg.clone(), Color::Red),
    }
}

fn centered(text: &str, width: u16) -> String {
    let pad = (width as usize).saturating_sub(text.width()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

fn history_line(outcome: &BetOutcome) -> Line<'static> {
    let verdict = if outcome.won { "won" } else { "lost" };
    let assumed = match outcome.source {
        OutcomeSource::Event => "",
        OutcomeSource::AssumedFromGuess => " (assumed)",
    };
    let color = if outcome.won { Color::Green } else { Color::Red };
    Line::styled(
        format!(
            "{} | guessed {} | landed {} | {}{} | {:#x}",
            outcome.timestamp.format("%H:%M:%S"),
            outcome.guess,
            outcome.outcome,
            verdict,
            assumed,
            outcome.tx_hash
        ),
        Style::default().fg(color),
    )
}

fn draw_history(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let lines: Vec<Line> = if snap.history.is_empty() {
        vec![Line::styled("No flips yet", Style::default().fg(Color::DarkGray))]
    } else {
        snap.history.iter().map(history_line).collect()
    };
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Recent flips"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let widget = if snap.errors.is_empty() {
        let mut lines = vec![Line::from(if snap.status.trim().is_empty() {
            String::from("Ready")
        } else {
            snap.status.clone()
        })];
        if let Some(url) = &snap.result_tx_url {
            lines.push(Line::styled(
                format!("Transaction: {url}"),
                Style::default().fg(Color::DarkGray),
            ));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let lines: Vec<Line> = snap.errors.iter().map(|e| Line::from(e.clone())).collect();
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors (x to dismiss)"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = if snap.account.is_none() {
        "1-4 connect wallet | q/Esc quit"
    } else if snap.controls_locked {
        "flip in progress... | q/Esc quit"
    } else {
        "h heads | t tails | w set wager | +/- step 0.01 | r refresh | d disconnect | 1-4 switch wallet | q/Esc quit"
    };
    let help =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_footer(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let footer = Paragraph::new(format!("Contract: {}", snap.contract_url))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(footer, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::WagerModal(ws) => {
            let area = centered_rect(40, 25, f.area());
            let block = Block::default().borders(Borders::ALL).title("Wager (MON)");
            let p = Paragraph::new(format!(
                "Amount: {}\n0.01 - 1 | Up/Down step 0.01\nEnter=confirm Esc=cancel",
                ws.buffer
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit NadsFlip? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crossterm::event::{
        KeyEvent,
        KeyModifiers,
    };

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn connected_state() -> UiState {
        UiState {
            connected: true,
            wager: String::from("0.01"),
            ..UiState::default()
        }
    }

    #[test]
    fn interpret_event__flip_keys_ignored_while_locked() {
        // given
        let mut state = connected_state();
        state.controls_locked = true;

        // when
        let heads = interpret_event(&mut state, key(KeyCode::Char('h')));

        // then
        assert_eq!(heads, None);
    }

    #[test]
    fn interpret_event__number_keys_pick_wallet() {
        let mut state = UiState::default();
        assert_eq!(
            interpret_event(&mut state, key(KeyCode::Char('2'))),
            Some(UserEvent::Connect("phantom".to_string()))
        );
        assert_eq!(
            interpret_event(&mut state, key(KeyCode::Char('4'))),
            Some(UserEvent::Connect("backpack".to_string()))
        );
    }

    #[test]
    fn interpret_event__wager_modal_edits_and_confirms() {
        // given
        let mut state = connected_state();
        interpret_event(&mut state, key(KeyCode::Char('w')));

        // when
        interpret_event(&mut state, key(KeyCode::Backspace));
        interpret_event(&mut state, key(KeyCode::Char('5')));
        interpret_event(&mut state, key(KeyCode::Char('.')));
        let confirmed = interpret_event(&mut state, key(KeyCode::Enter));

        // then
        assert_eq!(confirmed, Some(UserEvent::SetWager("0.05".to_string())));
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__quit_requires_confirmation() {
        let mut state = UiState::default();
        assert_eq!(
            interpret_event(&mut state, key(KeyCode::Char('q'))),
            Some(UserEvent::Redraw)
        );
        assert_eq!(
            interpret_event(&mut state, key(KeyCode::Char('y'))),
            Some(UserEvent::Quit)
        );
    }

    #[test]
    fn centered__pads_by_display_width() {
        assert_eq!(centered("( H )", 11), "   ( H )");
    }
}
