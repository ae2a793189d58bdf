//! Terminal front end: line commands on stdin, a live status line on stdout.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::format_clock;
use crate::events::SessionCommand;
use crate::tasks::session::{Cue, Loading, SessionSnapshot, SessionView};

const HELP: &str = "\
commands:
  <enter>        play / pause the clock
  n, next        record the current image and show another
  s, skip        show another without recording
  a, autoplay    toggle autoplay
  r, reset       reset the clock
  o, overview    toggle the history overview
  c, clear       clear history (overview only)
  m, mute        toggle the over-time bell
  t <duration>   set the target time (e.g. `90`, `2m`, `1m 30s`)
  d [path]       open a directory (no path cancels)
  ?, status      print the session summary
  q, quit        exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(SessionCommand),
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleInput> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word {
        "" | "p" => SessionCommand::TogglePlay,
        "play" => SessionCommand::Play,
        "pause" => SessionCommand::Pause,
        "n" | "next" => SessionCommand::Advance { skip: false },
        "s" | "skip" => SessionCommand::Advance { skip: true },
        "a" | "autoplay" => SessionCommand::ToggleAutoplay,
        "r" | "reset" => SessionCommand::ResetClock,
        "o" | "overview" => SessionCommand::ToggleView,
        "c" | "clear" => SessionCommand::ClearHistory,
        "m" | "mute" => SessionCommand::ToggleMute,
        "d" | "dir" => {
            let dir = (!rest.is_empty()).then(|| PathBuf::from(rest));
            SessionCommand::OpenDirectory(dir)
        }
        "t" | "time" => SessionCommand::ChangeDuration(parse_duration(rest)?),
        "?" | "status" => return Ok(ConsoleInput::Status),
        "h" | "help" => return Ok(ConsoleInput::Help),
        "q" | "quit" | "exit" => return Ok(ConsoleInput::Quit),
        other => bail!("unknown command `{other}`; type `help`"),
    };
    Ok(ConsoleInput::Command(command))
}

/// Plain seconds or a humantime expression.
pub fn parse_duration(text: &str) -> Result<Duration> {
    if text.is_empty() {
        bail!("a duration is required");
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).with_context(|| format!("invalid duration `{text}`"))
}

pub fn render_status(snap: &SessionSnapshot) -> String {
    let view = match snap.view {
        SessionView::Active => "active".to_string(),
        SessionView::Intermission(remaining) => format!("next in {remaining}"),
        SessionView::Overview => "overview".to_string(),
    };
    let time = if snap.over_time {
        format!("+{}", format_clock(snap.display_time()))
    } else {
        format_clock(snap.display_time())
    };
    let mut flags = Vec::new();
    flags.push(if snap.timer.running { "running" } else { "paused" });
    if snap.autoplay {
        flags.push("autoplay");
    }
    if snap.muted {
        flags.push("muted");
    }
    match snap.loading {
        Loading::Idle => {}
        Loading::Directory => flags.push("scanning"),
        Loading::File => flags.push("loading"),
    }
    let image = match &snap.current {
        Some(current) => current.source.file_name.to_string_lossy().into_owned(),
        None if snap.indexed == 0 => "no images".to_string(),
        None => "-".to_string(),
    };
    format!(
        "[{view}] {time} / {target} ({flags}) | {image} | history {count} ({total})",
        target = format_clock(snap.target),
        flags = flags.join(", "),
        count = snap.history.len(),
        total = format_clock(snap.history_total),
    )
}

fn render_overview(snap: &SessionSnapshot) -> String {
    let mut out = format!(
        "{} images indexed, {} in history, {} total\n",
        snap.indexed,
        snap.history.len(),
        format_clock(snap.history_total)
    );
    for entry in &snap.history {
        let spent = entry.elapsed_on_exit().unwrap_or_default();
        out.push_str(&format!(
            "  {}  {:>7}  {}\n",
            entry.shown_at.format("%H:%M:%S"),
            format_clock(spent),
            entry.source.path().display()
        ));
    }
    out
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Cue for TerminalBell {
    fn play(&self) {
        let mut stderr = io::stderr();
        if let Err(err) = stderr.write_all(b"\x07").and_then(|()| stderr.flush()) {
            debug!("bell failed: {err}");
        }
    }
}

/// Forwards stdin lines to the controller until quit, EOF or cancellation.
pub async fn run_input(
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    // A plain thread: a blocking stdin read cannot be interrupted and must not
    // hold up runtime shutdown.
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("stdin read failed: {err}");
                        break;
                    }
                };
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;

    loop {
        let line = select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            info!("stdin closed; initiating shutdown");
            cancel.cancel();
            break;
        };
        match parse_command(&line) {
            Ok(ConsoleInput::Command(cmd)) => {
                if commands.send(cmd).await.is_err() {
                    debug!("controller gone; stopping input");
                    break;
                }
            }
            Ok(ConsoleInput::Status) => println!("\n{}", render_overview(&state.borrow())),
            Ok(ConsoleInput::Help) => println!("\n{HELP}"),
            Ok(ConsoleInput::Quit) => {
                info!("quit requested; initiating shutdown");
                cancel.cancel();
                break;
            }
            Err(err) => println!("\n{err}"),
        }
    }
    Ok(())
}

/// Redraws the status line whenever the rendered text changes.
pub async fn run_status(
    mut state: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut last = String::new();
    let mut stdout = io::stdout();
    loop {
        let line = render_status(&state.borrow_and_update());
        if line != last {
            // Clear to end of line so a shorter status leaves no residue.
            write!(stdout, "\r{line}\x1b[K").and_then(|()| stdout.flush())?;
            last = line;
        }
        select! {
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    writeln!(stdout)?;
    Ok(())
}
