//! `run` subcommand: the profile daemon. Polls the foreground process,
//! fires due apply timers, and (with `--interactive`) takes commands on stdin.

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::{Config, Engine, PowerctlError, RUNNING, Result};
use powerctl_lib::foreground::CommandSource;

/// Longest single wait, so Ctrl+C is noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(100);

const DAEMON_LOCK: &str = "powerctl-daemon";

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Up,
    Down,
    Left,
    Right,
    Show,
    Hide,
    Set(String, String),
    Create,
    Delete,
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
commands: up, down, left, right, show, hide, set NAME VALUE,
          create, delete, status, help, quit";

/// Parse one stdin line. `None` for blank lines.
fn parse_command(line: &str) -> Option<std::result::Result<Input, String>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let input = match word.to_ascii_lowercase().as_str() {
        "" => return None,
        "up" | "k" => Input::Up,
        "down" | "j" => Input::Down,
        "left" | "h" => Input::Left,
        "right" | "l" => Input::Right,
        "show" => Input::Show,
        "hide" => Input::Hide,
        "create" => Input::Create,
        "delete" => Input::Delete,
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        "set" => {
            // Setting names may contain spaces; the value is the last token.
            return Some(match rest.rsplit_once(char::is_whitespace) {
                Some((name, value)) if !name.trim().is_empty() => {
                    Ok(Input::Set(name.trim().to_string(), value.to_string()))
                }
                _ => Err("usage: set NAME VALUE".to_string()),
            });
        }
        other => return Some(Err(format!("unknown command '{other}' (try 'help')"))),
    };
    Some(Ok(input))
}

/// Spawn a thread forwarding stdin lines. The channel closes with stdin.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// State for the `run` command, created during setup.
struct RunCtx {
    engine: Engine,
    source: CommandSource,
    poll_interval: Duration,
    render_interval: Duration,
    last_render: String,
}

fn run_setup(config: &Config) -> Result<RunCtx> {
    let engine = Engine::from_config(config)?;
    let source = CommandSource::new(
        &config.foreground_command,
        &config.docked_command,
        config.command_timeout(),
    );
    if config.foreground_command.trim().is_empty() {
        log::warn!("[foreground] no foreground_command configured, per-process profiles disabled");
    }
    println!(
        "[engine] {} setting(s), profiles in {}",
        engine.group().len(),
        config
            .profiles_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".into())
    );
    Ok(RunCtx {
        engine,
        source,
        poll_interval: config.poll_interval(),
        render_interval: config.render_interval(),
        last_render: String::new(),
    })
}

/// Apply one interactive command. Returns `false` to stop the loop.
fn handle_input(rctx: &mut RunCtx, input: Input, now: Instant) -> bool {
    let engine = &mut rctx.engine;
    let result = match input {
        Input::Up => {
            engine.prev();
            Ok(())
        }
        Input::Down => {
            engine.next();
            Ok(())
        }
        Input::Left => engine.select_prev(now),
        Input::Right => engine.select_next(now),
        Input::Show => {
            if engine.show() {
                engine.refresh();
            }
            Ok(())
        }
        Input::Hide => {
            engine.hide();
            Ok(())
        }
        Input::Set(name, value) => engine.set_text(&name, &value, now),
        Input::Create => engine.create_profile(now),
        Input::Delete => engine.delete_profile(now),
        Input::Status => {
            println!("Profile: {}", engine.controller().current());
            println!("{}", engine.render_text());
            Ok(())
        }
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Quit => return false,
    };
    if let Err(e) = result {
        println!("  error: {e}");
    }
    // Force a redraw after any edit.
    rctx.last_render.clear();
    true
}

/// Print the group if it is visible and its text changed.
fn render_if_changed(rctx: &mut RunCtx) {
    if !rctx.engine.group().is_visible() {
        return;
    }
    let text = rctx.engine.render_text();
    if text != rctx.last_render {
        println!("{text}");
        rctx.last_render = text;
    }
}

fn run_loop(rctx: &mut RunCtx, input: Option<Receiver<String>>) {
    let start = Instant::now();
    rctx.engine.start(start);
    log::info!("[profile] active: {}", rctx.engine.controller().current());

    let mut next_poll = start;
    let mut next_render = start;

    while RUNNING.load(Ordering::SeqCst) {
        let now = Instant::now();

        if now >= next_poll {
            let before = rctx.engine.controller().current().clone();
            rctx.engine.poll(now, &mut rctx.source);
            let after = rctx.engine.controller().current();
            if *after != before {
                println!("[profile] {after}");
            }
            next_poll = now + rctx.poll_interval;
        }

        rctx.engine.run_due(now);

        if now >= next_render {
            if rctx.engine.group().is_visible() {
                rctx.engine.refresh();
            }
            render_if_changed(rctx);
            next_render = now + rctx.render_interval;
        }

        let mut wake = next_poll.min(next_render);
        if let Some(deadline) = rctx.engine.next_deadline() {
            wake = wake.min(deadline);
        }
        let wait = wake
            .saturating_duration_since(Instant::now())
            .min(MAX_WAIT);

        match &input {
            Some(rx) => match rx.recv_timeout(wait) {
                Ok(line) => match parse_command(&line) {
                    Some(Ok(cmd)) => {
                        if !handle_input(rctx, cmd, Instant::now()) {
                            break;
                        }
                        render_if_changed(rctx);
                    }
                    Some(Err(msg)) => println!("  {msg}"),
                    None => {}
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => std::thread::sleep(wait),
        }
    }
}

pub(super) fn cmd_run(config_path: Option<&Path>, interactive: bool) -> Result<()> {
    let config = super::load_config(config_path);

    let instance = single_instance::SingleInstance::new(DAEMON_LOCK)
        .map_err(|e| PowerctlError::Config(format!("instance check failed: {e}")))?;
    if !instance.is_single() {
        return Err(PowerctlError::Config(
            "another powerctl daemon is already running".into(),
        ));
    }

    let mut rctx = run_setup(&config)?;
    if interactive {
        println!("{HELP}");
    }
    let input = interactive.then(spawn_stdin_reader);

    println!("Running. Press Ctrl+C to stop.");
    run_loop(&mut rctx, input);
    println!("\nStopped.");
    Ok(())
}
