//! retina-live - continuous retinal screening from a live camera
//!
//! Samples the camera on a fixed period, sends one frame at a time to the
//! remote classifier and prints the latest stage. Commands on stdin:
//! `t` toggles the camera, `c` clears the result, `q` quits.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use retina_live::config::RetinaConfig;
use retina_live::ui::Ui;
use retina_live::{
    open_backend, CameraResourceManager, Command, CommandSender, FacingMode, HttpClassifier,
    LiveSession, ResultPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Classification endpoint (overrides RETINA_ENDPOINT and the config file).
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// Camera source: stub://name, http(s)://..., or /dev/videoN.
    #[arg(long, value_name = "URL")]
    camera: Option<String>,
    /// Preferred camera facing (environment|user).
    #[arg(long, value_name = "FACING")]
    facing: Option<FacingMode>,
    /// Sampling interval in milliseconds.
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,
    /// How late results are applied (epoch-gated|legacy).
    #[arg(long, value_name = "POLICY")]
    result_policy: Option<ResultPolicy>,
    /// Turn the camera on at startup instead of waiting for `t`.
    #[arg(long)]
    start: bool,
    /// UI mode for stderr output (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RetinaConfig::load()?;
    if let Some(endpoint) = args.endpoint {
        cfg.classifier.endpoint = endpoint;
    }
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(facing) = args.facing {
        cfg.camera.facing = facing;
    }
    if let Some(ms) = args.tick_ms {
        cfg.live.tick_interval = Duration::from_millis(ms);
    }
    if let Some(policy) = args.result_policy {
        cfg.live.result_policy = policy;
    }
    cfg.validate()?;

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let backend = open_backend(&cfg.camera.url)?;
    let camera = CameraResourceManager::new(backend, cfg.camera.facing);
    let classifier = Arc::new(HttpClassifier::new(
        &cfg.classifier.endpoint,
        cfg.classifier.timeout,
    ));
    log::info!(
        "retina-live: endpoint={} camera={} interval={}ms policy={}",
        classifier.endpoint(),
        cfg.camera.url,
        cfg.live.tick_interval.as_millis(),
        cfg.live.result_policy
    );

    let mut session = LiveSession::new(camera, classifier, cfg.live);
    let snapshots = session.subscribe();
    let commands = session.commands();

    let signal = commands.clone();
    ctrlc::set_handler(move || {
        signal.shutdown();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    spawn_input_reader(commands)?;
    let renderer = thread::Builder::new()
        .name("retina-render".to_string())
        .spawn(move || {
            let mut view = ui.live_view();
            for snapshot in snapshots {
                view.render(&snapshot);
            }
        })
        .map_err(|e| anyhow!("failed to spawn renderer: {}", e))?;

    if args.start {
        session.toggle_camera();
    } else {
        eprintln!("press t + Enter to start the camera, c to clear, q to quit");
    }

    let stats = session.run();
    let _ = renderer.join();
    log::info!(
        "retina-live: {} frame(s) submitted, {} result(s) shown, {} failure(s), {} tick(s) dropped while busy",
        stats.sampler.accepted,
        stats.applied,
        stats.failed,
        stats.sampler.dropped_busy
    );
    Ok(())
}

fn spawn_input_reader(commands: CommandSender) -> Result<()> {
    thread::Builder::new()
        .name("retina-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let command = match parse_command(&line) {
                    Some(command) => command,
                    None => {
                        if !line.trim().is_empty() {
                            eprintln!("unknown command '{}'; use t, c or q", line.trim());
                        }
                        continue;
                    }
                };
                if !commands.send(command) || command == Command::Shutdown {
                    return;
                }
            }
            // EOF on stdin ends the session.
            commands.shutdown();
        })
        .map_err(|e| anyhow!("failed to spawn input reader: {}", e))?;
    Ok(())
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "t" | "toggle" => Some(Command::ToggleCamera),
        "c" | "clear" => Some(Command::ClearResult),
        "q" | "quit" | "exit" => Some(Command::Shutdown),
        _ => None,
    }
}
