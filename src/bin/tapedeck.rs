use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};

use tapedeck::bus::NatsBus;
use tapedeck::cli::status::{format_bytes, playback_status_line, record_status_line};
use tapedeck::cli::{default_capture_path, resolve_server_url};
use tapedeck::{PlaybackControl, Player, RecordControl, Recorder};

#[derive(Parser)]
#[command(name = "tapedeck", version, about = "Record and replay bus traffic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record matching subjects into a capture file
    Record {
        /// Subject pattern to record (broker wildcards allowed)
        subject: String,
        /// Output file (default: capture_<timestamp>.zet)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Container format
        #[arg(long = "format", value_enum, default_value = "zet")]
        format: ContainerFormat,
        /// Broker URL (default: env NATS_URL or nats://localhost:4222)
        #[arg(short = 's', long = "server")]
        server: Option<String>,
    },
    /// Replay a capture file onto the bus
    Play {
        /// The capture file to play back
        file: PathBuf,
        /// Broker URL (default: env NATS_URL or nats://localhost:4222)
        #[arg(short = 's', long = "server")]
        server: Option<String>,
        /// Speed multiplier (1.0 = real time, 0 = unthrottled)
        #[arg(long = "speed", default_value_t = 1.0)]
        speed: f64,
        /// Run straight through without keyboard controls
        #[arg(long = "no-interactive")]
        no_interactive: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContainerFormat {
    Zet,
    Mcap,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Record {
            subject,
            output,
            format,
            server,
        } => cmd_record(subject, output, format, server),
        Commands::Play {
            file,
            server,
            speed,
            no_interactive,
        } => cmd_play(file, server, speed, no_interactive),
    }
}

/// Restores cooked mode even on early returns and panics.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> anyhow::Result<Self> {
        enable_raw_mode().context("enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn terminal_width() -> usize {
    terminal::size().map(|(cols, _)| cols as usize).unwrap_or(80)
}

fn cmd_record(
    subject: String,
    output: Option<PathBuf>,
    format: ContainerFormat,
    server: Option<String>,
) -> anyhow::Result<()> {
    if matches!(format, ContainerFormat::Mcap) {
        bail!("the mcap container is not available in this build; use --format zet");
    }
    let url = resolve_server_url(server.as_deref());
    let output = output.unwrap_or_else(default_capture_path);

    println!("Recording subject: {subject}");
    println!("Output file:       {}", output.display());
    println!("Broker:            {url}");
    println!();
    println!("Controls: p pause/resume, q or Ctrl-C stop");
    println!();

    let bus = Arc::new(NatsBus::connect(&url)?);
    let mut recorder = Recorder::create(bus, &subject, &output, 0)?;
    recorder.start()?;

    let guard = RawModeGuard::enable()?;
    let mut last_render: Option<Instant> = None;
    loop {
        if event::poll(Duration::from_millis(200)).context("poll input")? {
            if let Event::Key(key) = event::read().context("read input")? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('p' | 'P') => {
                        if recorder.is_paused() {
                            recorder.resume();
                        } else {
                            recorder.pause();
                        }
                    }
                    KeyCode::Char('q' | 'Q') => break,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    _ => {}
                }
            }
        }
        if last_render.map_or(true, |at| at.elapsed() >= Duration::from_secs(1)) {
            last_render = Some(Instant::now());
            let line = record_status_line(recorder.is_paused(), &recorder.stats(), terminal_width());
            print!("\r\x1b[K{line}");
            io::stdout().flush().ok();
        }
    }
    drop(guard);

    println!();
    println!("Stopping...");
    recorder.stop()?;

    let stats = recorder.stats();
    println!();
    println!("Recording statistics:");
    println!("  messages received: {}", stats.messages_received);
    println!("  messages written:  {}", stats.messages_written);
    println!("  messages dropped:  {}", stats.messages_dropped);
    println!("  file size:         {}", format_bytes(stats.bytes_written));
    if stats.buffer_overflow {
        println!("  warning: ring buffer overflowed, some messages were lost");
    }
    Ok(())
}

fn cmd_play(
    file: PathBuf,
    server: Option<String>,
    speed: f64,
    no_interactive: bool,
) -> anyhow::Result<()> {
    let url = resolve_server_url(server.as_deref());

    println!("Playing capture:   {}", file.display());
    println!("Broker:            {url}");
    if speed > 0.0 {
        println!("Speed:             {speed:.1}x");
    } else {
        println!("Speed:             MAX");
    }
    println!();

    let bus = Arc::new(NatsBus::connect(&url)?);
    let player = Arc::new(Player::create(bus, &file, speed)?);

    if no_interactive {
        player.play()?;
    } else {
        println!("Controls: left/right seek 10, up/down speed, p/space pause, n next, q quit");
        println!();
        run_interactive(&player)?;
    }

    let stats = player.stats();
    println!();
    println!("Playback statistics:");
    println!(
        "  messages published: {}/{}",
        stats.messages_published, stats.total_messages
    );
    println!(
        "  capture duration:   {:.1}s",
        stats.duration_ns as f64 / 1e9
    );
    Ok(())
}

fn run_interactive(player: &Arc<Player>) -> anyhow::Result<()> {
    let guard = RawModeGuard::enable()?;
    let schedule = {
        let player = Arc::clone(player);
        thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || player.play())
            .context("spawn playback thread")?
    };

    let mut last_render: Option<Instant> = None;
    while !schedule.is_finished() {
        if event::poll(Duration::from_millis(50)).context("poll input")? {
            if let Event::Key(key) = event::read().context("read input")? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q' | 'Q') => player.cancel(),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        player.cancel();
                    }
                    KeyCode::Char('p' | 'P' | ' ') => {
                        if player.is_paused() {
                            player.resume();
                        } else {
                            player.pause();
                        }
                    }
                    KeyCode::Char('n' | 'N') => player.skip_next(),
                    KeyCode::Left => player.seek(-10),
                    KeyCode::Right => player.seek(10),
                    KeyCode::Up => {
                        let speed = player.stats().speed;
                        player.set_speed(if speed > 0.0 { speed + 0.5 } else { 1.0 });
                    }
                    KeyCode::Down => {
                        let speed = player.stats().speed;
                        player.set_speed(if speed > 0.5 { speed - 0.5 } else { 0.0 });
                    }
                    _ => {}
                }
            }
        }
        if last_render.map_or(true, |at| at.elapsed() >= Duration::from_millis(100)) {
            last_render = Some(Instant::now());
            let line = playback_status_line(&player.stats(), player.is_paused(), terminal_width());
            print!("\r\x1b[K{line}");
            io::stdout().flush().ok();
        }
    }

    let joined = schedule.join();
    drop(guard);
    println!();
    match joined {
        Ok(result) => result.context("playback"),
        Err(_) => bail!("playback thread panicked"),
    }
}
