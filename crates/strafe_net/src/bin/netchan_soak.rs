//! # Netchan Soak Test
//!
//! Runs a server and a client session over an impaired in-process link and
//! reports how the snapshot window coped.
//!
//! ```text
//! server ── SimulatedLink ──> loopback ──> client
//!        <── loopback <── SimulatedLink ──
//! ```
//!
//! Run with: cargo run --release --bin netchan_soak -- --frames 2000 --loss 10

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use strafe_net::snapshot::SnapshotParse;
use strafe_net::{
    init_tracing, loopback_pair, ClientSession, NetConfig, NetResult, NetworkConditions, SendOutcome,
    ServerSession, SimulatedLink, Snapshot,
};
use strafe_shared::state::{EntityState, PlayerState, TrajectoryType};
use strafe_shared::usercmd::UserCmd;

/// Server frame length (20 Hz).
const FRAME: Duration = Duration::from_millis(50);

struct SoakOptions {
    frames: u32,
    loss: u8,
    entities: i32,
    config_path: Option<String>,
}

#[derive(Default)]
struct SoakReport {
    snapshots_sent: u64,
    fragments_sent: u64,
    rate_limited: u64,
    snapshots_valid: u64,
    snapshots_discarded: u64,
    server_dropped: i64,
    client_dropped: i64,
    usercmds_executed: u64,
    commands_echoed: u64,
    lost_to_server: u64,
    lost_to_client: u64,
}

fn parse_args() -> Option<SoakOptions> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = SoakOptions {
        frames: 1000,
        loss: 5,
        entities: 64,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" | "-f" => {
                if i + 1 < args.len() {
                    options.frames = args[i + 1].parse().unwrap_or(1000);
                    i += 1;
                }
            }
            "--loss" | "-l" => {
                if i + 1 < args.len() {
                    options.loss = args[i + 1].parse::<u8>().unwrap_or(5).min(100);
                    i += 1;
                }
            }
            "--entities" | "-e" => {
                if i + 1 < args.len() {
                    options.entities = args[i + 1].parse::<i32>().unwrap_or(64).clamp(1, 1000);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    options.config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: netchan_soak [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -f, --frames <N>       Server frames to run (default: 1000)");
                println!("  -l, --loss <PERCENT>   Packet loss each way (default: 5)");
                println!("  -e, --entities <N>     Entities in the world (default: 64)");
                println!("  -c, --config <PATH>    TOML network config");
                println!("  -h, --help             Show this help");
                return None;
            }
            _ => {}
        }
        i += 1;
    }
    Some(options)
}

/// Deterministic world: entities orbit, and a few blink in and out.
fn world(frame: u32, count: i32) -> Snapshot {
    let time = frame as i32 * FRAME.as_millis() as i32;
    let entities = (0..count)
        .filter(|n| (frame / 40 + *n as u32) % 9 != 0)
        .map(|n| {
            let mut e = EntityState::baseline(n);
            let phase = (frame as f32 * 0.05) + n as f32;
            e.e_type = 1 + n % 3;
            e.modelindex = n % 11;
            e.pos.tr_type = TrajectoryType::Linear as i32;
            e.pos.tr_time = time;
            e.pos.tr_base = [(n * 32) as f32, 0.0, 24.0];
            e.pos.tr_delta = [phase.cos() * 320.0, phase.sin() * 320.0, 0.0];
            e.origin = [(n * 32) as f32 + phase.cos() * 64.0, phase.sin() * 64.0, 24.0];
            e
        })
        .collect();
    let player = PlayerState {
        command_time: time,
        origin: [time as f32 * 0.1, 0.0, 24.0],
        velocity: [320.0, 0.0, 0.0],
        ..PlayerState::default()
    };
    Snapshot::new(time, player, entities)
}

fn run(options: &SoakOptions, config: &NetConfig) -> NetResult<SoakReport> {
    let server_addr = SocketAddr::from(([127, 0, 0, 1], 27960));
    let client_addr = SocketAddr::from(([127, 0, 0, 1], 27961));
    let challenge = strafe_net::session::random_challenge();
    let qport = strafe_net::session::random_qport();

    let (server_end, client_end) = loopback_pair(server_addr, client_addr);
    let conditions = NetworkConditions {
        packet_loss_percent: options.loss,
        ..NetworkConditions::POOR
    };
    let mut server_link = SimulatedLink::new(server_end, conditions, 0x5EED);
    let mut client_link = SimulatedLink::new(client_end, conditions, 0xC11E);

    let mut server = ServerSession::new(client_addr, qport, challenge, config);
    let mut client = ClientSession::new(server_addr, qport, challenge, config);

    let mut report = SoakReport::default();
    let start = Instant::now();

    for frame in 1..=options.frames {
        let now = start + FRAME * frame;
        let snapshot = world(frame, options.entities);

        if frame % 100 == 0 {
            server.queue_command(&format!("print frame {frame}"))?;
        }
        match server.send_snapshot(&mut server_link, &snapshot, now)? {
            SendOutcome::Sent { .. } => report.snapshots_sent += 1,
            SendOutcome::FragmentSent => report.fragments_sent += 1,
            SendOutcome::RateLimited => report.rate_limited += 1,
        }

        while let Some((_, packet)) = client_link.inner_mut().recv() {
            let Some(update) = client.handle_packet(&packet)? else {
                continue;
            };
            report.client_dropped += i64::from(update.dropped);
            match update.snapshot {
                Some(SnapshotParse::Valid) => report.snapshots_valid += 1,
                Some(SnapshotParse::Discarded { .. }) => report.snapshots_discarded += 1,
                None => {}
            }
        }
        for text in client.take_commands() {
            client.queue_command(&format!("ack {text}"))?;
        }

        client.push_usercmd(UserCmd {
            server_time: snapshot.server_time,
            angles: [0, (frame as i32 * 91) & 0xFFFF, 0],
            forwardmove: 127,
            ..UserCmd::default()
        });
        client.send_input(&mut client_link)?;

        while let Some((_, packet)) = server_link.inner_mut().recv() {
            if let Some(input) = server.handle_packet(&packet, now)? {
                report.server_dropped += i64::from(input.dropped);
                report.usercmds_executed += input.usercmds.len() as u64;
            }
        }
        report.commands_echoed += server.take_commands().len() as u64;
    }

    report.lost_to_client = server_link.lost();
    report.lost_to_server = client_link.lost();
    tracing::info!(
        full = server.window().full_snapshots(),
        delta = server.window().delta_snapshots(),
        ping_ms = ?server.ping().map(|p| p.as_millis()),
        "soak finished"
    );
    Ok(report)
}

fn main() -> ExitCode {
    init_tracing("info");

    let Some(options) = parse_args() else {
        return ExitCode::SUCCESS;
    };
    let loaded = match &options.config_path {
        Some(path) => NetConfig::load(path),
        None => Ok(NetConfig::default()),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           NETCHAN SOAK TEST                                      ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("Configuration:");
    println!("  Frames:        {}", options.frames);
    println!("  Packet Loss:   {}% each way", options.loss);
    println!("  Entities:      {}", options.entities);
    println!("  Compression:   {:?}", config.channel.compression);
    println!("  Rate:          {} bytes/s", config.snapshot.rate);
    println!();

    let started = Instant::now();
    let report = match run(&options, &config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("connection dropped: {e}");
            return ExitCode::FAILURE;
        }
    };
    let elapsed = started.elapsed();

    println!("┌─ Server ──────────────────────────────────────────────────────────┐");
    println!("│ Snapshots sent:     {:8}", report.snapshots_sent);
    println!("│ Fragments sent:     {:8}", report.fragments_sent);
    println!("│ Rate limited:       {:8}", report.rate_limited);
    println!("│ Usercmds executed:  {:8}", report.usercmds_executed);
    println!("│ Client drops seen:  {:8}", report.server_dropped);
    println!("│ Commands echoed:    {:8}", report.commands_echoed);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!("┌─ Client ──────────────────────────────────────────────────────────┐");
    println!("│ Snapshots valid:    {:8}", report.snapshots_valid);
    println!("│ Snapshots discarded:{:8}", report.snapshots_discarded);
    println!("│ Server drops seen:  {:8}", report.client_dropped);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!("┌─ Link ────────────────────────────────────────────────────────────┐");
    println!("│ Lost to client:     {:8}", report.lost_to_client);
    println!("│ Lost to server:     {:8}", report.lost_to_server);
    println!("│ Wall time:          {:8.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("└──────────────────────────────────────────────────────────────────┘");

    ExitCode::SUCCESS
}
