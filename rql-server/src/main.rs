use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::{Parser, ValueEnum};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::LevelFilter;

use rql::agent::{ExplorationMode, ExplorationSchedule};
use rql::log::init_logging;
use rql::model::{CheckpointTable, InputDims, LinearNetworkFactory};
use rql::session::{SessionController, SessionSettings};
use rql::state_buffer::WarmUp;

use crate::http::{handle_request, Controller};

mod http;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WarmUpArg {
    /// Repeat the first received frame until the history is filled
    RepeatFirst,
    /// Reject steps until enough frames were received
    #[value(name = "none")]
    Off,
}

#[derive(Parser, Debug)]
#[command(version, about = "Serves epsilon-greedy Q-network decisions to remote game emulators")]
struct Args {
    // server
    #[arg(long, default_value = "0.0.0.0", help_heading = "Server")]
    host: String,
    #[arg(long, default_value_t = 5000, help_heading = "Server")]
    port: u16,
    /// Seconds without a step after which a session is unbound
    #[arg(long, default_value_t = 600, help_heading = "Server")]
    idle_timeout: u64,

    // environment
    #[arg(long, default_value_t = 84, help_heading = "Environment")]
    screen_width: u32,
    #[arg(long, default_value_t = 84, help_heading = "Environment")]
    screen_height: u32,

    // state / replay
    /// How many screen frames form a state
    #[arg(long, default_value_t = 4, help_heading = "Replay memory")]
    history_length: usize,
    #[arg(long, value_enum, default_value_t = WarmUpArg::RepeatFirst, help_heading = "Replay memory")]
    warm_up: WarmUpArg,
    /// Per-session replay memory capacity, 0 disables recording
    #[arg(long, default_value_t = 0, help_heading = "Replay memory")]
    replay_size: usize,

    // agent
    #[arg(long, default_value_t = 1.0, help_heading = "Agent")]
    exploration_rate_start: f64,
    #[arg(long, default_value_t = 0.1, help_heading = "Agent")]
    exploration_rate_end: f64,
    #[arg(long, default_value_t = 1_000_000, help_heading = "Agent")]
    exploration_decay_steps: u64,
    /// Exploration rate used while serving
    #[arg(long, default_value_t = 0.05, help_heading = "Agent")]
    exploration_rate_test: f64,
    /// Anneal the exploration rate over served steps instead of using the test rate
    #[arg(long, help_heading = "Agent")]
    annealed: bool,
    /// Steps already taken by the schedule, to resume annealing
    #[arg(long, default_value_t = 0, help_heading = "Agent")]
    start_step: u64,

    // network
    /// Directory holding the known game snapshots
    #[arg(long, default_value = "snapshots", help_heading = "Network")]
    snapshot_dir: PathBuf,
    /// Weight file for a game, as `name=path`; may be repeated
    #[arg(long = "checkpoint", value_parser = parse_checkpoint, help_heading = "Network")]
    checkpoints: Vec<(String, PathBuf)>,

    // common
    #[arg(long, help_heading = "Common")]
    random_seed: Option<u64>,
    #[arg(long, default_value = "info", help_heading = "Common")]
    log_level: LevelFilter,
}

fn parse_checkpoint(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected name=path, got '{}'", value)),
    }
}

impl Args {
    fn session_settings(&self) -> anyhow::Result<SessionSettings> {
        for (flag, rate) in [
            ("exploration-rate-start", self.exploration_rate_start),
            ("exploration-rate-end", self.exploration_rate_end),
            ("exploration-rate-test", self.exploration_rate_test),
        ] {
            ensure!((0.0..=1.0).contains(&rate), "--{} must be within [0, 1], got {}", flag, rate);
        }
        ensure!(
            self.exploration_rate_end <= self.exploration_rate_start,
            "--exploration-rate-end ({}) must not exceed --exploration-rate-start ({})",
            self.exploration_rate_end, self.exploration_rate_start
        );
        ensure!(self.history_length > 0, "--history-length must be at least 1");

        let exploration = ExplorationSchedule {
            rate_start: self.exploration_rate_start,
            rate_end: self.exploration_rate_end,
            decay_steps: self.exploration_decay_steps,
            rate_test: self.exploration_rate_test,
            ..Default::default()
        }.starting_at(self.start_step);

        Ok(SessionSettings {
            history_length: self.history_length,
            frame_width: self.screen_width,
            frame_height: self.screen_height,
            warm_up: match self.warm_up {
                WarmUpArg::RepeatFirst => WarmUp::RepeatFirst,
                WarmUpArg::Off => WarmUp::None,
            },
            exploration,
            exploration_mode: if self.annealed { ExplorationMode::Annealed } else { ExplorationMode::Evaluation },
            idle_timeout: Duration::from_secs(self.idle_timeout),
            replay_size: self.replay_size,
            random_seed: self.random_seed,
        })
    }

    fn checkpoint_table(&self) -> CheckpointTable {
        let mut table = CheckpointTable::with_known_snapshots(&self.snapshot_dir);
        for (game, path) in &self.checkpoints {
            table.insert(game, path.clone());
        }
        table
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let settings = args.session_settings()?;
    let dims = InputDims {
        history_length: settings.history_length,
        height: settings.frame_height as usize,
        width: settings.frame_width as usize,
    };
    let factory = LinearNetworkFactory::new(dims, args.random_seed);
    let controller: Arc<Controller> = Arc::new(SessionController::new(factory, args.checkpoint_table(), settings));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;

    let make_svc = make_service_fn(move |_conn| {
        let controller = Arc::clone(&controller);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(Arc::clone(&controller), req)))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(make_svc);
    log::info!("Listening on http://{}", addr);

    server
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down");
            }
        })
        .await
        .context("server failed")?;

    log::info!("All done");
    Ok(())
}
