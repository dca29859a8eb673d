use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;

use rql::environment::{EnvironmentAdapter, EnvironmentSettings, GameCatalog, Mode, ResizeFilter};
use rql::local::{LocalPlaySettings, LocalPlayer};
use rql::log::init_logging;
use rql::model::{InputDims, LinearNetworkFactory, NetworkFactory, QNetwork};
use rql::protocol::{FrameEncoding, RewardRounding};
use rql::remote_loop::{EpisodeSummary, RemoteLoop, RemoteLoopSettings};

use crate::transport::{HttpTransport, TransportSettings};

mod transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Train,
    Test,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FilterArg {
    Nearest,
    Bilinear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RoundingArg {
    Truncate,
    Round,
    Preserve,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EncodingArg {
    Jpeg,
    Png,
}

#[derive(Parser, Debug)]
#[command(version, about = "Plays a game, delegating every decision to a remote rql-server")]
struct Args {
    /// Game to play
    #[arg(long, default_value = "catcher")]
    game: String,
    #[arg(long, default_value_t = 1)]
    episodes: u32,
    /// Play in-process with a locally loaded network instead of asking a server
    #[arg(long)]
    local: bool,

    // environment
    #[arg(long, default_value_t = 4, help_heading = "Environment")]
    frame_skip: usize,
    #[arg(long, default_value_t = 84, help_heading = "Environment")]
    screen_width: u32,
    #[arg(long, default_value_t = 84, help_heading = "Environment")]
    screen_height: u32,
    /// Average the last two screens to remove flickering
    #[arg(long, default_value_t = true, action = ArgAction::Set, help_heading = "Environment")]
    color_averaging: bool,
    #[arg(long, value_enum, default_value_t = FilterArg::Nearest, help_heading = "Environment")]
    resize_filter: FilterArg,
    /// Terminal detection: `train` ends an episode on each lost life
    #[arg(long, value_enum, default_value_t = ModeArg::Test, help_heading = "Environment")]
    mode: ModeArg,
    #[arg(long, help_heading = "Environment")]
    random_seed: Option<u64>,

    // remote play
    #[arg(long, default_value = "http://127.0.0.1:5000/", help_heading = "Remote")]
    server_url: String,
    /// Give up an episode after this many consecutive steps without reward (0 disables)
    #[arg(long, default_value_t = 500, help_heading = "Remote")]
    stall_limit: usize,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 10, help_heading = "Remote")]
    timeout: u64,
    #[arg(long, default_value_t = 2, help_heading = "Remote")]
    retries: u32,
    #[arg(long, value_enum, default_value_t = RoundingArg::Truncate, help_heading = "Remote")]
    reward_rounding: RoundingArg,
    #[arg(long, value_enum, default_value_t = EncodingArg::Jpeg, help_heading = "Remote")]
    frame_encoding: EncodingArg,
    #[arg(long, default_value_t = 90, help_heading = "Remote")]
    jpeg_quality: u8,

    // local play
    /// Weight file of the local network
    #[arg(long, help_heading = "Local")]
    load_weights: Option<PathBuf>,
    #[arg(long, default_value_t = 4, help_heading = "Local")]
    history_length: usize,
    /// Perform at most this many no-op actions after a game restart
    #[arg(long, default_value_t = 30, help_heading = "Local")]
    random_starts: usize,
    #[arg(long, default_value_t = 0.05, help_heading = "Local")]
    exploration_rate_test: f64,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

impl Args {
    fn environment_settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            frame_skip: self.frame_skip,
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            color_averaging: self.color_averaging,
            resize_filter: match self.resize_filter {
                FilterArg::Nearest => ResizeFilter::Nearest,
                FilterArg::Bilinear => ResizeFilter::Bilinear,
            },
        }
    }

    fn mode(&self) -> Mode {
        match self.mode {
            ModeArg::Train => Mode::Train,
            ModeArg::Test => Mode::Test,
        }
    }

    fn remote_loop_settings(&self) -> RemoteLoopSettings {
        RemoteLoopSettings {
            game_name: self.game.clone(),
            stall_limit: self.stall_limit,
            reward_rounding: match self.reward_rounding {
                RoundingArg::Truncate => RewardRounding::Truncate,
                RoundingArg::Round => RewardRounding::Round,
                RoundingArg::Preserve => RewardRounding::Preserve,
            },
            frame_encoding: self.frame_encoding(),
        }
    }

    fn frame_encoding(&self) -> FrameEncoding {
        match self.frame_encoding {
            EncodingArg::Jpeg => FrameEncoding::Jpeg { quality: self.jpeg_quality },
            EncodingArg::Png => FrameEncoding::Png,
        }
    }

    fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            server_url: self.server_url.clone(),
            timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
        }
    }

    fn local_play_settings(&self) -> LocalPlaySettings {
        LocalPlaySettings {
            history_length: self.history_length,
            random_starts: self.random_starts,
            exploration_rate: self.exploration_rate_test,
            stall_limit: self.stall_limit,
            random_seed: self.random_seed,
        }
    }
}

fn report(episode: u32, result: rql::prelude::Result<EpisodeSummary>) -> anyhow::Result<()> {
    let summary = result.with_context(|| format!("episode {} failed", episode))?;
    log::info!("Episode {}: {}", episode, summary);
    Ok(())
}

fn play_remote(args: &Args, game: GameCatalog) -> anyhow::Result<()> {
    let env = EnvironmentAdapter::new(game.instantiate(args.random_seed), &args.environment_settings(), args.mode());
    let transport = HttpTransport::new(args.transport_settings(), args.frame_encoding())?;
    let mut remote = RemoteLoop::new(env, transport, args.remote_loop_settings());
    log::info!("Playing {} episode(s) of '{}' against {}", args.episodes, args.game, args.server_url);
    for episode in 1..=args.episodes {
        report(episode, remote.run_episode())?;
    }
    Ok(())
}

fn play_local(args: &Args, game: GameCatalog) -> anyhow::Result<()> {
    ensure!(
        (0.0..=1.0).contains(&args.exploration_rate_test),
        "--exploration-rate-test must be within [0, 1], got {}", args.exploration_rate_test
    );
    let env = EnvironmentAdapter::new(game.instantiate(args.random_seed), &args.environment_settings(), Mode::Test);
    let dims = InputDims {
        history_length: args.history_length,
        height: args.screen_height as usize,
        width: args.screen_width as usize,
    };
    let mut network = LinearNetworkFactory::new(dims, args.random_seed).create(env.action_count())?;
    match &args.load_weights {
        Some(path) => {
            log::info!("Loading weights from {}", path.display());
            network.load_weights(path)?;
        }
        None => log::warn!("No weights given, playing with an untrained network"),
    }

    let mut player = LocalPlayer::new(env, network, (args.screen_width, args.screen_height), args.local_play_settings());
    for episode in 1..=args.episodes {
        report(episode, player.play_episode())?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let Some(game) = GameCatalog::by_name(&args.game) else {
        bail!("unknown game '{}'", args.game);
    };
    let played = if args.local {
        play_local(&args, game)
    } else {
        play_remote(&args, game)
    };
    played?;

    log::info!("All done");
    Ok(())
}
