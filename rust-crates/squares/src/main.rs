use anyhow::Context;
use chrono::TimeDelta;
use clap::{
    ArgGroup,
    Parser,
};
use pool_config::{
    ConfigStore,
    PoolConfig,
    PoolEnv,
};
use squares::{
    app::{
        App,
        RunState,
        actix_command_api::ActixCommandApi,
        change_feed::ChangeFeed,
        espn_score_source::{
            EspnScoreSource,
            PollIntervals,
        },
        in_memory_storage::InMemoryPoolStorage,
        init_tracing,
        pool_storage::PoolStorage,
        sled_storage::SledPoolStorage,
    },
    grid::{
        Game,
        UserId,
    },
    pool::Pool,
};
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = None,
    group(
        ArgGroup::new("network")
            .args(["local", "dev", "test"])
            .required(true)
    )
)]
struct Args {
    /// Read the pool configuration from this file instead of `.pool/<env>/pool.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, default_value = "false")]
    tracing: bool,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory; nothing survives a restart.
    #[arg(long, default_value = "false")]
    ephemeral: bool,

    #[arg(long)]
    local: bool,

    #[arg(long)]
    dev: bool,

    #[arg(long)]
    test: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    let pool_env = if args.local {
        PoolEnv::Local
    } else if args.dev {
        PoolEnv::Dev
    } else {
        PoolEnv::Test
    };
    let store = match &args.config {
        Some(path) => ConfigStore::at(path),
        None => ConfigStore::new(pool_env).context("opening pool configuration store")?,
    };
    let config = store.load_required().context("loading pool configuration")?;
    tracing::info!(
        "Loaded {} pool configuration from {}",
        pool_env,
        store.path().display()
    );

    if args.ephemeral {
        tracing::warn!("Running with in-memory storage; state is lost on exit");
        serve(InMemoryPoolStorage::new(), &config, &args).await
    } else {
        let storage_path = match &args.data_dir {
            Some(path) => path.clone(),
            None => current_dir()
                .context("determine process working directory")?
                .join("squares_data")
                .join(pool_env.dir_name()),
        };
        fs::create_dir_all(&storage_path)?;
        tracing::info!("Using sled storage directory {}", storage_path.display());
        let storage = SledPoolStorage::open(&storage_path)?;
        serve(storage, &config, &args).await
    }
}

async fn serve<S: PoolStorage>(storage: S, config: &PoolConfig, args: &Args) -> anyhow::Result<()> {
    let game = Game::from_config(&config.game);
    let reservation_ttl = TimeDelta::from_std(config.timing.reservation_ttl())
        .context("reservation_ttl_secs is out of range")?;
    let feed = ChangeFeed::default();
    let mut pool = Pool::new(storage, feed.clone(), reservation_ttl);
    pool.ensure_game(&game)?;
    let admins: Vec<UserId> = config.admins.iter().map(UserId::new).collect();
    pool.seed_admins(&admins)?;
    tracing::info!(
        "Game {}: {} vs {} at {}, {} admins",
        game.id,
        game.away.abbreviation,
        game.home.abbreviation,
        game.kickoff_time,
        admins.len()
    );

    let scoreboard_url = Url::parse(&config.provider.scoreboard_url)
        .with_context(|| format!("parsing scoreboard url {}", config.provider.scoreboard_url))?;
    let scores = EspnScoreSource::new(
        game.id,
        game.provider_event_id.clone(),
        scoreboard_url,
        config.provider.timeout(),
        PollIntervals {
            live: config.timing.live_poll_interval(),
            idle: config.timing.idle_poll_interval(),
        },
    )?;
    let api = ActixCommandApi::new(args.port, feed).await?;
    let mut app = App::new(api, scores, pool, config.timing.sweep_interval());

    tracing::info!("Starting squares service");
    loop {
        let interrupt = handle_interupt();
        match app.run(interrupt).await? {
            RunState::Continue => continue,
            RunState::Exit => {
                tracing::info!("Exiting squares service");
                return Ok(());
            }
        }
    }
}
