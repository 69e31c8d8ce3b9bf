use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

pub const CONFIG_ROOT: &str = ".pool";
const CONFIG_FILE: &str = "pool.json";

pub const ESPN_SCOREBOARD_URL: &str =
    "https://site.api.espn.com/apis/site/v2/sports/football/nfl/scoreboard";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolEnv {
    Dev,
    Test,
    Local,
}

impl PoolEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            PoolEnv::Dev => "dev",
            PoolEnv::Test => "test",
            PoolEnv::Local => "local",
        }
    }
}

impl fmt::Display for PoolEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolEnv::Dev => "Development",
            PoolEnv::Test => "Testing",
            PoolEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    pub abbreviation: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub id: u32,
    pub home: TeamConfig,
    pub away: TeamConfig,
    pub kickoff_time: DateTime<Utc>,
    /// Event id the score provider uses for this game.
    pub provider_event_id: String,
    #[serde(default = "default_price_per_box")]
    pub price_per_box: u64,
    #[serde(default = "default_price_10_boxes")]
    pub price_10_boxes: u64,
    #[serde(default = "default_price_20_boxes")]
    pub price_20_boxes: u64,
    /// Quarter payouts in basis points, Q1 through Q4.
    #[serde(default = "default_payout_bps")]
    pub payout_bps: [u32; 4],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_live_poll_secs")]
    pub live_poll_secs: u64,
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            live_poll_secs: default_live_poll_secs(),
            idle_poll_secs: default_idle_poll_secs(),
        }
    }
}

impl TimingConfig {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_secs(self.live_poll_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_scoreboard_url")]
    pub scoreboard_url: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            scoreboard_url: default_scoreboard_url(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub game: GameConfig,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        let total: u32 = self.game.payout_bps.iter().sum();
        if total != 10_000 {
            bail!("quarter payouts must sum to 10000 basis points, got {total}");
        }
        if self.game.price_per_box == 0 {
            bail!("price_per_box must be positive");
        }
        if self.game.provider_event_id.trim().is_empty() {
            bail!("provider_event_id must not be empty");
        }
        if self.timing.sweep_interval_secs == 0
            || self.timing.live_poll_secs == 0
            || self.timing.idle_poll_secs == 0
        {
            bail!("timing intervals must be positive");
        }
        if self.provider.timeout_secs == 0 {
            bail!("provider timeout must be positive");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(env: PoolEnv) -> Result<Self> {
        let path = ensure_store(Path::new(CONFIG_ROOT), env)?;
        Ok(Self { path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<PoolConfig>> {
        read_config(&self.path)
    }

    /// Load and validate, failing when no configuration has been written yet.
    pub fn load_required(&self) -> Result<PoolConfig> {
        let config = self.load()?.ok_or_else(|| {
            anyhow!("No pool configuration found at {}", self.path.display())
        })?;
        config
            .validate()
            .with_context(|| format!("invalid pool configuration in {}", self.path.display()))?;
        Ok(config)
    }

    pub fn save(&self, config: &PoolConfig) -> Result<()> {
        write_config(&self.path, config)
    }
}

fn ensure_store(root: &Path, env: PoolEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }
    Ok(env_dir.join(CONFIG_FILE))
}

fn read_config(path: impl AsRef<Path>) -> Result<Option<PoolConfig>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).context("Failed to read pool configuration")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let config = serde_json::from_slice::<PoolConfig>(&data)
        .context("Failed to parse pool configuration JSON")?;
    Ok(Some(config))
}

fn write_config(path: impl AsRef<Path>, config: &PoolConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config)
        .context("Failed to serialize pool configuration")?;
    fs::write(path.as_ref(), json).context("Failed to write pool configuration")?;
    Ok(())
}

fn default_price_per_box() -> u64 {
    5
}

fn default_price_10_boxes() -> u64 {
    35
}

fn default_price_20_boxes() -> u64 {
    60
}

fn default_payout_bps() -> [u32; 4] {
    [2_500; 4]
}

fn default_reservation_ttl_secs() -> u64 {
    10 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_live_poll_secs() -> u64 {
    30
}

fn default_idle_poll_secs() -> u64 {
    300
}

fn default_scoreboard_url() -> String {
    ESPN_SCOREBOARD_URL.to_string()
}

fn default_provider_timeout_secs() -> u64 {
    5
}
