use crate::util_text::{is_arweave_id, is_entity_id};
use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_GRAPHQL_URL: &str = "https://ao-search-gateway.goldsky.com/graphql";
pub const DEFAULT_CU_URL: &str = "https://cu.ardrive.io";
pub const ARIO_PROCESS_ID: &str = "qNvAoz0TgcH7DMg8BCVn8jF32QH5L6T29VjHxhHqqGE";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Messages,
    Processes,
    Modules,
    /// Processes spawned from one module.
    Module,
    Blocks,
    Arns,
    Entity,
    Linked,
    Block,
}

impl View {
    pub fn needs_target(&self) -> bool {
        matches!(self, View::Entity | View::Linked | View::Block | View::Module)
    }
}

impl std::str::FromStr for View {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "messages" | "msgs" => Ok(View::Messages),
            "processes" => Ok(View::Processes),
            "modules" => Ok(View::Modules),
            "module" => Ok(View::Module),
            "blocks" => Ok(View::Blocks),
            "arns" => Ok(View::Arns),
            "entity" => Ok(View::Entity),
            "linked" | "message" => Ok(View::Linked),
            "block" => Ok(View::Block),
            _ => Err(anyhow!(
                "Invalid view '{s}'. Valid options: messages, processes, modules, module, blocks, arns, entity, linked, block"
            )),
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            View::Messages => "messages",
            View::Processes => "processes",
            View::Modules => "modules",
            View::Module => "module",
            View::Blocks => "blocks",
            View::Arns => "arns",
            View::Entity => "entity",
            View::Linked => "linked",
            View::Block => "block",
        };
        f.write_str(s)
    }
}

/// aoscan - AO / AR.IO terminal explorer
///
/// Browse AO messages, processes, blocks and ArNS names from the terminal.
/// Configuration priority: CLI args > Environment variables > Defaults
#[derive(Parser, Debug)]
#[command(name = "aoscan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AO / AR.IO terminal explorer", long_about = None)]
pub struct CliArgs {
    /// GraphQL gateway URL
    #[arg(long, env = "GRAPHQL_URL")]
    pub graphql_url: Option<String>,

    /// Compute unit base URL for dry-runs
    #[arg(long, env = "CU_URL")]
    pub cu_url: Option<String>,

    /// AR.IO network process id (ArNS registry and token)
    #[arg(long, env = "ARIO_PROCESS_ID")]
    pub ario_process_id: Option<String>,

    /// Start view: messages, processes, modules, module, blocks, arns, entity, linked, block
    #[arg(short, long, env = "VIEW", value_parser = clap::value_parser!(View))]
    pub view: Option<View>,

    /// Entity id, message id, module id or block height for the entity/linked/module/block views
    #[arg(short, long, env = "TARGET")]
    pub target: Option<String>,

    /// Rows per page (1-100)
    #[arg(long, env = "PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Virtualize tables longer than page_size * this (1-10000)
    #[arg(long, env = "VIRTUALIZE_FACTOR")]
    pub virtualize_factor: Option<usize>,

    /// Per-page request timeout in milliseconds (1000-120000)
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Minimum spacing between ArNS requests in milliseconds (0-10000)
    #[arg(long, env = "THROTTLE_DELAY_MS")]
    pub throttle_delay_ms: Option<u64>,

    /// Retries on rate limiting (0-10)
    #[arg(long, env = "RETRY_MAX")]
    pub retry_max: Option<u32>,

    /// First backoff delay in milliseconds, doubled per retry (10-60000)
    #[arg(long, env = "RETRY_BASE_MS")]
    pub retry_base_ms: Option<u64>,

    /// ANT check cache lifetime in seconds (1-86400)
    #[arg(long, env = "ANT_CACHE_TTL_SECS")]
    pub ant_cache_ttl_secs: Option<u64>,

    /// ANT check cache capacity (1-100000)
    #[arg(long, env = "ANT_CACHE_MAX")]
    pub ant_cache_max: Option<usize>,

    /// ArNS lookup cache lifetime in seconds (1-604800)
    #[arg(long, env = "ARNS_CACHE_TTL_SECS")]
    pub arns_cache_ttl_secs: Option<u64>,

    /// Path to SQLite database for dry-run history
    #[arg(long = "history-db", env = "HISTORY_DB_PATH")]
    pub history_db_path: Option<String>,

    /// Dry-runs kept in history (1-1000)
    #[arg(long, env = "HISTORY_MAX")]
    pub history_max: Option<usize>,

    /// Target UI rendering FPS (1-120)
    #[arg(long, env = "RENDER_FPS")]
    pub render_fps: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub graphql_url: String,
    pub cu_url: String,
    pub ario_process_id: String,
    pub view: View,
    pub target: Option<String>,
    pub page_size: usize,
    pub virtualize_factor: usize,
    pub request_timeout_ms: u64,
    pub throttle_delay_ms: u64,
    pub retry_max: u32,
    pub retry_base_ms: u64,
    pub ant_cache_ttl_secs: u64,
    pub ant_cache_max: usize,
    pub arns_cache_ttl_secs: u64,
    pub history_db_path: String,
    pub history_max: usize,
    pub render_fps: u32,
}

/// Validate that a value is within a given range (inclusive)
fn validate_in_range<T>(val: T, min: T, max: T, name: &str) -> Result<T>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if val < min || val > max {
        Err(anyhow!("{name} must be in range [{min}, {max}], got {val}"))
    } else {
        Ok(val)
    }
}

/// Load configuration from CLI args and environment variables
/// Priority: CLI args > Environment variables > Defaults
pub fn load() -> Result<Config> {
    from_args(CliArgs::parse())
}

/// Apply defaults and validation to already-parsed arguments.
pub fn from_args(args: CliArgs) -> Result<Config> {
    let graphql_url = args
        .graphql_url
        .unwrap_or_else(|| DEFAULT_GRAPHQL_URL.to_string());
    validate_url(&graphql_url, "GRAPHQL_URL")?;

    let cu_url = args.cu_url.unwrap_or_else(|| DEFAULT_CU_URL.to_string());
    validate_url(&cu_url, "CU_URL")?;

    let ario_process_id = args
        .ario_process_id
        .unwrap_or_else(|| ARIO_PROCESS_ID.to_string());
    if !is_arweave_id(&ario_process_id) {
        return Err(anyhow!("ARIO_PROCESS_ID must be a 43-character process id"));
    }

    let view = args.view.unwrap_or(View::Messages);
    let target = args.target.filter(|t| !t.trim().is_empty());
    validate_target(view, target.as_deref())?;

    let page_size = validate_in_range(args.page_size.unwrap_or(25), 1, 100, "PAGE_SIZE")?;
    let virtualize_factor =
        validate_in_range(args.virtualize_factor.unwrap_or(100), 1, 10_000, "VIRTUALIZE_FACTOR")?;

    let request_timeout_ms = validate_in_range(
        args.request_timeout_ms.unwrap_or(60_000),
        1_000,
        120_000,
        "REQUEST_TIMEOUT_MS",
    )?;
    let throttle_delay_ms =
        validate_in_range(args.throttle_delay_ms.unwrap_or(200), 0, 10_000, "THROTTLE_DELAY_MS")?;
    let retry_max = validate_in_range(args.retry_max.unwrap_or(3), 0, 10, "RETRY_MAX")?;
    let retry_base_ms =
        validate_in_range(args.retry_base_ms.unwrap_or(1_000), 10, 60_000, "RETRY_BASE_MS")?;

    let ant_cache_ttl_secs =
        validate_in_range(args.ant_cache_ttl_secs.unwrap_or(300), 1, 86_400, "ANT_CACHE_TTL_SECS")?;
    let ant_cache_max =
        validate_in_range(args.ant_cache_max.unwrap_or(100), 1, 100_000, "ANT_CACHE_MAX")?;
    let arns_cache_ttl_secs = validate_in_range(
        args.arns_cache_ttl_secs.unwrap_or(86_400),
        1,
        604_800,
        "ARNS_CACHE_TTL_SECS",
    )?;

    let history_db_path = args
        .history_db_path
        .unwrap_or_else(|| "./aoscan_history.db".to_string());
    if history_db_path.is_empty() {
        return Err(anyhow!("HISTORY_DB_PATH cannot be empty"));
    }
    let history_max = validate_in_range(args.history_max.unwrap_or(5), 1, 1_000, "HISTORY_MAX")?;

    let render_fps = validate_in_range(args.render_fps.unwrap_or(30), 1, 120, "RENDER_FPS")?;

    Ok(Config {
        graphql_url,
        cu_url,
        ario_process_id,
        view,
        target,
        page_size,
        virtualize_factor,
        request_timeout_ms,
        throttle_delay_ms,
        retry_max,
        retry_base_ms,
        ant_cache_ttl_secs,
        ant_cache_max,
        arns_cache_ttl_secs,
        history_db_path,
        history_max,
        render_fps,
    })
}

fn validate_target(view: View, target: Option<&str>) -> Result<()> {
    let Some(t) = target else {
        if view.needs_target() {
            return Err(anyhow!("VIEW={view} requires TARGET"));
        }
        return Ok(());
    };
    match view {
        View::Entity if !is_entity_id(t) => Err(anyhow!(
            "TARGET for the entity view must be an Arweave id or 0x address, got '{t}'"
        )),
        View::Linked if !is_arweave_id(t) => {
            Err(anyhow!("TARGET for the linked view must be a message id, got '{t}'"))
        }
        View::Module if !is_arweave_id(t) => {
            Err(anyhow!("TARGET for the module view must be a module id, got '{t}'"))
        }
        View::Block if t.parse::<u64>().is_err() => {
            Err(anyhow!("TARGET for the block view must be a block height, got '{t}'"))
        }
        _ => Ok(()),
    }
}

/// Validate URL format (basic check)
fn validate_url(url: &str, name: &str) -> Result<()> {
    if url.is_empty() {
        return Err(anyhow!("{name} cannot be empty"));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("{name} must start with http:// or https://"))
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn ant_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ant_cache_ttl_secs)
    }

    pub fn arns_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.arns_cache_ttl_secs)
    }

    /// Log the effective configuration at info level
    pub fn print_summary(&self) {
        log::info!("aoscan configuration:");
        log::info!("  GraphQL: {}", self.graphql_url);
        log::info!("  CU: {}", self.cu_url);
        log::info!("  AR.IO process: {}", self.ario_process_id);
        match &self.target {
            Some(t) => log::info!("  View: {} ({t})", self.view),
            None => log::info!("  View: {}", self.view),
        }
        log::info!(
            "  Page size: {} (virtualize above {} rows)",
            self.page_size,
            self.page_size * self.virtualize_factor
        );
        log::info!("  Request timeout: {}ms", self.request_timeout_ms);
        log::info!(
            "  Throttle: {}ms, retries: {} from {}ms",
            self.throttle_delay_ms,
            self.retry_max,
            self.retry_base_ms
        );
        log::info!("  History: {} (keep {})", self.history_db_path, self.history_max);
        log::info!("  Render FPS: {}", self.render_fps);
    }
}
