// Native binary for aoscan - Terminal UI mode

use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use aoscan::{
    app::{App, Tab, TableView},
    arns::{ArnsCaches, ArnsService},
    config::{load, Config, View},
    dryrun::DryRunClient,
    fetchers::{
        ArnsRecordsFetcher, BlocksFetcher, CombinedMessagesFetcher, MessagesFetcher,
        TokenTransfersFetcher,
    },
    graphql::{GraphQlClient, MessageQuery},
    history::DryRunHistory,
    loader::LoaderConfig,
    net::RetryPolicy,
    throttle::RequestThrottler,
    types::{AppEvent, MessageType},
    ui,
    util_text::is_arweave_id,
};

/// Shared backends, built once and handed to every view.
struct Services {
    graphql: Arc<GraphQlClient>,
    arns: Arc<ArnsService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (safe to ignore if not found)
    let _ = dotenvy::dotenv();

    // stderr shares the terminal with the TUI, so stay quiet unless asked
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    }

    let cfg = load().context("Failed to load configuration")?;
    cfg.print_summary();

    let history = DryRunHistory::start(&cfg.history_db_path, cfg.history_max)
        .with_context(|| format!("Failed to open history at {}", cfg.history_db_path))?;

    let retry = RetryPolicy::new(cfg.retry_max, cfg.retry_base());
    let graphql = Arc::new(GraphQlClient::new(&cfg.graphql_url, cfg.request_timeout(), retry)?);
    let dry_run = DryRunClient::new(&cfg.cu_url, cfg.request_timeout())?.with_log(Arc::new(history));
    let caches = Arc::new(ArnsCaches::new(
        cfg.ant_cache_ttl(),
        cfg.ant_cache_max,
        cfg.arns_cache_ttl(),
    ));
    let arns = Arc::new(ArnsService::new(
        Arc::new(dry_run),
        cfg.ario_process_id.clone(),
        Arc::new(RequestThrottler::new("arns", cfg.throttle_delay())),
        retry,
        caches,
    ));
    let services = Services { graphql, arns };

    let (tx, rx) = unbounded_channel::<AppEvent>();
    let tabs = build_tabs(&cfg, &services, &tx)
        .await
        .context("Failed to prepare view")?;

    // terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(tabs, cfg.render_fps, tx.clone());
    app.start();

    let res = run_loop(&mut app, &mut terminal, rx).await;

    // cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    res
}

fn loader_config(cfg: &Config, sort_field: &str) -> LoaderConfig {
    LoaderConfig::new(cfg.page_size, sort_field, false).with_timeout(Some(cfg.request_timeout()))
}

fn messages_tab(cfg: &Config, s: &Services, title: &str, query: MessageQuery) -> Box<dyn Tab> {
    Box::new(
        TableView::new(
            title,
            MessagesFetcher::new(s.graphql.clone(), query),
            loader_config(cfg, "ingestedAt"),
            cfg.virtualize_factor,
        )
        .with_total(|f: &MessagesFetcher| f.total()),
    )
}

async fn build_tabs(
    cfg: &Config,
    s: &Services,
    tx: &UnboundedSender<AppEvent>,
) -> Result<Vec<Box<dyn Tab>>> {
    let target = cfg.target.clone().unwrap_or_default();
    let tabs: Vec<Box<dyn Tab>> = match cfg.view {
        View::Messages => vec![messages_tab(cfg, s, "Messages", MessageQuery::All)],
        View::Processes => vec![messages_tab(
            cfg,
            s,
            "Processes",
            MessageQuery::Processes { module: None },
        )],
        View::Modules => vec![messages_tab(cfg, s, "Modules", MessageQuery::Modules)],
        View::Module => vec![messages_tab(
            cfg,
            s,
            "Processes by module",
            MessageQuery::Processes { module: Some(target.clone()) },
        )],
        View::Blocks => vec![Box::new(TableView::new(
            "Blocks",
            BlocksFetcher::new(s.graphql.clone()),
            loader_config(cfg, "height"),
            cfg.virtualize_factor,
        ))],
        View::Arns => vec![Box::new(
            TableView::new(
                "ArNS",
                ArnsRecordsFetcher::new(s.arns.clone()),
                loader_config(cfg, "startTimestamp"),
                cfg.virtualize_factor,
            )
            .with_total(|f: &ArnsRecordsFetcher| f.total()),
        )],
        View::Entity => {
            let is_process = match s.graphql.message_by_id(&target).await {
                Ok(Some(m)) => m.r#type == MessageType::Process,
                Ok(None) => false,
                Err(e) => {
                    log::warn!("could not classify {target}: {e}");
                    false
                }
            };
            annotate_entity(s.arns.clone(), target.clone(), is_process, tx.clone());
            let mut tabs: Vec<Box<dyn Tab>> = vec![
                messages_tab(
                    cfg,
                    s,
                    "Outgoing",
                    MessageQuery::Outgoing { entity: target.clone(), is_process },
                ),
                messages_tab(cfg, s, "Incoming", MessageQuery::Incoming { entity: target.clone() }),
                messages_tab(
                    cfg,
                    s,
                    "Spawned",
                    MessageQuery::Spawned { entity: target.clone(), is_process },
                ),
                Box::new(
                    TableView::new(
                        "Token transfers",
                        TokenTransfersFetcher::new(
                            s.graphql.clone(),
                            target.clone(),
                            cfg.ario_process_id.clone(),
                        ),
                        loader_config(cfg, "ingestedAt"),
                        cfg.virtualize_factor,
                    )
                    .with_total(|f: &TokenTransfersFetcher| f.total()),
                ),
            ];
            if is_process {
                tabs.push(messages_tab(cfg, s, "Evals", MessageQuery::Evals { entity: target.clone() }));
            }
            tabs
        }
        View::Linked => {
            let message = s
                .graphql
                .message_by_id(&target)
                .await?
                .ok_or_else(|| anyhow!("message {target} not found"))?;
            vec![Box::new(TableView::new(
                "Linked",
                CombinedMessagesFetcher::new(s.graphql.clone(), &message),
                loader_config(cfg, "ingestedAt").with_dedupe(true),
                cfg.virtualize_factor,
            ))]
        }
        View::Block => {
            let height = target
                .parse::<u64>()
                .with_context(|| format!("invalid block height {target}"))?;
            vec![messages_tab(
                cfg,
                s,
                &format!("Block {height}"),
                MessageQuery::Block {
                    recipient: cfg.ario_process_id.clone(),
                    height,
                },
            )]
        }
    };
    Ok(tabs)
}

/// Resolve ArNS context for an entity in the background.
fn annotate_entity(
    arns: Arc<ArnsService>,
    entity: String,
    is_process: bool,
    tx: UnboundedSender<AppEvent>,
) {
    tokio::spawn(async move {
        let mut parts = vec![if is_process { "process" } else { "wallet" }.to_string()];
        if let Some(name) = arns.primary_name(&entity).await {
            parts.push(format!("primary name: {name}"));
        } else if is_arweave_id(&entity) {
            if let Some(name) = arns.name_for_address(&entity).await {
                parts.push(format!("ArNS: {name}"));
            }
        }
        if is_process && arns.is_ant_process(&entity).await {
            parts.push("ANT".into());
            // ANT processes carry a logo in their state
            if let Some(name) = arns.name_for_address(&entity).await {
                if let Some(logo) = arns.logo(&name).await {
                    parts.push(format!("logo: {logo}"));
                }
            }
        }
        let _ = tx.send(AppEvent::Annotation(parts.join(" · ")));
    });
}

async fn run_loop(
    app: &mut App,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut rx: UnboundedReceiver<AppEvent>,
) -> Result<()> {
    let mut last_frame = Instant::now();

    loop {
        // frame budget (coalesced renders)
        let frame_ms = 1000u32.saturating_div(app.fps().max(1)) as u64;
        let budget = Duration::from_millis(frame_ms.max(1));
        let wait = budget.saturating_sub(last_frame.elapsed());

        // input first, then whatever background tasks delivered
        if event::poll(wait)? {
            if let Event::Key(k) = event::read()? {
                if k.kind == KeyEventKind::Press || k.kind == KeyEventKind::Repeat {
                    app.handle_key(k);
                }
            }
        }
        while let Ok(ev) = rx.try_recv() {
            app.on_event(ev);
        }
        if app.quit() {
            return Ok(());
        }

        if last_frame.elapsed() >= budget {
            let height = terminal.size()?.height;
            app.tick(ui::viewport_rows(height));
            terminal.draw(|f| ui::draw(f, app))?;
            last_frame = Instant::now();
        }
    }
}
