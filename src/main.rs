use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

use tomato_client::auth::{AuthOutcome, TokenStore};
use tomato_client::context::AppContext;
use tomato_client::paths::DataPaths;
use tomato_client::playout::{NullAudioSink, PlayoutController, PlayoutState};
use tomato_client::sync::{SyncEngine, SyncProgress};

/// Operator actions arrive one per line on stdin — there is no embedded
/// browser/desktop shell here (§1 Non-goals), so the DJ console is this
/// thin command loop instead.
const TICK: Duration = Duration::from_millis(250);
const SHIP_EVERY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "tomato",
    about = "Tomato stop set scheduler client",
    version,
    disable_version_flag = true
)]
struct Cli {
    /// Raise logging to debug level.
    #[arg(long)]
    debug: bool,

    /// Skip the single-instance lock.
    #[arg(long)]
    allow_multiple: bool,

    /// Print a diagnostic status page as HTML and exit.
    #[arg(long)]
    print_html: bool,

    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

struct InstanceLock {
    paths: DataPaths,
    held: bool,
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.held {
            self.paths.release_single_instance_lock();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut ctx = match AppContext::bootstrap(cli.debug).await {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("failed to start: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.print_html {
        print_diagnostic_html(&ctx).await;
        return ExitCode::SUCCESS;
    }

    let mut lock = InstanceLock { paths: ctx.paths.clone(), held: false };
    if !cli.allow_multiple {
        if let Err(err) = ctx.paths.acquire_single_instance_lock() {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
        lock.held = true;
    }

    if let Err(err) = ensure_logged_in(&mut ctx).await {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    run_initial_sync(&mut ctx).await;

    let code = run_console(ctx).await;
    drop(lock);
    code
}

/// `/auth` needs a hostname/username/password triple that has no CLI flag
/// of its own (§6's surface only lists `--debug`/`--allow-multiple`/
/// `--print-html`/`-v`/`-h`); credential entry is an out-of-scope UI
/// concern (§1), so a first run picks the triple up from the environment.
async fn ensure_logged_in(ctx: &mut AppContext) -> Result<(), String> {
    if ctx.settings.auth_token.is_some() {
        return Ok(());
    }

    let hostname = std::env::var("TOMATO_HOST").ok();
    let username = std::env::var("TOMATO_USERNAME").ok();
    let password = std::env::var("TOMATO_PASSWORD").ok();
    let protocol = std::env::var("TOMATO_PROTOCOL").unwrap_or_else(|_| "https".to_string());

    let (hostname, username, password) = match (hostname, username, password) {
        (Some(h), Some(u), Some(p)) => (h, u, p),
        _ => {
            return Err(
                "not logged in: set TOMATO_HOST, TOMATO_USERNAME and TOMATO_PASSWORD to authenticate"
                    .to_string(),
            )
        }
    };

    match TokenStore::login(&mut ctx.settings, &ctx.paths, &protocol, &hostname, &username, &password).await {
        Ok(AuthOutcome::Success) => {
            log::info!("logged in to {hostname}");
            Ok(())
        }
        Ok(AuthOutcome::InvalidCredentials) => Err("login failed: invalid credentials".to_string()),
        Ok(AuthOutcome::Unreachable) => Err(format!("login failed: {hostname} is unreachable")),
        Err(err) => Err(format!("login failed: {err}")),
    }
}

async fn run_initial_sync(ctx: &mut AppContext) {
    let (Some(client), Some(token)) = (ctx.api_client(), ctx.auth_token().map(str::to_string)) else {
        return;
    };
    let engine = SyncEngine::new(&client, &ctx.catalog, &ctx.paths);
    let cancel = AtomicBool::new(false);
    log::info!("sync: starting");
    match engine.run(&token, &cancel, |p: SyncProgress| log::debug!("sync: {:.1}%", p.percent)).await {
        Ok(report) => {
            log::info!(
                "sync: complete ({} downloaded, {} already present, {} total)",
                report.assets_downloaded,
                report.assets_already_present,
                report.assets_total
            );
            // §4.2 step 5: "Set last_sync = now" is part of the commit phase.
            ctx.settings.last_sync = Some(chrono::Utc::now());
            if let Err(err) = ctx.save_settings() {
                log::warn!("failed to persist last_sync: {err}");
            }
        }
        Err(err) => log::error!("sync: failed: {err}"),
    }
}

/// The DJ console: reads one operator action per line from stdin while a
/// fixed-cadence tick drives the Playout Controller's wait-interval timer
/// and simulates natural end-of-asset (§5 — the caller owns tick cadence,
/// since the only `AudioSink` shipped here is `NullAudioSink`; see
/// DESIGN.md on the out-of-scope decoder boundary).
async fn run_console(mut ctx: AppContext) -> ExitCode {
    let mut rng = rand::thread_rng();
    let config = ctx.catalog.config().await.unwrap_or_default();
    let mut controller =
        PlayoutController::new(ctx.catalog.clone(), ctx.paths.clone(), config, NullAudioSink::new());

    println!("tomato ready — commands: next, skip, skip-stopset, pause, resume, sync, quit");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut tick = interval(TICK);
    let mut playing_since: Option<Instant> = None;
    let mut last_ship = Instant::now();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                match line.trim() {
                    "next" => dispatch(controller.generate_next_block_action(&mut rng).await),
                    "skip" => dispatch(controller.skip_current_asset()),
                    "skip-stopset" => dispatch(controller.skip_rest_of_stopset()),
                    "pause" => dispatch(controller.pause()),
                    "resume" => dispatch(controller.resume()),
                    "sync" => run_initial_sync(&mut ctx).await,
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("unrecognized command: {other}"),
                }
            }
            _ = tick.tick() => {
                match controller.state() {
                    PlayoutState::WaitingBetweenBlocks { .. } => {
                        dispatch(controller.tick_wait(TICK));
                    }
                    PlayoutState::Playing { paused: true, .. } => {}
                    PlayoutState::Playing { block, index, .. } => {
                        let duration = block.slots[*index].asset.as_ref().map(|a| a.duration_ms);
                        let elapsed = playing_since.get_or_insert_with(Instant::now).elapsed();
                        if let Some(ms) = duration {
                            if elapsed >= Duration::from_millis(ms.max(0) as u64) {
                                playing_since = None;
                                dispatch(controller.on_asset_ended());
                            }
                        } else {
                            // null slot already skipped synchronously by enter_slot
                            playing_since = None;
                        }
                    }
                    _ => playing_since = None,
                }
            }
        }

        for entry in controller.take_pending_logs() {
            if let Err(err) = ctx.log_shipper.enqueue(&entry).await {
                log::warn!("failed to enqueue log entry: {err}");
            }
        }

        if last_ship.elapsed() >= SHIP_EVERY {
            ship_pending(&ctx).await;
            last_ship = Instant::now();
        }

        if matches!(controller.state(), PlayoutState::Finished) {
            break;
        }
    }

    let _ = controller.shutdown();
    for entry in controller.take_pending_logs() {
        let _ = ctx.log_shipper.enqueue(&entry).await;
    }
    ship_pending(&ctx).await;
    let _ = ctx.save_settings();

    ExitCode::SUCCESS
}

async fn ship_pending(ctx: &AppContext) {
    let (Some(client), Some(token)) = (ctx.api_client(), ctx.auth_token().map(str::to_string)) else {
        return;
    };
    match ctx.log_shipper.ship_pending(&client, &token).await {
        Ok(0) => {}
        Ok(n) => log::info!("log shipper: shipped {n} entries"),
        Err(err) => log::warn!("log shipper: {err}"),
    }
}

fn dispatch(result: tomato_client::error::TomatoResult<()>) {
    if let Err(err) = result {
        log::warn!("{err}");
    }
}

async fn print_diagnostic_html(ctx: &AppContext) {
    let stopsets = ctx.catalog.currently_enabled_stopsets(chrono::Utc::now()).await.unwrap_or_default();
    let config = ctx.catalog.config().await.unwrap_or_default();

    println!("<!doctype html>");
    println!("<html><head><title>tomato diagnostic</title></head><body>");
    println!("<h1>Tomato client status</h1>");
    println!("<ul>");
    println!("<li>data dir: {}</li>", ctx.paths.root().display());
    println!("<li>hostname: {}</li>", ctx.settings.hostname.as_deref().unwrap_or("(none)"));
    println!("<li>logged in: {}</li>", ctx.settings.auth_token.is_some());
    println!(
        "<li>last sync: {}</li>",
        ctx.settings.last_sync.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
    );
    println!("<li>currently enabled stop sets: {}</li>", stopsets.len());
    println!("<li>wait interval (minutes): {}</li>", config.wait_interval_minutes);
    println!("<li>timezone: {}</li>", config.timezone);
    println!("</ul>");
    println!("</body></html>");
}
