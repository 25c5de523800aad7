use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Mutex, mpsc};
use std::time::Duration;

use arboard::Clipboard;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod controller;
mod domain;
mod filters;
mod inputter;
mod model;
mod record;
mod report;
mod ui;

use api::{Backend, ReportClient};
use controller::Controller;
use domain::{DEFAULT_API_URL, DEFAULT_LIMIT, PAGE_SIZES, RVConfig, RVError, parse_limit};
use model::{Model, Status};
use ui::ReportUI;

/// Browse reports generated by a record collection backend.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Base URL of the report backend
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Collection to select on start
    #[arg(short, long)]
    collection: Option<String>,

    /// Maximum number of records per report (1..=10000)
    #[arg(short, long, default_value_t = DEFAULT_LIMIT, value_parser = limit_arg)]
    limit: usize,

    /// Rows per results page
    #[arg(short, long, default_value_t = PAGE_SIZES[0], value_parser = page_size_arg)]
    page_size: usize,

    /// Directory CSV exports are written to
    #[arg(short, long, default_value = ".")]
    export_dir: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Log file, the terminal belongs to the UI
    #[arg(long, default_value = "rv.log")]
    log_file: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn limit_arg(s: &str) -> Result<usize, String> {
    parse_limit(s).map_err(|e| e.to_string())
}

fn page_size_arg(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|_| format!("\"{s}\" is not a number"))?;
    if PAGE_SIZES.contains(&size) {
        Ok(size)
    } else {
        Err(format!("page size must be one of {PAGE_SIZES:?}"))
    }
}

fn expand_path(path: &str) -> Result<PathBuf, RVError> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.into_owned()))
        .map_err(|e| RVError::IoError(std::io::Error::other(e.to_string())))
}

impl Args {
    fn to_config(&self) -> Result<RVConfig, RVError> {
        Ok(RVConfig::default()
            .api_url(self.api_url.clone())
            .collection(self.collection.clone())
            .limit(self.limit)
            .page_size(self.page_size)
            .export_dir(expand_path(&self.export_dir)?)
            .request_timeout(Duration::from_secs(self.timeout)))
    }
}

fn init_logging(args: &Args) -> Result<(), RVError> {
    let log_file = File::create(expand_path(&args.log_file)?)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(log_file)),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("Error: could not set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = run(&args);
    ratatui::restore();
    match result {
        Err(e) => {
            error!("rv stopped: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(args: &Args) -> Result<(), RVError> {
    let cfg = args.to_config()?;
    info!("Starting rv against {}", cfg.api_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let client = ReportClient::new(&cfg.api_url, cfg.request_timeout)?;
    let (tx, rx) = mpsc::channel();
    let backend = Backend::new(client, runtime.handle().clone(), tx);

    let clipboard = match Clipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(e) => {
            warn!("No clipboard available: {e}");
            None
        }
    };

    let mut terminal = ratatui::init();
    let size = terminal.size()?;
    let mut model = Model::init(
        &cfg,
        Box::new(backend),
        clipboard,
        size.width as usize,
        size.height as usize,
    );
    let controller = Controller::new(&cfg, rx);
    let ui = ReportUI;

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(model.get_uidata(), f))?;

        // Handle events and map to a Message
        if let Some(message) = controller.handle_event(model.raw_keyevents())? {
            model.update(Some(message));
        }
    }

    info!("Quitting rv");
    runtime.shutdown_timeout(Duration::from_millis(200));
    Ok(())
}
