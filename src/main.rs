use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use ratatui::DefaultTerminal;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod columns;
mod config;
mod controller;
mod domain;
mod filters;
mod inputter;
mod loader;
mod model;
mod sorting;
mod state;
mod ui;
mod values;

use config::TableConfiguration;
use controller::Controller;
use domain::{PAGE_SIZE_CHOICES, RTVConfig, RTVError};
use model::{Model, Status, TableSource};
use state::{FileStore, MemoryStore, StateStore};
use ui::UI;

/// View, sort and filter genomics record tables in the terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Table file (csv, tsv, parquet or arrow)
    path: PathBuf,

    /// Record type of the built in table configurations (gene or dataset)
    #[arg(long, default_value = "gene")]
    record_type: String,

    /// Name of the table configuration to apply
    #[arg(short, long)]
    table: Option<String>,

    /// JSON file with table configurations, instead of the built in ones
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with attribute metadata (name, displayName, isDisplayable, ...)
    #[arg(short, long)]
    attributes: Option<PathBuf>,

    /// Where view states are persisted between sessions
    #[arg(long, default_value = "~/.local/share/rtv/state.json")]
    state_file: String,

    /// Do not read or write persisted view states
    #[arg(long)]
    no_state: bool,

    #[arg(long, default_value_t = domain::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Event poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    #[arg(long, default_value_t = 40)]
    max_column_width: usize,

    /// Quiet period before a changed view state is written, in milliseconds
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,

    /// Log file, the level is set with RUST_LOG
    #[arg(long, default_value = "~/.local/share/rtv/rtv.log")]
    log_file: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn setup_logging(path: &Path) -> Result<(), RTVError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| RTVError::invalid_config(format!("logging: {e}")))
}

fn build_config(args: &Args) -> Result<RTVConfig, RTVError> {
    if !PAGE_SIZE_CHOICES.contains(&args.page_size) {
        return Err(RTVError::invalid_config(format!(
            "page size must be one of {PAGE_SIZE_CHOICES:?}"
        )));
    }
    let state_file = (!args.no_state).then(|| expand(&args.state_file));
    Ok(RTVConfig::default()
        .event_poll_time(args.poll_ms)
        .max_column_width(args.max_column_width)
        .page_size(args.page_size)
        .state_debounce(Duration::from_millis(args.debounce_ms))
        .state_file(state_file))
}

fn table_configuration(args: &Args) -> Result<TableConfiguration, RTVError> {
    match (&args.config, &args.table) {
        (Some(path), Some(table)) => config::load_table_configurations(path)?
            .remove(table)
            .ok_or_else(|| RTVError::UnknownTable(table.clone())),
        (Some(_), None) => Err(RTVError::invalid_config("--config needs --table")),
        (None, Some(table)) => config::builtin_table(&args.record_type, table),
        // Plain files can be searched and have their columns toggled
        (None, None) => Ok(TableConfiguration::default()
            .can_filter(true)
            .can_toggle_columns(true)),
    }
}

fn load_source(args: &Args) -> Result<TableSource, RTVError> {
    let info = loader::get_file_info(args.path.clone())?;
    let data = loader::load_record_data(&info)?;
    let attributes = match &args.attributes {
        Some(path) => loader::load_attributes(path)?,
        None => loader::attributes_from_fields(&data),
    };
    let config = table_configuration(args)?;
    let id = match &args.table {
        Some(table) => format!("{}/{table}", args.record_type),
        None => info.stem(),
    };
    Ok(TableSource {
        id,
        name: info.name(),
        data,
        attributes,
        config,
    })
}

fn run(args: Args) -> Result<(), RTVError> {
    setup_logging(&expand(&args.log_file))?;
    info!("Starting rtv {}", env!("CARGO_PKG_VERSION"));

    let cfg = build_config(&args)?;
    let source = load_source(&args)?;
    let store: Box<dyn StateStore> = match &cfg.state_file {
        Some(path) => Box::new(FileStore::new(path.clone())),
        None => Box::new(MemoryStore::default()),
    };

    let mut terminal = ratatui::init();
    let result = run_ui(&mut terminal, &cfg, store, source);
    ratatui::restore();
    result
}

fn run_ui(
    terminal: &mut DefaultTerminal,
    cfg: &RTVConfig,
    store: Box<dyn StateStore>,
    source: TableSource,
) -> Result<(), RTVError> {
    let size = terminal.size()?;
    let mut model = Model::init(cfg, store, size.width as usize, size.height as usize);
    model.open_table(source)?;

    let mut ui = UI::default();
    let controller = Controller::new(cfg);

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        model.update(controller.handle_event(&model)?)?;
    }
    info!("Quitting rtv");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["rtv", "variants.csv"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults() {
        let args = args(&[]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.state_debounce, Duration::from_millis(500));
        assert!(cfg.state_file.is_some_and(|p| p.ends_with("rtv/state.json")));
        assert!(table_configuration(&args).unwrap().can_filter);
    }

    #[test]
    fn invalid_page_size_is_rejected() {
        let args = args(&["--page-size", "30"]);
        assert!(matches!(build_config(&args), Err(RTVError::InvalidConfig { .. })));
    }

    #[test]
    fn builtin_table_selection() {
        let config = table_configuration(&args(&["--record-type", "dataset", "-t", "gwas"])).unwrap();
        assert!(config.default_open);
        assert!(matches!(
            table_configuration(&args(&["-t", "nope"])),
            Err(RTVError::UnknownTable(_))
        ));
        assert!(build_config(&args(&["--no-state"])).unwrap().state_file.is_none());
    }
}
