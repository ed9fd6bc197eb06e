//! Binary entry point for the qmodel CLI.
#![forbid(unsafe_code)]

#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use qmodel::cli::{run_parse, run_shape, ParseReport, ShapeReport};
use qmodel::config::ParserConfig;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "qmodel",
    version,
    about = "Fold method-chained query expression trees into query models",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Parser config file (defaults to <config dir>/qmodel/parser.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "QMODEL_LOG",
        default_value = "warn",
        help = "Log filter directive (e.g. debug, qmodel::parse=trace)"
    )]
    log_level: String,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Disable colored output")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fold a tree file into a query model and print it
    Parse {
        #[arg(value_name = "TREE")]
        tree: PathBuf,
    },
    /// Print the output shape of a tree file's query model
    Shape {
        #[arg(value_name = "TREE")]
        tree: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    install_tracing_subscriber(&cli.log_level);

    let config = ParserConfig::load_or_default(cli.config.as_deref())?;
    let ui = Ui::new(if cli.plain { Theme::Plain } else { Theme::Auto });

    match &cli.command {
        Command::Parse { tree } => {
            let report = run_parse(tree, config)?;
            emit(cli.format, &report, |report| print_parse_text(&ui, report))
        }
        Command::Shape { tree } => {
            let report = run_shape(tree, config)?;
            emit(cli.format, &report, |report| print_shape_text(&ui, report))
        }
    }
}

fn install_tracing_subscriber(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_parse_text(ui: &Ui, report: &ParseReport) {
    ui.query("Model", &report.model);
    ui.spacer();
    ui.fields("Output", &[("shape", report.explain.output_shape.as_str())]);
    ui.spacer();
    ui.list("Sources", report.sources.iter().cloned());
    ui.spacer();
    ui.explain("Explain", &report.explain.root);
}

fn print_shape_text(ui: &Ui, report: &ShapeReport) {
    ui.fields(
        "Output",
        &[
            ("shape", report.rendered.as_str()),
            ("kind", report.shape.kind()),
        ],
    );
    if !report.result_operators.is_empty() {
        ui.spacer();
        ui.list("Result operators", report.result_operators.iter().cloned());
    }
}
