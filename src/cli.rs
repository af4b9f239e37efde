//! Command-line interface for the portfolio engine.

use folio::config::FolioConfig;
use folio::data::{align_prices, CsvDirectory, PriceSource};
use folio::engine::PortfolioEngine;
use folio::error::{EngineError, Result};
use folio::report::ReportFormatter;
use folio::server;
use folio::training::TrainingPipeline;
use folio::types::{AssetClass, DateRange, Holding, PortfolioWeights, RebalanceFrequency};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// folio - portfolio optimization, backtesting and forecast model comparison.
#[derive(Parser)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "Portfolio construction engine: optimize, backtest, analyze and train")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen host
        #[arg(long)]
        host: Option<String>,

        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Compute optimal weights for a set of symbols
    Optimize {
        #[command(flatten)]
        common: CommonArgs,

        /// Comma-separated symbols (at least two)
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// 0 = minimum variance, 1 = maximum Sharpe
        #[arg(short, long, default_value = "0.5")]
        risk_tolerance: f64,

        /// Rebalance frequency used to annualize statistics
        #[arg(long, value_enum)]
        rebalance: Option<RebalanceArg>,
    },

    /// Backtest a fixed weighting
    Backtest {
        #[command(flatten)]
        common: CommonArgs,

        /// Weights as SYMBOL=FRACTION, comma-separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        weights: Vec<String>,

        /// Extra symbols held at zero weight
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        #[arg(long, value_enum)]
        rebalance: Option<RebalanceArg>,

        /// Explicit rebalance dates (YYYY-MM-DD), repeatable
        #[arg(long = "rebalance-date")]
        rebalance_dates: Vec<NaiveDate>,
    },

    /// Train and compare the forecast model panel
    Train {
        #[command(flatten)]
        common: CommonArgs,

        /// Comma-separated symbols
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
    },

    /// Compare current holdings with the optimized portfolio
    Analyze {
        #[command(flatten)]
        common: CommonArgs,

        /// Holdings as SYMBOL=QUANTITY, comma-separated
        #[arg(long = "holdings", value_delimiter = ',', required = true)]
        holdings: Vec<String>,

        #[arg(long, value_enum)]
        rebalance: Option<RebalanceArg>,
    },

    /// Create an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "folio.toml")]
        output: PathBuf,
    },
}

/// Options shared by the data-driven commands.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of <SYMBOL>.csv price files (overrides the config)
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// First date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    #[arg(short, long, value_enum)]
    pub asset_class: Option<AssetClassArg>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum AssetClassArg {
    Stock,
    Crypto,
}

impl From<AssetClassArg> for AssetClass {
    fn from(a: AssetClassArg) -> Self {
        match a {
            AssetClassArg::Stock => AssetClass::Stock,
            AssetClassArg::Crypto => AssetClass::Crypto,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum RebalanceArg {
    Daily,
    Weekly,
    OnDemand,
}

impl From<RebalanceArg> for RebalanceFrequency {
    fn from(r: RebalanceArg) -> Self {
        match r {
            RebalanceArg::Daily => RebalanceFrequency::Daily,
            RebalanceArg::Weekly => RebalanceFrequency::Weekly,
            RebalanceArg::OnDemand => RebalanceFrequency::OnDemand,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Logging was already initialized");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Serve { config, host, port } => serve(config.as_ref(), host.clone(), *port),

        Commands::Optimize {
            common,
            symbols,
            risk_tolerance,
            rebalance,
        } => run_optimize(common, symbols, *risk_tolerance, *rebalance, cli.output),

        Commands::Backtest {
            common,
            weights,
            symbols,
            rebalance,
            rebalance_dates,
        } => run_backtest(common, weights, symbols, *rebalance, rebalance_dates, cli.output),

        Commands::Train { common, symbols } => run_training(common, symbols, cli.output),

        Commands::Analyze {
            common,
            holdings,
            rebalance,
        } => run_analysis(common, holdings, *rebalance, cli.output),

        Commands::Init { output } => init_config(output),
    }
}

/// Everything a data command needs, resolved from flags and config.
struct Context {
    config: FolioConfig,
    source: Arc<CsvDirectory>,
    range: DateRange,
    asset_class: AssetClass,
}

impl Context {
    fn new(common: &CommonArgs) -> Result<Self> {
        let mut config = load_config(common.config.as_ref())?;
        if let Some(dir) = &common.data {
            config.data.prices_dir = dir.clone();
        }
        let source = CsvDirectory::new(config.data.prices_dir.clone())
            .with_config(config.data.to_data_config()?);
        let range = DateRange::from_bounds(common.start, common.end)?;
        let asset_class = common
            .asset_class
            .map(AssetClass::from)
            .unwrap_or(config.engine.default_asset_class);

        Ok(Self {
            config,
            source: Arc::new(source),
            range,
            asset_class,
        })
    }

    fn engine(&self) -> PortfolioEngine {
        PortfolioEngine::new(self.source.clone(), self.config.engine_config())
    }

    fn rebalance(&self, arg: Option<RebalanceArg>) -> RebalanceFrequency {
        arg.map(RebalanceFrequency::from)
            .unwrap_or(self.config.engine.default_rebalance)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FolioConfig> {
    match path {
        Some(p) => FolioConfig::load(p),
        None => Ok(FolioConfig::default()),
    }
}

fn serve(config_path: Option<&PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(&config))
}

fn run_optimize(
    common: &CommonArgs,
    symbols: &[String],
    risk_tolerance: f64,
    rebalance: Option<RebalanceArg>,
    output: OutputFormat,
) -> Result<()> {
    let ctx = Context::new(common)?;
    let outcome = ctx.engine().optimize(
        symbols,
        ctx.asset_class,
        &ctx.range,
        risk_tolerance,
        ctx.rebalance(rebalance),
    )?;

    match output {
        OutputFormat::Text => ReportFormatter::print_optimization(&outcome),
        OutputFormat::Json => println!("{}", ReportFormatter::to_json(&outcome)),
    }
    Ok(())
}

fn run_backtest(
    common: &CommonArgs,
    weight_args: &[String],
    extra_symbols: &[String],
    rebalance: Option<RebalanceArg>,
    rebalance_dates: &[NaiveDate],
    output: OutputFormat,
) -> Result<()> {
    let ctx = Context::new(common)?;
    let parsed = parse_pairs(weight_args, "weight")?;
    let weights = PortfolioWeights::new(parsed)?;

    let mut symbols = weights.symbols();
    for s in extra_symbols {
        if !symbols.contains(s) {
            symbols.push(s.clone());
        }
    }

    let result = ctx.engine().backtest(
        &symbols,
        ctx.asset_class,
        &weights,
        &ctx.range,
        ctx.rebalance(rebalance),
        rebalance_dates,
    )?;

    match output {
        OutputFormat::Text => ReportFormatter::print_backtest(&result),
        OutputFormat::Json => println!("{}", ReportFormatter::to_json(&result)),
    }
    Ok(())
}

fn run_training(common: &CommonArgs, symbols: &[String], output: OutputFormat) -> Result<()> {
    let ctx = Context::new(common)?;
    let series = ctx.source.fetch(symbols, ctx.asset_class, &ctx.range)?;
    let prices = align_prices(&series, &ctx.range)?;
    info!("Training on {} aligned dates for {:?}", prices.len(), prices.symbols);

    let pipeline = TrainingPipeline::new(ctx.config.training.clone());
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let result = pipeline.run(&prices, &mut |progress, model| {
        pb.set_position(progress.round() as u64);
        pb.set_message(model.to_string());
    });
    pb.finish_and_clear();
    let report = result?;

    match output {
        OutputFormat::Text => ReportFormatter::print_training(&report),
        OutputFormat::Json => println!("{}", ReportFormatter::to_json(&report)),
    }
    Ok(())
}

fn run_analysis(
    common: &CommonArgs,
    holding_args: &[String],
    rebalance: Option<RebalanceArg>,
    output: OutputFormat,
) -> Result<()> {
    let ctx = Context::new(common)?;
    let holdings: Vec<Holding> = parse_pairs(holding_args, "holding")?
        .into_iter()
        .map(|(symbol, quantity)| Holding { symbol, quantity })
        .collect();

    let outcome = ctx
        .engine()
        .analyze(&holdings, ctx.asset_class, &ctx.range, ctx.rebalance(rebalance))?;

    match output {
        OutputFormat::Text => ReportFormatter::print_analysis(&outcome),
        OutputFormat::Json => println!("{}", ReportFormatter::to_json(&outcome)),
    }
    Ok(())
}

/// Parse `SYMBOL=NUMBER` arguments.
fn parse_pairs(args: &[String], what: &str) -> Result<BTreeMap<String, f64>> {
    let mut out = BTreeMap::new();
    for arg in args {
        let (symbol, value) = arg.split_once('=').ok_or_else(|| {
            EngineError::InvalidRequest(format!("{} '{}' must look like SYMBOL=NUMBER", what, arg))
        })?;
        let value: f64 = value.trim().parse().map_err(|_| {
            EngineError::InvalidRequest(format!("{} '{}' has a non-numeric value", what, arg))
        })?;
        if out.insert(symbol.trim().to_string(), value).is_some() {
            return Err(EngineError::InvalidRequest(format!(
                "{} for {} given twice",
                what,
                symbol.trim()
            )));
        }
    }
    Ok(out)
}

fn init_config(output: &PathBuf) -> Result<()> {
    fs::write(output, FolioConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file, then run for example:");
    println!("  folio optimize -c {} -s AAPL,MSFT,GOOG", output.display());
    println!("  folio serve -c {}", output.display());
    Ok(())
}
