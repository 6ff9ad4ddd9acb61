//! Reprice
//!
//! Loads an order fixture, recalculates its prices and prints a receipt.

use std::{io, path::PathBuf, process::ExitCode};

use clap::Parser;
use jiff::Timestamp;
use thiserror::Error;
use tracing::{error, info};

use order_pricing::{
    fixtures::{FixtureError, OrderFixture},
    logging::{LoggingConfig, init_logging},
    order::{FetchOptions, OrderCalculator, PricingError},
    receipt::{Receipt, ReceiptError},
    settings::{Settings, SettingsError},
    store::InMemoryOrderStore,
    tax::NoTaxProvider,
};

/// Recalculate the prices of an order fixture
#[derive(Debug, Parser)]
struct RepriceArgs {
    /// Order fixture file
    #[arg(short, long, default_value = "fixtures/orders/entire_order_voucher.yml")]
    fixture: PathBuf,

    /// Engine settings file
    #[arg(short, long, env = "REPRICE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Recalculate even when prices are fresh
    #[arg(long)]
    force: bool,

    /// Treat missing tax app data as zero tax
    #[arg(long)]
    allow_empty_tax_data: bool,

    /// Defer recalculations that would call a tax app
    #[arg(long)]
    no_sync_webhooks: bool,

    #[command(flatten)]
    logging: LoggingConfig,
}

#[derive(Debug, Error)]
enum RepriceError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

fn main() -> ExitCode {
    let args = RepriceArgs::parse();

    if let Err(err) = init_logging(&args.logging) {
        #[expect(
            clippy::print_stderr,
            reason = "logging not initialized yet, must use eprintln"
        )]
        {
            eprintln!("Failed to initialise logging: {err}");
        }

        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "reprice failed");

            ExitCode::FAILURE
        }
    }
}

fn run(args: &RepriceArgs) -> Result<(), RepriceError> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let loaded = OrderFixture::load(&args.fixture)?.build()?;
    let order_id = loaded.order.id;

    info!(fixture = %args.fixture.display(), lines = loaded.lines.len(), "fixture loaded");

    let mut store = InMemoryOrderStore::new();
    store.insert(loaded.order, loaded.lines);

    let options = FetchOptions {
        force_update: args.force,
        allow_sync_webhooks: !args.no_sync_webhooks,
        allow_empty_tax_data: args.allow_empty_tax_data,
    };

    let calculator = OrderCalculator::new(&loaded.catalogue, &NoTaxProvider, &settings);
    let (order, lines) = calculator.recalculate_order(&mut store, order_id, options, Timestamp::now())?;

    Receipt::new(&order, &lines).write_to(io::stdout().lock())?;

    Ok(())
}
