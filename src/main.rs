use clap::{Args, Parser, Subcommand};
use loyalty::application::accrual_client::AccrualClient;
use loyalty::application::auth::AuthService;
use loyalty::application::engine::{Listing, LoyaltyEngine, SubmitOutcome};
use loyalty::application::reconciler::Reconciler;
use loyalty::application::replay::ReplaySession;
use loyalty::config::Settings;
use loyalty::domain::ports::{SharedClock, Stores};
use loyalty::domain::user::Credentials;
use loyalty::error::LoyaltyError;
use loyalty::infrastructure::accrual_http::HttpAccrualSource;
use loyalty::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use loyalty::infrastructure::rocksdb::RocksDBStore;
use loyalty::interfaces::csv::operation_reader::OperationReader;
use loyalty::interfaces::csv::report_writer::ReportWriter;
use loyalty::telemetry::init_tracing;
use miette::{IntoDiagnostic, Result, miette};
use mockable::DefaultClock;
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a user and print an access token
    Register(CredentialArgs),
    /// Log in and print an access token
    Login(CredentialArgs),
    /// Submit an order number for accrual
    Submit {
        #[command(flatten)]
        token: TokenArg,
        order: String,
    },
    /// List submitted orders as CSV
    Orders(TokenArg),
    /// Print the current balance as CSV
    Balance(TokenArg),
    /// Spend points against an order number
    Withdraw {
        #[command(flatten)]
        token: TokenArg,
        #[arg(long)]
        order: String,
        #[arg(long)]
        sum: Decimal,
    },
    /// List withdrawals as CSV
    Withdrawals(TokenArg),
    /// Run the reconciliation worker until Ctrl-C
    Reconcile {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Replay a CSV of user activity and print final balances
    Replay {
        /// Input operations CSV file
        input: PathBuf,
        /// How long to wait for pending orders to settle
        #[arg(long, default_value_t = 30)]
        settle_secs: u64,
    },
}

#[derive(Args)]
struct CredentialArgs {
    #[arg(long)]
    login: String,
    #[arg(long)]
    password: String,
}

impl CredentialArgs {
    fn into_credentials(self) -> Result<Credentials> {
        Credentials::new(self.login, self.password).map_err(report)
    }
}

#[derive(Args)]
struct TokenArg {
    /// Access token from `register` or `login`
    #[arg(long, env = "LOYALTY_TOKEN", hide_env_values = true)]
    token: String,
}

/// Turns a service error into a diagnostic without leaking internal detail.
fn report(e: LoyaltyError) -> miette::Report {
    if e.status_code() >= 500 {
        error!(error = %e, "Command failed");
    }
    miette!("{} (status {})", e.public_message(), e.status_code())
}

fn open_stores(settings: &Settings) -> Result<Stores> {
    if let Some(db_path) = &settings.db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            let store = RocksDBStore::open(db_path).map_err(report)?;
            info!(path = %db_path.display(), "Using RocksDB storage");
            return Ok(Stores::from_backend(Arc::new(store)));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        warn!(
            path = %db_path.display(),
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Stores::from_backend(Arc::new(InMemoryStore::new())))
}

fn accrual_client(settings: &Settings, clock: SharedClock) -> Result<Arc<AccrualClient>> {
    let address = settings.accrual_address.as_deref().ok_or_else(|| {
        report(LoyaltyError::ConfigError(
            "accrual address is required (-r or ACCRUAL_SYSTEM_ADDRESS)".to_string(),
        ))
    })?;
    let config = settings.accrual_client().map_err(report)?;
    let source = HttpAccrualSource::new(address, config.request_timeout).map_err(report)?;
    Ok(Arc::new(AccrualClient::new(Arc::new(source), clock, config)))
}

fn reconciler(settings: &Settings, stores: &Stores, clock: SharedClock) -> Result<Arc<Reconciler>> {
    let client = accrual_client(settings, clock.clone())?;
    let config = settings.reconciler().map_err(report)?;
    Ok(Arc::new(Reconciler::new(
        stores.orders.clone(),
        client,
        clock,
        config,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.settings.log_json);

    let settings = cli.settings;
    let stores = open_stores(&settings)?;
    let clock: SharedClock = Arc::new(DefaultClock);
    let auth_config = settings.auth().map_err(report)?;
    let auth = AuthService::new(stores.users.clone(), clock.clone(), auth_config).map_err(report)?;
    let engine = LoyaltyEngine::new(&stores, clock.clone());

    let stdout = io::stdout();
    match cli.command {
        Command::Register(args) => {
            let token = auth.register(args.into_credentials()?).await.map_err(report)?;
            println!("{token}");
        }
        Command::Login(args) => {
            let token = auth
                .authenticate(args.into_credentials()?)
                .await
                .map_err(report)?;
            println!("{token}");
        }
        Command::Submit { token, order } => {
            let user = auth.current_user(&token.token).await.map_err(report)?;
            match engine.submit_order(user, &order).await.map_err(report)? {
                SubmitOutcome::Accepted => println!("accepted"),
                SubmitOutcome::AlreadyAccepted => println!("already accepted"),
            }
        }
        Command::Orders(token) => {
            let user = auth.current_user(&token.token).await.map_err(report)?;
            match engine.orders(user).await.map_err(report)? {
                Listing::Empty => eprintln!("no content"),
                Listing::Items(orders) => ReportWriter::new(stdout.lock())
                    .write_orders(&orders)
                    .map_err(report)?,
            }
        }
        Command::Balance(token) => {
            let user = auth.current_user(&token.token).await.map_err(report)?;
            let balance = engine.balance(user).await.map_err(report)?;
            ReportWriter::new(stdout.lock())
                .write_balance(&balance)
                .map_err(report)?;
        }
        Command::Withdraw { token, order, sum } => {
            let user = auth.current_user(&token.token).await.map_err(report)?;
            engine.withdraw(user, &order, sum).await.map_err(report)?;
            println!("withdrawn");
        }
        Command::Withdrawals(token) => {
            let user = auth.current_user(&token.token).await.map_err(report)?;
            match engine.withdrawals(user).await.map_err(report)? {
                Listing::Empty => eprintln!("no content"),
                Listing::Items(withdrawals) => ReportWriter::new(stdout.lock())
                    .write_withdrawals(&withdrawals)
                    .map_err(report)?,
            }
        }
        Command::Reconcile { once } => {
            let reconciler = reconciler(&settings, &stores, clock)?;
            if once {
                let tick = reconciler.run_tick().await.map_err(report)?;
                info!(
                    examined = tick.examined,
                    settled = tick.settled,
                    deferred = tick.deferred,
                    "Single reconciliation pass done"
                );
            } else {
                let handle = reconciler.spawn();
                tokio::signal::ctrl_c().await.into_diagnostic()?;
                info!("Shutdown requested");
                handle.stop().await.map_err(report)?;
            }
        }
        Command::Replay { input, settle_secs } => {
            let file = File::open(input).into_diagnostic()?;
            let mut session = ReplaySession::new(&auth, &engine);
            for op_result in OperationReader::new(file).operations() {
                match op_result {
                    Ok(op) => {
                        if let Err(e) = session.apply(op).await {
                            warn!(error = %e.public_message(), "Error applying operation");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading operation");
                    }
                }
            }

            if settings.accrual_address.is_some() {
                let reconciler = reconciler(&settings, &stores, clock)?;
                reconciler
                    .run_until_settled(Duration::from_secs(settle_secs))
                    .await
                    .map_err(report)?;
            }

            let balances = session.balances().await.map_err(report)?;
            ReportWriter::new(stdout.lock())
                .write_balances(&balances)
                .map_err(report)?;
        }
    }

    Ok(())
}
