use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metal_ledger::*;

#[derive(Parser)]
#[command(name = "metal-ledger-cli")]
#[command(about = "Metal Ledger CLI - issue and transfer metal ownership records between parties")]
#[command(version = "1.0.0")]
struct Cli {
    /// Log verbosity (-v warn, -vv info, -vvv debug); RUST_LOG applies otherwise
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run Mint, A and B on an in-process network: Mint issues gold to A, A transfers it to B
    Demo {
        /// Node configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Asset kind to issue
        #[arg(long, default_value = "Gold")]
        asset: String,

        /// Quantity to issue and transfer
        #[arg(long, default_value = "10")]
        quantity: i64,
    },

    /// Decode a canonical transition from a file and run the validator on it
    Validate {
        /// File holding the canonical JSON encoding
        file: PathBuf,
    },

    /// Generate a new identity
    Keygen {
        /// Party name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    log_init(cli.verbose, cli.debug);

    let result = match cli.command {
        Commands::Demo {
            config,
            asset,
            quantity,
        } => handle_demo(config, asset, quantity).await,
        Commands::Validate { file } => handle_validate(file),
        Commands::Keygen { name } => handle_keygen(name),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn handle_demo(config: Option<PathBuf>, asset: String, quantity: i64) -> Result<()> {
    let config = match config {
        Some(path) => NodeConfig::from_json_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };

    let notary = Arc::new(InMemoryNotary::new(LocalIdentity::generate("Notary")?));
    let network = Arc::new(MockNetwork::new());
    let progress: ProgressObserver = Arc::new(|state: &ProtocolState| println!("  -> {}", state));

    let start = |name: &str| -> Result<Node> {
        let node = Node::start(
            LocalIdentity::generate(name)?,
            notary.clone(),
            network.clone(),
            config.clone(),
        )?;
        Ok(node.with_progress_observer(progress.clone()))
    };
    let mint = start("Mint")?;
    let trader_a = start("A")?;
    let trader_b = start("B")?;

    println!("Issue {} x{} from {} to {}", asset, quantity, mint.party(), trader_a.party());
    let issued = mint
        .issue_metal(&asset, quantity, trader_a.party())
        .await
        .context("issue failed")?;
    report_outcome(&issued);

    println!("Transfer {} x{} from {} to {}", asset, quantity, trader_a.party(), trader_b.party());
    let transferred = trader_a
        .transfer_metal(&asset, quantity, trader_b.party())
        .await
        .context("transfer failed")?;
    report_outcome(&transferred);

    for node in [&mint, &trader_a, &trader_b] {
        let report = node.search_vault();
        println!("\nVault of {}:", node.party());
        println!("  Unconsumed:");
        for state in &report.unconsumed {
            println!("    {} {}", state.reference, state.record);
        }
        println!("  Consumed:");
        for state in &report.consumed {
            println!("    {} {}", state.reference, state.record);
        }
    }

    Ok(())
}

fn report_outcome(outcome: &CommitOutcome) {
    let notarised = &outcome.notarised;
    println!("Finalized {} at position {}", notarised.id(), notarised.order_position);
    for party in &outcome.unacknowledged {
        println!("  ✗ {} did not acknowledge", party);
    }
}

fn handle_validate(file: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let transition = Transition::decode(&bytes)?;
    println!("Transition: {}", transition.id()?);

    match verify_transition(&transition) {
        Ok(()) => {
            println!("Valid: true");
            println!("✓ Transition is valid");
        }
        Err(e) => {
            println!("Valid: false");
            println!("✗ {}", e);
            process::exit(1);
        }
    }

    Ok(())
}

fn handle_keygen(name: String) -> Result<()> {
    let identity = LocalIdentity::generate(name)?;

    println!("Name: {}", identity.party().name);
    println!("Owning Key: {}", identity.party().owning_key);
    println!("Secret Key: {}", identity.secret_hex());

    Ok(())
}
