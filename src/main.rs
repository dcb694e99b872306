//! Mini-Ledger CLI Application
//!
//! A command-line interface for interacting with the ledger.

use clap::{Parser, Subcommand};
use mini_ledger::cli;
use mini_ledger::network::NodeConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ledger")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A single-node UTXO ledger with peer-to-peer chain sync", long_about = None)]
struct Cli {
    /// Data directory for ledger storage
    #[arg(short, long, default_value = ".ledger_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new chain, paying the genesis reward to an address
    CreateChain {
        #[arg(short, long)]
        address: String,
    },

    /// Show the balance of an address
    Balance {
        #[arg(short, long)]
        address: String,
    },

    /// Send coins from a local wallet to an address
    Send {
        /// Sender's wallet address
        #[arg(short, long)]
        from: String,

        /// Recipient's address
        #[arg(short, long)]
        to: String,

        #[arg(short, long)]
        amount: u64,
    },

    /// Print all blocks from tip to genesis
    PrintChain,

    /// Rebuild the UTXO index from stored blocks
    Reindex,

    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Start a P2P node
    StartNode {
        /// Address to listen on and advertise to peers
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,

        /// Initial peers to connect to (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<SocketAddr>,

        #[arg(long, default_value = "30")]
        read_timeout_secs: u64,

        #[arg(long, default_value = "30")]
        write_timeout_secs: u64,

        /// Maximum concurrent inbound connections
        #[arg(long, default_value = "64")]
        max_workers: usize,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new wallet
    New {
        /// Optional label for the wallet
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List all wallets
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::CreateChain { address } => cli::cmd_create_chain(&data_dir, &address),
        Commands::Balance { address } => cli::cmd_balance(&data_dir, &address),
        Commands::Send { from, to, amount } => cli::cmd_send(&data_dir, &from, &to, amount),
        Commands::PrintChain => cli::cmd_print_chain(&data_dir),
        Commands::Reindex => cli::cmd_reindex(&data_dir),
        Commands::Wallet { action } => match action {
            WalletCommands::New { label } => cli::cmd_wallet_new(&data_dir, label.as_deref()),
            WalletCommands::List => cli::cmd_wallet_list(&data_dir),
        },
        Commands::StartNode {
            listen,
            peers,
            read_timeout_secs,
            write_timeout_secs,
            max_workers,
        } => {
            let config = NodeConfig {
                listen_addr: listen,
                bootstrap_peers: peers,
                data_dir,
                read_timeout: Duration::from_secs(read_timeout_secs),
                write_timeout: Duration::from_secs(write_timeout_secs),
                max_workers,
                ..Default::default()
            };
            run_node(config)
        }
    }
}

#[tokio::main]
async fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    cli::cmd_start_node(config).await
}
