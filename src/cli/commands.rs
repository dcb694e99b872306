//! CLI commands for the ledger
//!
//! Implements all command handlers for the CLI interface.

use crate::core::{Blockchain, Transaction};
use crate::crypto::{address_to_lock_hash, lock_hash_to_address};
use crate::network::{Node, NodeConfig};
use crate::storage::StorageConfig;
use crate::wallet::WalletManager;
use std::path::Path;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn wallet_manager(data_dir: &Path) -> CliResult<WalletManager> {
    Ok(WalletManager::new(&data_dir.join("wallets"))?)
}

/// Create a new chain whose genesis reward goes to `address`
pub fn cmd_create_chain(data_dir: &Path, address: &str) -> CliResult<()> {
    let lock_hash = address_to_lock_hash(address)?;
    let blockchain = Blockchain::create(StorageConfig::at(data_dir), &lock_hash)?;
    let (height, hash) = blockchain.tip()?;

    println!("✅ Ledger created!");
    println!("   📁 Data directory: {:?}", data_dir);
    println!("   🧱 Genesis block: {}", hex::encode(hash));
    println!("   📏 Height: {}", height);
    println!("   💰 Reward paid to: {}", address);
    Ok(())
}

/// Show the spendable balance of `address`
pub fn cmd_balance(data_dir: &Path, address: &str) -> CliResult<()> {
    let lock_hash = address_to_lock_hash(address)?;
    let blockchain = Blockchain::open(StorageConfig::at(data_dir))?;
    let balance = blockchain.utxo().balance(&lock_hash)?;
    let unspent = blockchain.utxo().find_unspent(&lock_hash)?;

    println!("💰 Balance for {}", address);
    println!("   Total: {} coins", balance);
    println!("   Unspent outputs: {}", unspent.len());
    Ok(())
}

/// Transfer coins from a local wallet and commit the block
pub fn cmd_send(data_dir: &Path, from: &str, to: &str, amount: u64) -> CliResult<()> {
    let to_hash = address_to_lock_hash(to)?;
    let wallet = wallet_manager(data_dir)?.load_wallet(from)?;
    let blockchain = Blockchain::open(StorageConfig::at(data_dir))?;

    let block = blockchain.send(wallet.key_pair(), &to_hash, amount)?;

    println!("📤 Sent {} coins", amount);
    println!("   From: {}", from);
    println!("   To: {}", to);
    println!("   Block: {} at height {}", hex::encode(&block.hash), block.height);
    Ok(())
}

/// Print every block from the tip back to genesis
pub fn cmd_print_chain(data_dir: &Path) -> CliResult<()> {
    let blockchain = Blockchain::open(StorageConfig::at(data_dir))?;

    for block in blockchain.iter()? {
        let block = block?;
        println!("============ Block {} ============", hex::encode(&block.hash));
        println!("Height: {}", block.height);
        println!("Prev. hash: {}", hex::encode(&block.prev_hash));
        println!("Timestamp: {}", block.timestamp);
        println!("Hash valid: {}", block.verify_hash()?);
        for tx in &block.transactions {
            print_transaction(tx);
        }
        println!();
    }
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    println!("--- Transaction {}", hex::encode(&tx.id));
    if tx.is_coinbase() {
        println!("    coinbase");
    } else {
        for input in &tx.inputs {
            println!(
                "    in:  {}:{}",
                hex::encode(&input.tx_id),
                input.output_index.unwrap_or_default()
            );
        }
    }
    for (index, output) in tx.outputs.iter().enumerate() {
        println!(
            "    out: #{} {} -> {}",
            index,
            output.value,
            lock_hash_to_address(&output.lock_hash)
        );
    }
}

/// Rebuild the UTXO index from the stored blocks
pub fn cmd_reindex(data_dir: &Path) -> CliResult<()> {
    let blockchain = Blockchain::open(StorageConfig::at(data_dir))?;
    let count = blockchain.reindex()?;

    println!("✅ Reindex complete. {} transactions with unspent outputs.", count);
    Ok(())
}

/// Create and store a new wallet
pub fn cmd_wallet_new(data_dir: &Path, label: Option<&str>) -> CliResult<()> {
    let wallet = wallet_manager(data_dir)?.create_wallet(label)?;

    println!("🔐 New wallet created!");
    println!("   📍 Address: {}", wallet.address());
    if let Some(l) = &wallet.label {
        println!("   🏷️  Label: {}", l);
    }
    println!("\n   ⚠️  Your private key is stored in the wallets directory.");
    Ok(())
}

/// List stored wallets
pub fn cmd_wallet_list(data_dir: &Path) -> CliResult<()> {
    let addresses = wallet_manager(data_dir)?.list_wallets()?;

    if addresses.is_empty() {
        println!("📭 No wallets found. Create one with: ledger wallet new");
        return Ok(());
    }

    println!("📋 Wallets:");
    for address in addresses {
        println!("   {}", address);
    }
    Ok(())
}

/// Run a node until the process is stopped
pub async fn cmd_start_node(config: NodeConfig) -> CliResult<()> {
    let blockchain = Arc::new(Blockchain::open(StorageConfig::at(&config.data_dir))?);
    let node = Node::with_tcp(config, blockchain);

    println!(
        "🌐 Starting node on {} at height {}",
        node.config().listen_addr,
        node.blockchain().tip_height()?
    );
    let peers = node.initial_peers().await;
    if !peers.is_empty() {
        println!("   Connecting to peers: {:?}", peers);
    }

    tokio::select! {
        result = node.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            let status = node.status().await?;
            let saved = node.save_known_peers().await?;
            println!("\n📴 Shutting down at height {}", status.height);
            println!("   Remembered {} peers", saved);
        }
    }
    Ok(())
}
