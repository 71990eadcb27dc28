use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use stakechain::account::{AccountLedger, InMemoryLedger};
use stakechain::chain::{ChainState, InMemoryChain};
use stakechain::config::NodeConfig;
use stakechain::crypto;
use stakechain::forge;
use stakechain::mempool::{Admission, TransactionProcessor};
use stakechain::time::{self, SystemClock, TimeSource};
use stakechain::tx::{format_account_id, TransactionBody};
use stakechain::{Block, Transaction};

/// Single-process forging node: a stake-weighted chain kept in memory.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cli {
    /// TOML settings file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Number of blocks to forge (overrides the configured value)
    #[clap(long)]
    blocks: Option<u32>,
}

const WALLETS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const WALLET_BALANCE: i64 = 1_000_000;

fn random_payment(clock: &dyn TimeSource) -> Result<Arc<Transaction>> {
    let mut rng = rand::thread_rng();
    let sender = WALLETS[rng.gen_range(0..WALLETS.len())];
    let recipient = crypto::account_id(&crypto::public_key(WALLETS[rng.gen_range(0..WALLETS.len())])?);
    let body = TransactionBody {
        tx_type: 0,
        subtype: 0,
        timestamp: clock.now(),
        deadline: 1440,
        sender_public_key: crypto::public_key(sender)?,
        recipient_id: recipient as u64,
        amount: rng.gen_range(1..50_000),
        fee: rng.gen_range(1..10),
        referenced_transaction_id: None,
    };
    Ok(Arc::new(body.sign(sender)?))
}

/// Moves the funds of included transactions and confirms them in the pool.
fn settle(block: &Block, ledger: &InMemoryLedger, processor: &TransactionProcessor<InMemoryLedger>) {
    for tx in block.transactions() {
        if !processor.add_transaction(Arc::clone(tx)) {
            warn!(id = %tx.string_id(), "transaction confirmed twice");
            continue;
        }
        let sender = ledger.id_from_public_key(tx.sender_public_key());
        ledger.adjust_confirmed_balance(sender, -tx.required_balance());
        let recipient = ledger.add_or_get_account(tx.body().recipient_id as i64);
        ledger.adjust_balance_and_unconfirmed_balance(recipient, i64::from(tx.amount()));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = NodeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(blocks) = cli.blocks {
        cfg.blocks = blocks;
    }
    tracing_subscriber::fmt().with_max_level(cfg.level()?).init();

    let ledger = Arc::new(InMemoryLedger::new());
    let chain = InMemoryChain::new();
    let clock = SystemClock;
    let processor = TransactionProcessor::new(Arc::clone(&ledger), Box::new(clock));

    let forger = ledger.fund(&crypto::public_key(&cfg.secret_phrase)?, cfg.genesis_balance);
    for wallet in WALLETS {
        ledger.fund(&crypto::public_key(wallet)?, WALLET_BALANCE);
    }

    let genesis = Arc::new(forge::genesis_block(&cfg.secret_phrase, cfg.block_version)?);
    genesis.apply(ledger.as_ref())?;
    chain.push(Arc::clone(&genesis))?;
    info!(id = %genesis.string_id()?, forger = %format_account_id(forger as u64), "genesis block created");

    for _ in 0..cfg.blocks {
        for _ in 0..cfg.transactions_per_block {
            let tx = random_payment(&clock)?;
            if let Admission::Rejected(reason) = processor.admit(tx) {
                warn!(?reason, "generated transaction rejected");
            }
        }

        let tip = chain.tip().context("chain has no tip")?;
        let mut pending = processor.unconfirmed_transactions();
        pending.truncate(cfg.transactions_per_block);

        let Some(block) = forge::forge_next(&tip, &cfg.secret_phrase, ledger.as_ref(), pending, cfg.block_version)? else {
            bail!("forging account has no effective balance");
        };
        if !block.verify_block_signature(ledger.as_ref()) {
            bail!("forged block {} has an invalid signature", block.string_id()?);
        }
        if !block.verify_generation_signature(ledger.as_ref(), &chain)? {
            bail!("forged block {} is not eligible", block.string_id()?);
        }

        block.set_previous(Some(&tip))?;
        block.apply(ledger.as_ref())?;
        let block = Arc::new(block);
        chain.push(Arc::clone(&block))?;
        settle(&block, &ledger, &processor);

        info!(
            id = %block.string_id()?,
            height = block.height()?,
            timestamp = block.timestamp(),
            forged_at = ?time::to_datetime(block.timestamp()),
            base_target = block.base_target()?,
            transactions = block.transactions().len(),
            "block pushed"
        );
    }

    info!(
        height = chain.height().unwrap_or_default(),
        confirmed = processor.confirmed_count(),
        pending = processor.unconfirmed_count(),
        double_spending = processor.double_spending_count(),
        forger_balance = ledger.account(forger).map(|a| a.balance).unwrap_or_default(),
        "done"
    );
    Ok(())
}
