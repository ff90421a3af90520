use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use solana_account_decoder_client_types::UiAccountEncoding;
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_client::rpc_filter::{Memcmp, MemcmpEncodedBytes, RpcFilterType};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, sysvar};
use std::str::FromStr;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use unstake_core::pda::{derive_protocol_fee, STAKE_PROGRAM_ID, UNSTAKE_PROGRAM_ID};
use unstake_core::state::{parse_clock_sysvar, parse_protocol_fee, STAKE_WITHDRAWER_OFFSET};
use unstake_core::{
    deposit, ensure_deactivatable, ensure_reclaimable, ensure_redeemable, load_stake_position,
    preview_unstake, withdraw, Clock, DepositRequest, FeeCurveConfig, LedgerOracle, PoolContext,
    PositionState, ProtocolFee, Rational, StakePosition, UnstakeQuote, WithdrawRequest,
};

// ─── RPC-backed ledger ────────────────────────────────────────────────────────

/// Read-only view of the cluster for the core.
struct RpcLedger {
    client: RpcClient,
}

impl RpcLedger {
    fn new(url: &str) -> Self {
        Self { client: RpcClient::new_with_commitment(url.to_string(), CommitmentConfig::confirmed()) }
    }
}

impl LedgerOracle for RpcLedger {
    fn account_data(&self, address: &Pubkey) -> unstake_core::Result<Option<Vec<u8>>> {
        debug!(%address, "getAccountInfo");
        self.client
            .get_account_with_commitment(address, self.client.commitment())
            .map(|r| r.value.map(|a| a.data))
            .map_err(|e| unstake_core::Error::Ledger(e.to_string()))
    }

    fn lamports(&self, address: &Pubkey) -> unstake_core::Result<u64> {
        self.client
            .get_balance(address)
            .map_err(|e| unstake_core::Error::Ledger(e.to_string()))
    }

    fn clock(&self) -> unstake_core::Result<Clock> {
        let id = sysvar::clock::id();
        let data = self.account_data(&id)?.ok_or(unstake_core::Error::AccountNotFound(id))?;
        parse_clock_sysvar(&data)
    }
}

// ─── Version banner ───────────────────────────────────────────────────────────

fn print_banner() {
    let ver = env!("CARGO_PKG_VERSION");
    println!();
    println!("  unstake  v{ver}  ·  instant-unstake pool inspector");
    println!("  {}", "─".repeat(62));
    println!("  Program   {UNSTAKE_PROGRAM_ID}");
    println!("  Mode      read-only (nothing is signed or sent)");
    println!();
}

// ─── CLI definition ───────────────────────────────────────────────────────────

/// unstake: inspect instant-unstake pools and preview fees.
///
/// Every command supports --json for machine-readable output.
/// Reads either a live cluster over JSON-RPC or an offline snapshot
/// written by `dump-snapshot`.
#[derive(Parser)]
#[command(
    name        = "unstake",
    version     = env!("CARGO_PKG_VERSION"),
    about       = "Inspect instant-unstake liquidity pools and preview unstake, deposit and withdraw outcomes.",
    after_help  = "\
ENVIRONMENT:
  UNSTAKE_RPC_URL                  Solana JSON-RPC endpoint  [default: https://api.mainnet-beta.solana.com]
  UNSTAKE_PROGRAM_ID               Unstake program id  [default: unpXTU2Ndrc7WWNyEhQWe4udTzSibLPi25SXv2xbCHQ]
  UNSTAKE_POOL                     Pool account address
  UNSTAKE_OWNED_LAMPORTS_OVERHEAD  Lamports of reserves never lent out  [default: 0]
  RUST_LOG                         Log filter for stderr output  [default: warn]

QUICK START:
  unstake view-pool       --pool <POOL>
  unstake quote           --pool <POOL> --lamports 1000000000
  unstake quote           --pool <POOL> --lamports 990000000 --reverse
  unstake preview-unstake --pool <POOL> --stake <STAKE_ACCOUNT>
  unstake dump-snapshot   --pool <POOL> --out pool.json
  unstake view-pool       --snapshot pool.json"
)]
struct Cli {
    /// Solana JSON-RPC endpoint
    #[arg(
        long,
        global        = true,
        value_name    = "URL",
        default_value = "https://api.mainnet-beta.solana.com",
        env           = "UNSTAKE_RPC_URL"
    )]
    rpc_url: String,

    /// Unstake program id
    #[arg(long, global = true, value_name = "PUBKEY", env = "UNSTAKE_PROGRAM_ID")]
    program_id: Option<String>,

    /// Pool account address
    #[arg(long, global = true, value_name = "PUBKEY", env = "UNSTAKE_POOL")]
    pool: Option<String>,

    /// Read the pool from a JSON snapshot instead of RPC
    #[arg(long, global = true, value_name = "PATH")]
    snapshot: Option<String>,

    /// Lamports of the reserves balance excluded from pricing
    #[arg(
        long,
        global        = true,
        value_name    = "LAMPORTS",
        default_value_t = 0,
        env           = "UNSTAKE_OWNED_LAMPORTS_OVERHEAD"
    )]
    owned_lamports_overhead: u64,

    /// Output machine-readable JSON instead of human-readable text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pool balances, fee configuration and flash loan status
    ViewPool,

    /// Fee breakdown for unstaking an amount of stake
    ///
    /// With --reverse, LAMPORTS is the payout the unstaker wants and the
    /// command finds the smallest stake that delivers it.
    #[command(after_help = "\
EXAMPLES:
  # Fee for selling 10 SOL of stake
  unstake quote --pool <POOL> --lamports 10000000000

  # Stake needed to receive 9.9 SOL
  unstake quote --pool <POOL> --lamports 9900000000 --reverse")]
    Quote {
        #[arg(long, value_name = "LAMPORTS")]
        lamports: u64,

        #[arg(long, default_value_t = false)]
        reverse: bool,

        /// Price as if a referrer takes part of the protocol fee
        #[arg(long, default_value_t = false)]
        with_referrer: bool,
    },

    /// Check a stake account's lifecycle and preview selling it to the pool
    PreviewUnstake {
        #[arg(long, value_name = "PUBKEY")]
        stake: String,

        #[arg(long, default_value_t = false)]
        with_referrer: bool,
    },

    /// LP tokens minted for a deposit
    PreviewDeposit {
        #[arg(long, value_name = "LAMPORTS")]
        lamports: u64,
    },

    /// Lamports returned for burning LP tokens
    PreviewWithdraw {
        #[arg(long, value_name = "LP_TOKENS")]
        lp_tokens: u64,
    },

    /// List stake accounts held by the pool and the crank action each needs
    PoolStakes,

    /// Show the global protocol fee
    ProtocolFee,

    /// Write the pool and its stake accounts to a JSON snapshot
    DumpSnapshot {
        /// Output path; stdout when omitted
        #[arg(long, value_name = "PATH")]
        out: Option<String>,
    },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // When invoked with no arguments, show banner + full help and exit cleanly.
    if std::env::args().len() == 1 {
        print_banner();
        Cli::command().print_long_help().ok();
        println!();
        return Ok(());
    }

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = FeeCurveConfig { owned_lamports_overhead: cli.owned_lamports_overhead };

    match &cli.command {
        Commands::ViewPool => cmd_view_pool(&cli, &config)?,
        Commands::Quote { lamports, reverse, with_referrer } => {
            cmd_quote(&cli, &config, *lamports, *reverse, *with_referrer)?;
        }
        Commands::PreviewUnstake { stake, with_referrer } => {
            cmd_preview_unstake(&cli, &config, stake, *with_referrer)?;
        }
        Commands::PreviewDeposit { lamports } => cmd_preview_deposit(&cli, *lamports)?,
        Commands::PreviewWithdraw { lp_tokens } => cmd_preview_withdraw(&cli, *lp_tokens)?,
        Commands::PoolStakes => cmd_pool_stakes(&cli)?,
        Commands::ProtocolFee => cmd_protocol_fee(&cli)?,
        Commands::DumpSnapshot { out } => cmd_dump_snapshot(&cli, out.as_deref())?,
    }

    Ok(())
}

// ─── view-pool ────────────────────────────────────────────────────────────────

fn cmd_view_pool(cli: &Cli, config: &FeeCurveConfig) -> Result<()> {
    let ctx = load_context(cli)?;
    let balance = ctx.state.balance()?;
    let owned = balance.owned(config)?;
    let available = balance.available(config);

    if cli.json {
        println!("{}", json!({
            "status":          "ok",
            "command":         "view-pool",
            "pool":            ctx.state.address.to_string(),
            "reserves":        ctx.state.reserves.to_string(),
            "fee_authority":   ctx.state.pool.fee_authority.to_string(),
            "lp_mint":         ctx.state.pool.lp_mint.to_string(),
            "lp_supply":       ctx.state.lp_supply,
            "incoming_stake":  ctx.state.pool.incoming_stake,
            "liquid_reserves": ctx.state.liquid_reserves,
            "owned_lamports":  owned,
            "available":       available,
            "fee":             serde_json::to_value(ctx.fee)?,
            "flash_loan_fee":  ctx.flash_loan_fee.map(|f| f.fee_ratio.to_string()),
            "epoch":           ctx.clock.epoch,
        }));
    } else {
        println!("─── Pool {} ───────────────────────────", ctx.state.address);
        println!("  Reserves         {}", ctx.state.reserves);
        println!("  Fee authority    {}", ctx.state.pool.fee_authority);
        println!("  LP mint          {}", ctx.state.pool.lp_mint);
        println!();
        println!("  LP supply        {:>20}", ctx.state.lp_supply);
        println!("  Incoming stake   {:>20}", ctx.state.pool.incoming_stake);
        println!("  Liquid reserves  {:>20}", ctx.state.liquid_reserves);
        println!("  Owned lamports   {:>20}", owned);
        println!("  Available        {:>20}", available);
        println!();
        println!("  Fee              {}", describe_fee(&ctx));
        match ctx.flash_loan_fee {
            Some(f) => println!("  Flash loans      enabled  ({} = {})", f.fee_ratio, pct(&f.fee_ratio)),
            None    => println!("  Flash loans      disabled"),
        }
        println!("  Epoch            {}", ctx.clock.epoch);
    }
    Ok(())
}

// ─── quote ────────────────────────────────────────────────────────────────────

fn cmd_quote(cli: &Cli, config: &FeeCurveConfig, lamports: u64, reverse: bool, with_referrer: bool) -> Result<()> {
    let ctx = load_context(cli)?;
    let stake_lamports = if reverse {
        ctx.fee
            .reverse_quote(ctx.state.balance()?, lamports, config)
            .with_context(|| format!("No stake size pays out {lamports} lamports from this pool"))?
    } else {
        lamports
    };
    let quote = preview_unstake(&ctx, stake_lamports, with_referrer, config)?;
    info!(stake_lamports, fee = quote.fee_lamports, "quote");

    if cli.json {
        println!("{}", json!({
            "status":  "ok",
            "command": "quote",
            "pool":    ctx.state.address.to_string(),
            "reverse": reverse,
            "quote":   quote_json(&quote),
        }));
    } else {
        println!("─── Quote ───────────────────────────────────────────────────────────");
        print_quote(&quote);
    }
    Ok(())
}

// ─── preview-unstake ──────────────────────────────────────────────────────────

fn cmd_preview_unstake(cli: &Cli, config: &FeeCurveConfig, stake: &str, with_referrer: bool) -> Result<()> {
    if cli.snapshot.is_some() {
        bail!("preview-unstake reads the stake account over RPC; drop --snapshot.");
    }
    let stake = parse_pubkey(stake, "--stake")?;
    let ledger = RpcLedger::new(&cli.rpc_url);
    let ctx = load_context_from(cli, &ledger)?;
    let position = load_stake_position(&ledger, &stake)
        .with_context(|| format!("Cannot read stake account {stake}"))?;

    let state = position.state(ctx.clock.epoch);
    let redeemable = ensure_redeemable(&position, &ctx.clock);
    let quote = preview_unstake(&ctx, position.lamports, with_referrer, config);

    if cli.json {
        println!("{}", json!({
            "status":     "ok",
            "command":    "preview-unstake",
            "stake":      stake.to_string(),
            "lamports":   position.lamports,
            "state":      state,
            "redeemable": redeemable.is_ok(),
            "reason":     redeemable.as_ref().err().map(ToString::to_string),
            "quote":      quote.as_ref().ok().map(quote_json),
            "quote_error": quote.as_ref().err().map(ToString::to_string),
        }));
    } else {
        println!("─── Preview Unstake ─────────────────────────────────────────────────");
        println!("  Stake account    {stake}");
        println!("  Lamports         {:>20}", position.lamports);
        println!("  State            {}", state.as_str());
        match &redeemable {
            Ok(())  => println!("  Redeemable       yes"),
            Err(e)  => println!("  Redeemable       no  ({e})"),
        }
        println!();
        match &quote {
            Ok(q)  => print_quote(q),
            Err(e) => println!("  Quote            unavailable  ({e})"),
        }
    }
    Ok(())
}

// ─── preview-deposit / preview-withdraw ───────────────────────────────────────

fn cmd_preview_deposit(cli: &Cli, lamports: u64) -> Result<()> {
    let ctx = load_context(cli)?;
    let applied = deposit(&ctx.state, &DepositRequest {
        depositor:        Pubkey::default(),
        lp_token_account: Pubkey::default(),
        lp_mint:          ctx.state.pool.lp_mint,
        lamports,
    })?;

    if cli.json {
        println!("{}", json!({
            "status":        "ok",
            "command":       "preview-deposit",
            "lamports":      lamports,
            "lp_tokens":     applied.value,
            "lp_supply_after": applied.state.lp_supply,
        }));
    } else {
        println!("─── Preview Deposit ─────────────────────────────────────────────────");
        println!("  Deposit          {:>20} lamports", lamports);
        println!("  LP tokens        {:>20}", applied.value);
        println!("  LP supply after  {:>20}", applied.state.lp_supply);
    }
    Ok(())
}

fn cmd_preview_withdraw(cli: &Cli, lp_tokens: u64) -> Result<()> {
    let ctx = load_context(cli)?;
    let applied = withdraw(&ctx.state, &WithdrawRequest {
        owner:            Pubkey::default(),
        lp_token_account: Pubkey::default(),
        lp_mint:          ctx.state.pool.lp_mint,
        to:               Pubkey::default(),
        lp_tokens,
    })?;

    if cli.json {
        println!("{}", json!({
            "status":    "ok",
            "command":   "preview-withdraw",
            "lp_tokens": lp_tokens,
            "lamports":  applied.value,
        }));
    } else {
        println!("─── Preview Withdraw ────────────────────────────────────────────────");
        println!("  Burn             {:>20} LP tokens", lp_tokens);
        println!("  Receive          {:>20} lamports", applied.value);
    }
    Ok(())
}

// ─── pool-stakes ──────────────────────────────────────────────────────────────

fn cmd_pool_stakes(cli: &Cli) -> Result<()> {
    let ctx = load_context_with_positions(cli)?;

    let rows: Vec<_> = ctx
        .positions
        .iter()
        .map(|p| {
            let state = p.stake.state(ctx.clock.epoch);
            let action = next_action(&p.stake, &ctx.state.reserves, &ctx.clock);
            (p, state, action)
        })
        .collect();

    if cli.json {
        let items: Vec<_> = rows.iter().map(|(p, state, action)| json!({
            "stake":                p.stake.address.to_string(),
            "lamports":             p.stake.lamports,
            "lamports_at_creation": p.record.lamports_at_creation,
            "state":                state,
            "next_action":          action,
        })).collect();
        println!("{}", json!({
            "status":  "ok",
            "command": "pool-stakes",
            "pool":    ctx.state.address.to_string(),
            "epoch":   ctx.clock.epoch,
            "stakes":  items,
        }));
        return Ok(());
    }

    println!("─── Pool Stakes ─────────────────────────────────────────────────────");
    println!("  Pool    {}", ctx.state.address);
    println!("  Epoch   {}", ctx.clock.epoch);
    println!();
    if rows.is_empty() {
        println!("  No stake accounts held by this pool.");
        return Ok(());
    }
    for (i, (p, state, action)) in rows.iter().enumerate() {
        println!("  [{i:>2}]  Stake      {}", p.stake.address);
        println!("        Lamports   {:>20}", p.stake.lamports);
        println!("        At intake  {:>20}", p.record.lamports_at_creation);
        println!("        State      {}", state.as_str());
        println!("        Next       {action}");
        println!();
    }
    println!("  Total: {} stake account(s)", rows.len());
    Ok(())
}

/// Crank step a pool-held stake account is waiting for.
fn next_action(stake: &StakePosition, reserves: &Pubkey, clock: &Clock) -> &'static str {
    if ensure_reclaimable(stake, reserves, clock).is_ok() {
        "reclaim"
    } else if ensure_deactivatable(stake, reserves, clock).is_ok() {
        "deactivate"
    } else if stake.state(clock.epoch) == PositionState::Deactivating {
        "wait"
    } else {
        "none"
    }
}

// ─── protocol-fee ─────────────────────────────────────────────────────────────

fn cmd_protocol_fee(cli: &Cli) -> Result<()> {
    let fee: ProtocolFee = if cli.snapshot.is_some() {
        load_context(cli)?.protocol_fee
    } else {
        let ledger = RpcLedger::new(&cli.rpc_url);
        let address = derive_protocol_fee(&program_id(cli)?).0;
        let data = ledger
            .account_data(&address)?
            .ok_or_else(|| anyhow!("Protocol fee account {address} not found — check --program-id"))?;
        parse_protocol_fee(&data)?
    };

    if cli.json {
        println!("{}", json!({
            "status":             "ok",
            "command":            "protocol-fee",
            "destination":        fee.destination.to_string(),
            "authority":          fee.authority.to_string(),
            "fee_ratio":          fee.fee_ratio.to_string(),
            "referrer_fee_ratio": fee.referrer_fee_ratio.to_string(),
        }));
    } else {
        println!("─── Protocol Fee ────────────────────────────────────────────────────");
        println!("  Destination      {}", fee.destination);
        println!("  Authority        {}", fee.authority);
        println!("  Fee ratio        {}  ({} of every unstake fee)", fee.fee_ratio, pct(&fee.fee_ratio));
        println!("  Referrer share   {}  ({} of the protocol cut)", fee.referrer_fee_ratio, pct(&fee.referrer_fee_ratio));
    }
    Ok(())
}

// ─── dump-snapshot ────────────────────────────────────────────────────────────

fn cmd_dump_snapshot(cli: &Cli, out: Option<&str>) -> Result<()> {
    let ctx = load_context_with_positions(cli)?;
    let body = serde_json::to_string_pretty(&ctx)?;
    match out {
        Some(path) => {
            std::fs::write(path, body).with_context(|| format!("Cannot write snapshot to '{path}'"))?;
            if cli.json {
                println!("{}", json!({
                    "status": "ok", "command": "dump-snapshot",
                    "path": path, "positions": ctx.positions.len(),
                }));
            } else {
                println!("  Snapshot of {} written to {path}  ({} stake account(s))",
                         ctx.state.address, ctx.positions.len());
            }
        }
        None => println!("{body}"),
    }
    Ok(())
}

// ─── Shared utilities ─────────────────────────────────────────────────────────

fn parse_pubkey(s: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| anyhow!("{what}: '{s}' is not a base-58 public key ({e})"))
}

fn program_id(cli: &Cli) -> Result<Pubkey> {
    match &cli.program_id {
        Some(s) => parse_pubkey(s, "--program-id"),
        None    => Ok(UNSTAKE_PROGRAM_ID),
    }
}

fn pool_address(cli: &Cli) -> Result<Pubkey> {
    let s = cli.pool.as_deref().ok_or_else(|| anyhow!(
        "No pool given.\n  Pass --pool <PUBKEY> (or set UNSTAKE_POOL), or read a saved pool with --snapshot <PATH>."
    ))?;
    parse_pubkey(s, "--pool")
}

/// Load the pool from `--snapshot` or over RPC.
fn load_context(cli: &Cli) -> Result<PoolContext> {
    if let Some(path) = &cli.snapshot {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read snapshot '{path}'"))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("Snapshot '{path}' is not a pool snapshot"));
    }
    load_context_from(cli, &RpcLedger::new(&cli.rpc_url))
}

fn load_context_from(cli: &Cli, ledger: &RpcLedger) -> Result<PoolContext> {
    let pool = pool_address(cli)?;
    PoolContext::load(ledger, &program_id(cli)?, &pool)
        .with_context(|| format!("Failed to load pool {pool} — check --pool, --program-id and your RPC endpoint"))
}

/// Like [`load_context`], with the pool's stake accounts attached.
fn load_context_with_positions(cli: &Cli) -> Result<PoolContext> {
    if cli.snapshot.is_some() {
        return load_context(cli);
    }
    let ledger = RpcLedger::new(&cli.rpc_url);
    let mut ctx = load_context_from(cli, &ledger)?;
    let stakes = fetch_reserve_stakes(&ledger, &ctx.state.reserves)?;
    ctx.load_positions(&ledger, &stakes)?;
    Ok(ctx)
}

/// Stake accounts whose withdraw authority is the pool's reserves.
fn fetch_reserve_stakes(ledger: &RpcLedger, reserves: &Pubkey) -> Result<Vec<Pubkey>> {
    let config = RpcProgramAccountsConfig {
        filters: Some(vec![RpcFilterType::Memcmp(Memcmp::new(
            STAKE_WITHDRAWER_OFFSET,
            MemcmpEncodedBytes::Bytes(reserves.to_bytes().to_vec()),
        ))]),
        account_config: RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            ..RpcAccountInfoConfig::default()
        },
        ..RpcProgramAccountsConfig::default()
    };
    let raw = ledger
        .client
        .get_program_accounts_with_config(&STAKE_PROGRAM_ID, config)
        .context("Failed to query stake accounts — check your RPC endpoint")?;
    debug!(%reserves, count = raw.len(), "stake accounts held by reserves");
    Ok(raw.into_iter().map(|(pk, _)| pk).collect())
}

fn pct(r: &Rational) -> String {
    if r.denom == 0 {
        return "n/a".to_string();
    }
    format!("{:.4}%", r.num as f64 / r.denom as f64 * 100.0)
}

fn describe_fee(ctx: &PoolContext) -> String {
    match &ctx.fee {
        unstake_core::Fee::Flat { ratio } => format!("flat {}", pct(ratio)),
        unstake_core::Fee::LiquidityLinear { params } => format!(
            "liquidity-linear  {} (full reserves) → {} (empty reserves)",
            pct(&params.max_liq_remaining),
            pct(&params.zero_liq_remaining),
        ),
    }
}

fn quote_json(q: &UnstakeQuote) -> serde_json::Value {
    json!({
        "stake_lamports":       q.stake_lamports,
        "fee_lamports":         q.fee_lamports,
        "protocol_lamports":    q.split.protocol_lamports,
        "referrer_lamports":    q.split.referrer_lamports,
        "pool_lamports":        q.split.pool_lamports,
        "lamports_to_unstaker": q.lamports_to_unstaker,
    })
}

fn print_quote(q: &UnstakeQuote) {
    println!("  Stake            {:>20} lamports", q.stake_lamports);
    println!("  Fee              {:>20}", q.fee_lamports);
    println!("    to protocol    {:>20}", q.split.protocol_lamports);
    println!("    to referrer    {:>20}", q.split.referrer_lamports);
    println!("    to pool        {:>20}", q.split.pool_lamports);
    println!("  You receive      {:>20} lamports", q.lamports_to_unstaker);
}
