use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use smartwallet_aa::config::{load_account_config, DEFAULT_RPC_URL};
use smartwallet_aa::encoding::{fmt_address, fmt_bytes, fmt_h256, parse_address, parse_bytes};
use smartwallet_aa::{
    AccountConfig, EntryPointVersion, HttpConnector, SessionKeyGrant, SmartAccount,
    TransactionInput,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StdoutMode {
    Normal,
    Json,
    SmartAccountAddress,
}

// In machine stdout modes stdout carries a single line or JSON object; all
// human-readable output goes to stderr instead.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "smartwallet-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the smart account address and deployment status.
    Account(AccountArgs),

    /// Send one transaction from the smart account.
    Send(SendArgs),

    /// Deploy the smart account with a no-op self call.
    Deploy(AccountArgs),

    /// Sign a message with the smart account (EIP-191, ERC-1271 verified).
    Sign(SignArgs),

    /// Grant admin rights on the account to another signer.
    AddAdmin(SignerArgs),

    /// Revoke admin rights from a signer.
    RemoveAdmin(SignerArgs),

    /// Grant a scoped session key.
    SessionKey(SessionKeyArgs),

    /// Revoke a session key (safe to repeat).
    RevokeSessionKey(SignerArgs),

    /// List admins and active session keys.
    Admins(AccountArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Account config JSON (camelCase `AccountConfig` fields).
    #[arg(long, env = "SMARTWALLET_AA_CONFIG")]
    config: Option<PathBuf>,

    /// Chain id. Required without --config, overrides it otherwise.
    #[arg(long, env = "SMARTWALLET_AA_CHAIN_ID")]
    chain_id: Option<u64>,

    /// EntryPoint release (0.6 or 0.7) when no --config is given.
    #[arg(long, default_value = "0.7")]
    entry_point_version: EntryPointVersion,

    /// Chain RPC URL template; `{chain_id}` is substituted.
    #[arg(long, env = "SMARTWALLET_AA_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Bundler URL template (overrides the config file).
    #[arg(long, env = "SMARTWALLET_AA_BUNDLER_URL")]
    bundler_url: Option<String>,

    /// Paymaster URL template (overrides the config file).
    #[arg(long, env = "SMARTWALLET_AA_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Use an already known account address instead of asking the factory.
    #[arg(long)]
    account_address: Option<String>,

    /// Pay gas from the account instead of asking the paymaster.
    #[arg(long, default_value_t = false)]
    no_gasless: bool,

    /// Owner private key.
    ///
    /// Recommended: set via env var SMARTWALLET_AA_OWNER_PRIVATE_KEY.
    #[arg(long, env = "SMARTWALLET_AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Print a single JSON object to stdout; all other output goes to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print ONLY the smart account address to stdout as a single line.
    #[arg(long, default_value_t = false)]
    print_smart_account: bool,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Value in wei (decimal).
    #[arg(long, default_value = "0")]
    value: String,

    /// Calldata (0x-prefixed hex).
    #[arg(long, default_value = "0x")]
    data: String,

    /// Gas limit; estimated when omitted.
    #[arg(long)]
    gas: Option<u64>,
}

#[derive(Args, Debug)]
struct SignArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// UTF-8 message to sign.
    #[arg(long)]
    message: String,
}

#[derive(Args, Debug)]
struct SignerArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Signer address the change applies to.
    #[arg(long)]
    signer: String,
}

#[derive(Args, Debug)]
struct SessionKeyArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Session key address.
    #[arg(long)]
    signer: String,

    /// Contract the key may call (repeatable).
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Native token limit per transaction, in wei (decimal).
    #[arg(long, default_value = "0")]
    native_limit: String,

    /// Permission start (unix seconds).
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Permission end (unix seconds).
    #[arg(long)]
    end: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs always go to stderr so stdout stays script-friendly.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Send(args) => cmd_send(args).await,
        Command::Deploy(args) => cmd_deploy(args).await,
        Command::Sign(args) => cmd_sign(args).await,
        Command::AddAdmin(args) => cmd_admin(args, true).await,
        Command::RemoveAdmin(args) => cmd_admin(args, false).await,
        Command::SessionKey(args) => cmd_session_key(args).await,
        Command::RevokeSessionKey(args) => cmd_revoke_session_key(args).await,
        Command::Admins(args) => cmd_admins(args).await,
    }
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let machine_mode = mode != StdoutMode::Normal;
    let account = connect_account(&args.common).await?;
    let deployed = account.is_deployed().await?;

    match mode {
        StdoutMode::Json => {
            let out = serde_json::json!({
                "chainId": account.chain_id(),
                "owner": fmt_address(account.owner_address()),
                "smartAccount": fmt_address(account.address()),
                "isDeployed": deployed,
            });
            println!("{}", out);
        }
        StdoutMode::SmartAccountAddress => println!("{}", fmt_address(account.address())),
        StdoutMode::Normal => {}
    }

    let config = account.config();
    outln!(machine_mode, "chainId:        {}", account.chain_id());
    if !config.is_alternate_chain() {
        outln!(machine_mode, "entryPoint:     {} (v{})", fmt_address(config.entry_point()), config.entry_point_version);
        outln!(machine_mode, "factory:        {}", fmt_address(config.factory));
    }
    outln!(machine_mode, "owner:          {}", fmt_address(account.owner_address()));
    outln!(machine_mode, "smartAccount:   {}", fmt_address(account.address()));
    outln!(machine_mode, "isDeployed:     {}", deployed);

    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let account = connect_account(&args.common).await?;

    let to = parse_address(&args.to).context("invalid --to address")?;
    let value = U256::from_dec_str(&args.value).context("invalid --value")?;
    let data = parse_bytes(&args.data).context("invalid --data")?;

    let mut tx = TransactionInput::new(account.chain_id())
        .to(to)
        .value(value)
        .data(data);
    if let Some(gas) = args.gas {
        tx = tx.gas(U256::from(gas));
    }

    let tx_hash = with_interrupt(&account, account.send_transaction(&tx)).await?;
    report_tx(mode, &account, "send", tx_hash);
    Ok(())
}

async fn cmd_deploy(args: AccountArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let machine_mode = mode != StdoutMode::Normal;
    let account = connect_account(&args.common).await?;

    if account.is_deployed().await? {
        outln!(machine_mode, "already deployed: {}", fmt_address(account.address()));
    } else {
        with_interrupt(&account, account.force_deploy()).await?;
        outln!(machine_mode, "deployed:       {}", fmt_address(account.address()));
    }

    if mode == StdoutMode::Json {
        println!(
            "{}",
            serde_json::json!({
                "smartAccount": fmt_address(account.address()),
                "isDeployed": true,
            })
        );
    }
    Ok(())
}

async fn cmd_sign(args: SignArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let machine_mode = mode != StdoutMode::Normal;
    let account = connect_account(&args.common).await?;

    let signature = with_interrupt(&account, account.personal_sign(args.message.as_bytes())).await?;

    if mode == StdoutMode::Json {
        println!(
            "{}",
            serde_json::json!({
                "smartAccount": fmt_address(account.address()),
                "message": args.message,
                "signature": fmt_bytes(&signature),
            })
        );
    }
    outln!(machine_mode, "smartAccount:   {}", fmt_address(account.address()));
    outln!(machine_mode, "signature:      {}", fmt_bytes(&signature));
    Ok(())
}

async fn cmd_admin(args: SignerArgs, grant: bool) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let account = connect_account(&args.common).await?;
    let signer = parse_address(&args.signer).context("invalid --signer address")?;

    let tx_hash = if grant {
        with_interrupt(&account, account.add_admin(signer)).await?
    } else {
        with_interrupt(&account, account.remove_admin(signer)).await?
    };
    report_tx(mode, &account, if grant { "add-admin" } else { "remove-admin" }, tx_hash);
    Ok(())
}

async fn cmd_session_key(args: SessionKeyArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let account = connect_account(&args.common).await?;

    let signer = parse_address(&args.signer).context("invalid --signer address")?;
    let approved_targets = args
        .targets
        .iter()
        .map(|t| parse_address(t).with_context(|| format!("invalid --target {t}")))
        .collect::<Result<Vec<Address>>>()?;
    if args.end <= args.start {
        return Err(anyhow!("--end must be after --start"));
    }
    let grant = SessionKeyGrant {
        approved_targets,
        native_token_limit_per_transaction: U256::from_dec_str(&args.native_limit)
            .context("invalid --native-limit")?,
        permission_start_timestamp: u128::from(args.start),
        permission_end_timestamp: u128::from(args.end),
    };

    let tx_hash = with_interrupt(&account, account.create_session_key(signer, &grant)).await?;
    report_tx(mode, &account, "session-key", tx_hash);
    Ok(())
}

async fn cmd_revoke_session_key(args: SignerArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let account = connect_account(&args.common).await?;
    let signer = parse_address(&args.signer).context("invalid --signer address")?;

    let tx_hash = with_interrupt(&account, account.revoke_session_key(signer)).await?;
    report_tx(mode, &account, "revoke-session-key", tx_hash);
    Ok(())
}

async fn cmd_admins(args: AccountArgs) -> Result<()> {
    let mode = stdout_mode(&args.common)?;
    let machine_mode = mode != StdoutMode::Normal;
    let account = connect_account(&args.common).await?;

    let (admins, signers) = futures::try_join!(
        account.get_all_admins(),
        account.get_all_active_signers()
    )?;

    if mode == StdoutMode::Json {
        let signers_json: Vec<_> = signers
            .iter()
            .map(|s| {
                serde_json::json!({
                    "signer": fmt_address(s.signer),
                    "approvedTargets": s.approved_targets.iter().copied().map(fmt_address).collect::<Vec<_>>(),
                    "nativeTokenLimitPerTransaction": s.native_token_limit_per_transaction.to_string(),
                    "startTimestamp": s.start_timestamp.to_string(),
                    "endTimestamp": s.end_timestamp.to_string(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "smartAccount": fmt_address(account.address()),
                "admins": admins.iter().copied().map(fmt_address).collect::<Vec<_>>(),
                "activeSigners": signers_json,
            })
        );
    }

    outln!(machine_mode, "smartAccount:   {}", fmt_address(account.address()));
    outln!(machine_mode, "admins:         {}", admins.len());
    for admin in &admins {
        outln!(machine_mode, "  {}", fmt_address(*admin));
    }
    outln!(machine_mode, "sessionKeys:    {}", signers.len());
    for s in &signers {
        outln!(
            machine_mode,
            "  {} targets={} limit={} window={}..{}",
            fmt_address(s.signer),
            s.approved_targets.len(),
            s.native_token_limit_per_transaction,
            s.start_timestamp,
            s.end_timestamp
        );
    }
    Ok(())
}

fn stdout_mode(common: &CommonArgs) -> Result<StdoutMode> {
    if common.json && common.print_smart_account {
        return Err(anyhow!("--json and --print-smart-account are mutually exclusive"));
    }
    if common.json {
        return Ok(StdoutMode::Json);
    }
    if common.print_smart_account {
        return Ok(StdoutMode::SmartAccountAddress);
    }
    Ok(StdoutMode::Normal)
}

fn report_tx(mode: StdoutMode, account: &SmartAccount, action: &str, tx_hash: H256) {
    let machine_mode = mode != StdoutMode::Normal;
    match mode {
        StdoutMode::Json => println!(
            "{}",
            serde_json::json!({
                "action": action,
                "smartAccount": fmt_address(account.address()),
                "txHash": fmt_h256(tx_hash),
            })
        ),
        StdoutMode::SmartAccountAddress => println!("{}", fmt_address(account.address())),
        StdoutMode::Normal => {}
    }
    outln!(machine_mode, "smartAccount:   {}", fmt_address(account.address()));
    outln!(machine_mode, "txHash:         {}", fmt_h256(tx_hash));
}

/// Runs `fut`, canceling the account's pending receipt waits on Ctrl-C.
async fn with_interrupt<T>(
    account: &SmartAccount,
    fut: impl std::future::Future<Output = smartwallet_aa::Result<T>>,
) -> Result<T> {
    let cancel = account.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; canceling");
            cancel.cancel();
        }
    });
    let result = fut.await;
    watcher.abort();
    result.map_err(anyhow::Error::from)
}

fn account_config(common: &CommonArgs) -> Result<AccountConfig> {
    let mut config = match common.config.as_deref() {
        Some(path) => load_account_config(path, common.chain_id)?,
        None => {
            let chain_id = common
                .chain_id
                .ok_or_else(|| anyhow!("missing --chain-id (or SMARTWALLET_AA_CHAIN_ID), or pass --config"))?;
            AccountConfig::new(chain_id, common.entry_point_version)
        }
    };

    if let Some(url) = common.bundler_url.clone() {
        config = config.with_bundler_url(url);
    }
    if let Some(url) = common.paymaster_url.clone() {
        config = config.with_paymaster_url(url);
    }
    if let Some(a) = common.account_address.as_deref() {
        config = config.with_address_override(parse_address(a).context("invalid --account-address")?);
    }
    if common.no_gasless {
        config = config.with_gasless(false);
    }
    config.validate().map_err(|e| anyhow!("{e}"))?;
    Ok(config)
}

fn load_owner(common: &CommonArgs, chain_id: u64) -> Result<LocalWallet> {
    let owner_pk = common.owner_private_key.as_deref().ok_or_else(|| {
        anyhow!("missing SMARTWALLET_AA_OWNER_PRIVATE_KEY (or --owner-private-key)")
    })?;
    let wallet = LocalWallet::from_str(owner_pk).context("invalid owner private key")?;
    Ok(wallet.with_chain_id(chain_id))
}

async fn connect_account(common: &CommonArgs) -> Result<SmartAccount> {
    let config = account_config(common)?;
    let owner = load_owner(common, config.chain_id)?;
    tracing::debug!(owner = %fmt_address(Signer::address(&owner)), chain_id = config.chain_id, "connecting smart account");

    let connector = Arc::new(HttpConnector::new(common.rpc_url.clone()));
    SmartAccount::connect(Arc::new(owner), config, connector)
        .await
        .context("failed to connect smart account")
}
