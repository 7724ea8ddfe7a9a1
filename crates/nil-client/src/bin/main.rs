//! nil-fetch: retrieve a file range from NilStore
//!
//! Run with:
//! ```bash
//! cargo run -p nil-client --bin nil-fetch -- \
//!     --manifest-root 0x... --deal-id 1 --owner nil1... --file-path video.mp4 --out video.mp4
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use nil_chain::{EvmLedger, Ledger, LedgerConfig, LocalIntentSigner};
use nil_client::{FetchRequest, NilHttpClient, ProviderDirectory, RetrievalSession};
use nil_core::{RetrievalConfig, RoutePreference};

#[derive(Parser, Debug)]
#[command(name = "nil-fetch")]
#[command(about = "Retrieve a file range from NilStore")]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gateway base URL
    #[arg(long)]
    gateway: Option<String>,

    /// Provider base URL tried after the gateway for list, plan and fast fetches
    #[arg(long)]
    direct_sp: Option<String>,

    /// Chain LCD base URL; enables direct-SP and overlay candidates
    #[arg(long)]
    lcd: Option<String>,

    /// EVM JSON-RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    #[arg(long)]
    chain_id: Option<u64>,

    #[arg(long)]
    manifest_root: String,

    #[arg(long)]
    deal_id: u64,

    /// Deal owner address
    #[arg(long)]
    owner: String,

    /// File inside the deal; omit with --list
    #[arg(long, required_unless_present = "list")]
    file_path: Option<String>,

    #[arg(long, default_value = "0")]
    range_start: u64,

    /// Bytes to read; defaults to EOF
    #[arg(long)]
    range_len: Option<u64>,

    /// Open on-chain sessions and submit proofs
    #[arg(long)]
    metered: bool,

    /// auto | prefer_gateway | prefer_direct_sp | prefer_p2p
    #[arg(long)]
    preference: Option<RoutePreference>,

    /// Owner key used to sign retrieval requests
    #[arg(long, env = "NIL_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Account the RPC node sends session transactions from
    #[arg(long, env = "NIL_FROM")]
    from: Option<String>,

    /// Output file; stdout summary only when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    /// List the deal's files and exit
    #[arg(long)]
    list: bool,

    /// Print decision traces as JSON
    #[arg(long)]
    traces: bool,
}

fn load_config(args: &Args) -> anyhow::Result<RetrievalConfig> {
    let mut config = match &args.config {
        Some(path) => RetrievalConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RetrievalConfig::default(),
    };
    if let Some(gateway) = &args.gateway {
        config.gateway_base = gateway.trim_end_matches('/').to_string();
    }
    if let Some(direct_sp) = &args.direct_sp {
        config = config.with_direct_sp(direct_sp.as_str());
    }
    if let Some(lcd) = &args.lcd {
        config = config.with_lcd(lcd.as_str());
    }
    if let Some(rpc_url) = &args.rpc_url {
        config.evm_rpc_url = rpc_url.clone();
    }
    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }
    if let Some(preference) = args.preference {
        config = config.with_preference(preference);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nil_client=info".parse()?))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let http = NilHttpClient::with_connect_timeout(config.control_timeout())?;

    if args.list {
        let files = http
            .list_files(&config.gateway_base, &args.manifest_root, args.deal_id, &args.owner)
            .await?;
        for file in &files {
            println!("{:>12}  {}", file.size_bytes, file.path);
        }
        println!("[OK] {} files", files.len());
        return Ok(());
    }

    let file_path = args.file_path.clone().context("--file-path is required")?;
    let key = args
        .private_key
        .as_deref()
        .context("a signing key is required (--private-key or NIL_PRIVATE_KEY)")?;
    let signer = LocalIntentSigner::from_hex(key, config.chain_id)?;

    let ledger = EvmLedger::connect(LedgerConfig::from_retrieval_config(&config, args.from.clone())).await?;
    if args.metered {
        let height = ledger.block_number().await?;
        tracing::info!(height, rpc = %config.evm_rpc_url, "Connected to ledger");
    }

    let directory = args.lcd.as_ref().map(|_| {
        ProviderDirectory::new(reqwest::Client::new(), config.lcd_base.clone(), config.endpoint_cache_ttl())
    });

    let mut session = RetrievalSession::new(config, ledger, signer)?.with_http(http);
    if let Some(directory) = directory {
        session = session.with_directory(directory);
    }

    let mut progress = session.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last_phase = None;
        while progress.changed().await.is_ok() {
            let p = progress.borrow().clone();
            if last_phase != Some(p.phase) {
                tracing::info!(phase = %p.phase, "Phase");
                last_phase = Some(p.phase);
            }
            if let Some(message) = &p.message {
                tracing::info!("{}", message);
            }
        }
    });

    let mut req = FetchRequest::new(&args.manifest_root, args.deal_id, &args.owner, file_path);
    req.range_start = args.range_start;
    req.range_len = args.range_len;
    req.metered = args.metered;

    let result = session.fetch_file(&req).await;
    drop(session);
    let _ = tokio::time::timeout(Duration::from_secs(1), watcher).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(trace) = err.trace() {
                eprintln!("{}", serde_json::to_string_pretty(trace)?);
            }
            return Err(err.into());
        }
    };

    if args.traces {
        println!("{}", serde_json::to_string_pretty(&outcome.traces)?);
    }
    if let Some(out) = &args.out {
        std::fs::write(out, &outcome.bytes).with_context(|| format!("writing {}", out.display()))?;
    }

    println!(
        "[OK] {} bytes via {:?} from {}",
        outcome.bytes.len(),
        outcome.mode,
        outcome.providers.join(", ")
    );
    for session_id in &outcome.session_ids {
        println!("  session {}", session_id);
    }
    Ok(())
}
