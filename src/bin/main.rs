//! Beesign CLI - drive a signing batch through a remote session
//!
//!   beesign run <batch.json> --ws <url>   → sign every item, print hashes
//!   beesign check <batch.json>            → validate a batch file
//!
//! Only remote (WalletConnect-type) accounts sign from the command line;
//! local keyrings and hardware devices need a host app.
//!
//! Output format:
//!   --json     One JSON snapshot per line on stdout (default: human progress on stderr)

use beesign::logging::init_logging;
use beesign::{
    Batch, FailureKind, OrchestratorConfig, ProgressSnapshot, QueueError, RemoteSigner, SignResult, SignerKind, SignerSet,
    SigningTaskQueue, TaskError, TypedDataSigningStore, WsTransport,
};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::watch;

fn main() {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beesign {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("run") => cmd_run(&opts),
        Some("check") => cmd_check(&opts),
        Some(cmd) => Err(format!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && std::io::stdout().is_terminal();
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({ "error": e }), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    path: Option<String>,
    ws_url: Option<String>,
    config: Option<String>,
    retries: u32,
    json: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--ws" | "-w" => {
                    if i + 1 < args.len() {
                        opts.ws_url = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--config" | "-c" => {
                    if i + 1 < args.len() {
                        opts.config = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--retries" | "-r" => {
                    if i + 1 < args.len() {
                        opts.retries = args[i + 1].parse().unwrap_or(0);
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if !positional.is_empty() {
            opts.path = Some(positional.remove(0));
        }

        // Environment (lower priority than CLI args)
        if opts.ws_url.is_none() {
            opts.ws_url = env::var("BEESIGN_WS").ok().filter(|s| !s.is_empty());
        }
        if opts.config.is_none() {
            opts.config = env::var("BEESIGN_CONFIG").ok().filter(|s| !s.is_empty());
        }

        opts
    }
}

fn print_usage() {
    println!(
        r#"beesign - sequenced signing sessions

USAGE:
    beesign <command> <batch.json> [options]

COMMANDS:
    run <batch.json>        Sign and submit every item in order
    check <batch.json>      Validate a batch file

RUN OPTIONS:
    --ws, -w <url>          Remote signing session (env: BEESIGN_WS)
    --config, -c <file>     Orchestrator config JSON (env: BEESIGN_CONFIG)
    --retries, -r <n>       Retry non-rejection failures up to n times (default: 0)

OUTPUT OPTIONS:
    --json                  Progress snapshots as JSON lines on stdout
    --version, -V           Print version

BATCH FILE:
    {{
      "account": {{ "address": "0x...", "type": "WalletConnect" }},
      "transactions": [ {{ "chainId": 1, "from": "0x...", "nonce": "0x0", "gasPrice": "0x64" }} ],
      "typedData": [ {{ "from": "0x...", "version": "V4", "data": {{ ... }} }} ]
    }}

EXAMPLES:
    beesign check batch.json
    beesign run batch.json --ws wss://bridge.example/session --retries 2
    beesign run batch.json --json | jq .status
"#
    );
}

fn load_config(opts: &ParsedArgs) -> Result<OrchestratorConfig, String> {
    match &opts.config {
        Some(path) => OrchestratorConfig::from_file(path).map_err(|e| format!("{:#}", e)),
        None => Ok(OrchestratorConfig::default()),
    }
}

fn load_batch(opts: &ParsedArgs) -> Result<Batch, String> {
    let path = opts.path.as_ref().ok_or("<batch.json> is required")?;
    Batch::from_file(path).map_err(|e| format!("{:#}", e))
}

fn cmd_check(opts: &ParsedArgs) -> Result<Value, String> {
    let batch = load_batch(opts)?;
    let problems = batch.problems();
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }
    Ok(json!({
        "valid": true,
        "account": batch.account.address,
        "signer": batch.account.signer_kind().as_str(),
        "transactions": batch.transactions.len(),
        "typedData": batch.typed_data.len(),
    }))
}

fn cmd_run(opts: &ParsedArgs) -> Result<Value, String> {
    let config = load_config(opts)?;
    let batch = load_batch(opts)?;
    batch.validate().map_err(|e| format!("{:#}", e))?;
    if batch.account.signer_kind() != SignerKind::Remote {
        return Err(format!("{} accounts cannot sign from the CLI", batch.account.kind.as_str()));
    }
    let url = opts.ws_url.clone().ok_or("--ws <url> is required")?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async {
        let mut transport = WsTransport::new(url.clone());
        transport.connect().await.map_err(|e| format!("Failed to connect to {}: {}", url, e))?;
        let transport = Arc::new(transport);

        let signers = SignerSet::new().with(Arc::new(RemoteSigner::new(transport).with_timeout(config.remote_timeout())));
        let queue = SigningTaskQueue::new(signers.clone()).with_config(&config);
        let store = TypedDataSigningStore::new(signers).with_config(&config);

        let mut output = json!({ "account": batch.account.address });

        if !batch.transactions.is_empty() {
            queue.init(batch.transactions.clone(), batch.account.clone());
            let printer = spawn_printer(queue.subscribe(), opts.json);
            let outcome = tokio::select! {
                outcome = run_transactions(&queue, opts.retries) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    queue.clear();
                    Err("Interrupted".to_string())
                }
            };
            printer.abort();
            output["transactions"] = hashes(&outcome?);
        }

        if !batch.typed_data.is_empty() {
            store.init(batch.typed_data.clone(), batch.account.clone());
            let printer = spawn_printer(store.subscribe(), opts.json);
            let outcome = tokio::select! {
                outcome = run_typed_data(&store, opts.retries) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    store.clear();
                    Err("Interrupted".to_string())
                }
            };
            printer.abort();
            output["signatures"] = hashes(&outcome?);
        }

        Ok(output)
    })
}

async fn run_transactions(queue: &SigningTaskQueue, retries: u32) -> Result<Vec<SignResult>, String> {
    let mut outcome = queue.start(false).await;
    let mut attempt = 0;
    loop {
        match outcome {
            Ok(results) => return Ok(results),
            Err(QueueError::Sign(e)) if attempt < retries && e.kind() == FailureKind::Errored => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "retrying transaction batch");
                outcome = queue.retry().await;
            }
            Err(e) => return Err(describe(e, queue.error())),
        }
    }
}

async fn run_typed_data(store: &TypedDataSigningStore, retries: u32) -> Result<Vec<SignResult>, String> {
    let mut outcome = store.start(false).await;
    let mut attempt = 0;
    loop {
        match outcome {
            Ok(results) => return Ok(results),
            Err(QueueError::Sign(e)) if attempt < retries && e.kind() == FailureKind::Errored => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "retrying typed data batch");
                outcome = store.retry().await;
            }
            Err(e) => return Err(describe(e, store.error())),
        }
    }
}

fn describe(error: QueueError, task: Option<TaskError>) -> String {
    match task {
        Some(task) => format!("{}: {}", task.content, task.description),
        None => error.to_string(),
    }
}

fn hashes(results: &[SignResult]) -> Value { json!(results.iter().map(|r| r.hash.as_str()).collect::<Vec<_>>()) }

fn spawn_printer(mut rx: watch::Receiver<ProgressSnapshot>, json: bool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if json {
                if let Ok(line) = serde_json::to_string(&snapshot) {
                    println!("{}", line);
                }
            } else {
                eprintln!(
                    "{} [{}/{}] {} {}{}",
                    snapshot.session,
                    (snapshot.current_index + 1).min(snapshot.total),
                    snapshot.total,
                    snapshot.status.as_str(),
                    snapshot.item_status.map(|s| s.as_str()).unwrap_or("-"),
                    snapshot.hash.as_deref().map(|h| format!(" {}", h)).unwrap_or_default(),
                );
            }
        }
    })
}
