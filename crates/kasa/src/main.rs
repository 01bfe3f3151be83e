use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kasa", about = "Kasa: a sealable secrets server", version)]
struct Cli {
    /// Kasa server URL (default: http://127.0.0.1:8200 or $KASA_ADDR)
    #[arg(long, env = "KASA_ADDR", default_value = "http://127.0.0.1:8200")]
    addr: String,

    /// Root token for guarded endpoints ($KASA_TOKEN)
    #[arg(long, env = "KASA_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Kasa HTTP server
    Serve {
        /// Port to listen on (default: $KASA_PORT or 8200)
        #[arg(long, env = "KASA_PORT", default_value = "8200")]
        port: u16,
        /// Host to bind (default: $KASA_HOST or 0.0.0.0)
        #[arg(long, env = "KASA_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage backend: file or inmem
        #[arg(long, env = "KASA_STORAGE", default_value = "file")]
        storage: String,
        /// Storage root for the file backend
        #[arg(long, env = "KASA_DATA_DIR")]
        data_dir: Option<std::path::PathBuf>,
        /// Cluster name recorded at initialization
        #[arg(long, env = "KASA_CLUSTER_NAME")]
        cluster_name: Option<String>,
    },
    /// Show seal status
    Status,
    /// Initialize the server and print the key shares and root token
    Init {
        /// Number of key shares to produce
        #[arg(long, default_value = "5")]
        shares: u32,
        /// Shares required to unseal
        #[arg(long, default_value = "3")]
        threshold: u32,
    },
    /// Submit one unseal key share
    Unseal {
        /// Key share (hex or base64)
        #[arg(required_unless_present = "reset")]
        key: Option<String>,
        /// Discard the shares submitted so far
        #[arg(long)]
        reset: bool,
    },
    /// Seal the server
    Seal,
    /// List secret mounts
    Mounts {
        /// Include the reserved sys and cubbyhole mounts
        #[arg(long)]
        all: bool,
    },
    /// Mount a secret backend at a path
    Mount {
        path: String,
        /// Backend type
        #[arg(long = "type", default_value = "kv")]
        kind: String,
    },
    /// Read a secret
    Read { path: String },
    /// Write a secret: `kasa write secret/app user=admin pass=hunter2`
    Write {
        path: String,
        /// KEY=value pairs
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Delete a secret
    Delete { path: String },
    /// List keys below a path
    List { path: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KASA_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let api = Api::new(&cli.addr, cli.token.clone());

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            data_dir,
            cluster_name,
        } => {
            let cfg = kasa_server::ServerConfig {
                host,
                port,
                storage,
                data_dir,
                cluster_name,
                ..Default::default()
            };
            kasa_server::run(cfg).await
        }

        Commands::Status => cmd_status(&api).await,
        Commands::Init { shares, threshold } => cmd_init(&api, shares, threshold).await,
        Commands::Unseal { key, reset } => cmd_unseal(&api, key, reset).await,

        Commands::Seal => {
            api.guarded(Method::PUT, "sys/seal", None).await?;
            println!("sealed");
            Ok(())
        }

        Commands::Mounts { all } => cmd_mounts(&api, all).await,

        Commands::Mount { path, kind } => {
            let path = path.trim_matches('/');
            let json = api
                .guarded(
                    Method::POST,
                    &format!("sys/mounts/{path}"),
                    Some(json!({ "type": kind })),
                )
                .await?;
            println!(
                "mounted {} at {}",
                json["type"].as_str().unwrap_or(&kind),
                json["path"].as_str().unwrap_or(path)
            );
            Ok(())
        }

        Commands::Read { path } => {
            let json = api.guarded(Method::GET, &path, None).await?;
            print_pretty(&json["data"])
        }

        Commands::Write { path, pairs } => {
            let data = parse_pairs(&pairs)?;
            api.guarded(Method::PUT, &path, Some(Value::Object(data)))
                .await?;
            println!("wrote {path}");
            Ok(())
        }

        Commands::Delete { path } => {
            api.guarded(Method::DELETE, &path, None).await?;
            println!("deleted {path}");
            Ok(())
        }

        Commands::List { path } => {
            let path = format!("{}/?list=true", path.trim_end_matches('/'));
            let json = api.guarded(Method::GET, &path, None).await?;
            for key in json["data"]["keys"].as_array().into_iter().flatten() {
                println!("{}", key.as_str().unwrap_or_default());
            }
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_status(api: &Api) -> Result<()> {
    let json = api.call(Method::GET, "sys/seal-status", None).await?;
    println!("initialized:  {}", json["initialized"]);
    println!("sealed:       {}", json["sealed"]);
    println!("threshold:    {} of {}", json["t"], json["n"]);
    println!("progress:     {}", json["progress"]);
    println!("cluster:      {}", json["cluster_name"].as_str().unwrap_or(""));
    println!("version:      {}", json["version"].as_str().unwrap_or(""));
    Ok(())
}

async fn cmd_init(api: &Api, shares: u32, threshold: u32) -> Result<()> {
    let json = api
        .call(
            Method::PUT,
            "sys/init",
            Some(json!({ "secret_shares": shares, "secret_threshold": threshold })),
        )
        .await?;

    for (i, key) in json["keys"].as_array().into_iter().flatten().enumerate() {
        println!("Unseal key {}: {}", i + 1, key.as_str().unwrap_or_default());
    }
    println!();
    println!(
        "Root token: {}",
        json["root_token"].as_str().unwrap_or_default()
    );
    println!();
    println!("These keys are shown once. Any {threshold} of them unseal the server.");
    Ok(())
}

async fn cmd_unseal(api: &Api, key: Option<String>, reset: bool) -> Result<()> {
    let body = if reset {
        json!({ "reset": true })
    } else {
        json!({ "key": key })
    };
    let json = api.call(Method::PUT, "sys/unseal", Some(body)).await?;
    if json["sealed"].as_bool() == Some(false) {
        println!("unsealed");
    } else {
        println!("sealed: progress {}/{}", json["progress"], json["t"]);
    }
    Ok(())
}

async fn cmd_mounts(api: &Api, all: bool) -> Result<()> {
    let path = if all { "sys/mounts?all=true" } else { "sys/mounts" };
    let json = api.guarded(Method::GET, path, None).await?;
    for m in json["mounts"].as_array().into_iter().flatten() {
        println!(
            "{:<24} {}",
            m["path"].as_str().unwrap_or_default(),
            m["type"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Thin client for the `/v1` API.
struct Api {
    client: Client,
    base: String,
    token: Option<String>,
}

impl Api {
    fn new(addr: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base: format!("{}/v1", addr.trim_end_matches('/')),
            token,
        }
    }

    /// Request that needs the root token.
    async fn guarded(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.token
            .as_deref()
            .context("--token / KASA_TOKEN is required for this command")?;
        self.call(method, path, body).await
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let mut req = self.client.request(method, url);
        if let Some(ref token) = self.token {
            req = req.header("X-Kasa-Token", token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.context("HTTP request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("read response")?;
        let json: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).context("parse response")?
        };

        if !status.is_success() {
            let msg = json["errors"][0].as_str().unwrap_or("unknown error");
            anyhow::bail!("server returned {status}: {msg}");
        }
        Ok(json)
    }
}

/// `KEY=value` arguments into a JSON object. Values stay strings.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=value, got '{pair}'"))?;
        if key.is_empty() {
            anyhow::bail!("empty key in '{pair}'");
        }
        data.insert(key.to_owned(), Value::String(value.to_owned()));
    }
    Ok(data)
}

fn print_pretty(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("format response")?
    );
    Ok(())
}
