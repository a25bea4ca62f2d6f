use anyhow::Result;
use clap::Parser;
use rapi::auth::ReconnectPolicy;
use rapi::commands;
use rapi::config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_MS};
use rapi::http::{DEFAULT_DEADLINE_MS, HttpMethod, MAX_RETRIES};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// rapi - resilient REST API client
///
/// Sends JSON requests with the stored bearer token, retrying transient
/// failures, and follows the server's auth event stream.
///
/// The token is read from the "authToken" key of the storage file.
///
/// Examples:
///   rapi get /api/projects
///   rapi post /api/projects --data '{"name":"Apollo"}'
///   rapi watch --count 1
#[derive(Parser, Debug)]
#[command(author, version = env!("RAPI_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL
    #[arg(
        long = "base-url",
        env = "RAPI_BASE_URL",
        value_name = "URL",
        default_value = DEFAULT_BASE_URL,
        global = true
    )]
    pub base_url: String,

    /// Transport timeout in milliseconds
    #[arg(
        long = "timeout-ms",
        env = "RAPI_TIMEOUT_MS",
        value_name = "MS",
        default_value_t = DEFAULT_TIMEOUT_MS,
        global = true
    )]
    pub timeout_ms: u64,

    /// Deadline for each attempt in milliseconds
    #[arg(
        long = "deadline-ms",
        env = "RAPI_DEADLINE_MS",
        value_name = "MS",
        default_value_t = DEFAULT_DEADLINE_MS,
        global = true
    )]
    pub deadline_ms: u64,

    /// Retries for transient failures
    #[arg(long = "retries", value_name = "N", default_value_t = MAX_RETRIES, global = true)]
    pub retries: u32,

    /// Token storage file (defaults to <config dir>/rapi/storage.json)
    #[arg(long = "storage", env = "RAPI_STORAGE", value_name = "PATH", global = true)]
    pub storage: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send a GET request
    Get(RequestArgs),
    /// Send a POST request
    Post(RequestArgs),
    /// Send a PUT request
    Put(RequestArgs),
    /// Send a PATCH request
    Patch(RequestArgs),
    /// Send a DELETE request
    Delete(RequestArgs),
    /// Show the signed-in user's profile
    Profile,
    /// Print auth state changes as JSON lines
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Path relative to the base URL, or an absolute URL
    #[arg(value_name = "PATH")]
    pub path: String,

    /// JSON request body
    #[arg(long, short = 'd', value_name = "JSON")]
    pub data: Option<String>,

    /// Extra request header, repeatable
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Query parameter, repeatable
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
    pub query: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Exit after this many events
    #[arg(
        long,
        short = 'n',
        value_name = "N",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub count: Option<usize>,

    /// Reconnect attempts before giving up
    #[arg(long = "max-reconnects", value_name = "N", default_value_t = rapi::auth::MAX_RECONNECTS)]
    pub max_reconnects: u32,

    /// Delay before each reconnect in milliseconds
    #[arg(
        long = "reconnect-delay-ms",
        value_name = "MS",
        default_value_t = rapi::auth::RECONNECT_DELAY_MS
    )]
    pub reconnect_delay_ms: u64,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            deadline: Duration::from_millis(self.deadline_ms),
            storage_path: self.storage.clone(),
            ..ClientConfig::default()
        };
        config.retry.max_retries = self.retries;
        if let Commands::Watch(args) = &self.command {
            config.reconnect = ReconnectPolicy {
                max_retries: args.max_reconnects,
                delay: Duration::from_millis(args.reconnect_delay_ms),
            };
        }
        config
    }
}

fn print_json(value: &Value) -> Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = cli.client_config();
    let tokens = config.open_token_store(rapi::runtime::RealRuntime)?;
    let client = config.api_client(tokens)?;

    let (method, args) = match cli.command {
        Commands::Get(args) => (HttpMethod::Get, args),
        Commands::Post(args) => (HttpMethod::Post, args),
        Commands::Put(args) => (HttpMethod::Put, args),
        Commands::Patch(args) => (HttpMethod::Patch, args),
        Commands::Delete(args) => (HttpMethod::Delete, args),
        Commands::Profile => {
            let auth = config.auth_api(client)?;
            return print_json(&commands::profile(&auth).await?);
        }
        Commands::Watch(args) => {
            let auth = config.auth_api(client)?;
            return commands::watch(&auth, args.count, |line| println!("{}", line)).await;
        }
    };

    let body = commands::request(
        &client,
        method,
        &args.path,
        args.data.as_deref(),
        &args.headers,
        &args.query,
    )
    .await?;
    print_json(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_get_parsing() {
        let cli = Cli::try_parse_from(["rapi", "get", "/api/projects"]).unwrap();
        match &cli.command {
            Commands::Get(args) => {
                assert_eq!(args.path, "/api/projects");
                assert_eq!(args.data, None);
                assert!(args.headers.is_empty());
            }
            _ => panic!("Expected Get command"),
        }
        assert_eq!(cli.storage, None);
    }

    #[test]
    fn test_cli_post_parsing() {
        let cli = Cli::try_parse_from([
            "rapi",
            "post",
            "/api/projects",
            "--data",
            r#"{"name":"Apollo"}"#,
            "-H",
            "X-Source: cli",
            "-q",
            "notify=false",
        ])
        .unwrap();
        match cli.command {
            Commands::Post(args) => {
                assert_eq!(args.data.as_deref(), Some(r#"{"name":"Apollo"}"#));
                assert_eq!(args.headers, vec!["X-Source: cli".to_string()]);
                assert_eq!(args.query, vec!["notify=false".to_string()]);
            }
            _ => panic!("Expected Post command"),
        }
    }

    #[test]
    fn test_cli_global_options_parsing() {
        let cli = Cli::try_parse_from([
            "rapi",
            "--base-url",
            "http://api.test/",
            "profile",
            "--deadline-ms",
            "2500",
            "--storage",
            "/tmp/storage.json",
        ])
        .unwrap();
        let config = cli.client_config();
        assert_eq!(config.base_url, "http://api.test/");
        assert_eq!(config.deadline, Duration::from_millis(2500));
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/storage.json")));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_cli_watch_parsing() {
        let cli = Cli::try_parse_from([
            "rapi",
            "watch",
            "--count",
            "2",
            "--max-reconnects",
            "0",
            "--reconnect-delay-ms",
            "100",
        ])
        .unwrap();
        let config = cli.client_config();
        match cli.command {
            Commands::Watch(args) => assert_eq!(args.count, Some(2)),
            _ => panic!("Expected Watch command"),
        }
        assert_eq!(config.reconnect.max_retries, 0);
        assert_eq!(config.reconnect.delay, Duration::from_millis(100));
    }

    #[test]
    fn test_cli_watch_rejects_zero_count() {
        let result = Cli::try_parse_from(["rapi", "watch", "--count", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["rapi", "/api/projects"]);
        assert!(result.is_err());
    }
}
