//! Record-UDF execution CLI
//!
//! Run with: cargo run --bin kv-exec -- --help

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use kv_udf::client::{Client, ClientConfig, ClientError};
use kv_udf::protocol::{render_pretty, RecordKey, UdfCall};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "kv-exec")]
#[command(about = "Apply a server-side UDF to a single record")]
#[command(override_usage = "kv-exec [options] key module function [args ...]")]
#[command(disable_help_flag = true)]
struct Args {
    /// Display this message.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Profile the operation.
    #[arg(long)]
    profile: bool,

    /// Database address.
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    host: String,

    /// Database port.
    #[arg(short = 'p', long, default_value_t = 3000)]
    port: u16,

    /// Timeout in milliseconds.
    #[arg(short = 't', long, default_value_t = 10)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Path to a file to send log messages to.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Namespace for the key.
    #[arg(short = 'n', long, default_value = "test")]
    namespace: String,

    /// Set for the key.
    #[arg(short = 's', long, default_value = "demo")]
    set: String,

    /// Username to connect to a secured cluster.
    #[arg(short = 'U', long)]
    user: Option<String>,

    /// Password to connect to a secured cluster.
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Repeat the operation this many times.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    iterations: u64,

    /// Key of the record.
    key: Option<String>,

    /// UDF module name.
    module: Option<String>,

    /// UDF function name.
    function: Option<String>,

    /// UDF arguments; each is parsed as JSON, falling back to the raw text.
    args: Vec<String>,
}

fn missing_argument(what: &str) -> ! {
    eprintln!("Error: please provide {} for the operation", what);
    eprintln!();
    let mut cmd = Args::command();
    eprintln!("{}", cmd.render_help());
    process::exit(1);
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        // stdout carries the result, so logs go to stderr
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let Some(key) = args.key.clone() else {
        missing_argument("a key")
    };
    let Some(module) = args.module.clone() else {
        missing_argument("a UDF module")
    };
    let Some(function) = args.function.clone() else {
        missing_argument("a UDF function")
    };

    init_logging(&args)?;

    let config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        timeout_ms: args.timeout,
        user: args.user.clone(),
        password: args.password.clone(),
    };

    let client = Client::new(config);
    if let Err(e) = client.connect().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let record_key = RecordKey::new(args.namespace.clone(), args.set.clone(), key);
    let call = UdfCall::new(module, function).with_raw_args(&args.args);

    for _ in 0..args.iterations {
        let started = Instant::now();

        match client.execute(&record_key, &call).await {
            Ok(value) => {
                println!("{}", render_pretty(&value)?);
                if args.profile {
                    eprintln!("execute took {:.3} ms", started.elapsed().as_secs_f64() * 1e3);
                }
            }
            Err(ClientError::NotFound) => {
                eprintln!("Error: Not Found.");
                process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positionals_and_flags() {
        let args = Args::try_parse_from([
            "kv-exec", "-h", "db1", "-p", "4000", "-n", "ns", "-s", "users", "-U", "admin",
            "-P", "secret", "--iterations", "3", "mykey", "mymod", "myfn", "42", "abc",
        ])
        .unwrap();

        assert_eq!(args.host, "db1");
        assert_eq!(args.port, 4000);
        assert_eq!(args.namespace, "ns");
        assert_eq!(args.set, "users");
        assert_eq!(args.user.as_deref(), Some("admin"));
        assert_eq!(args.password.as_deref(), Some("secret"));
        assert_eq!(args.iterations, 3);
        assert_eq!(args.key.as_deref(), Some("mykey"));
        assert_eq!(args.module.as_deref(), Some("mymod"));
        assert_eq!(args.function.as_deref(), Some("myfn"));
        assert_eq!(args.args, vec!["42".to_string(), "abc".to_string()]);
    }

    #[test]
    fn defaults_match_the_documented_cli() {
        let args = Args::try_parse_from(["kv-exec", "k", "m", "f"]).unwrap();
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 3000);
        assert_eq!(args.timeout, 10);
        assert_eq!(args.namespace, "test");
        assert_eq!(args.set, "demo");
        assert_eq!(args.iterations, 1);
        assert!(!args.profile);
    }

    #[test]
    fn positionals_are_optional_at_parse_time() {
        // missing module/function is detected in run(), not by the parser
        let args = Args::try_parse_from(["kv-exec", "mykey"]).unwrap();
        assert_eq!(args.key.as_deref(), Some("mykey"));
        assert!(args.module.is_none());
        assert!(args.function.is_none());
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let err = Args::try_parse_from(["kv-exec", "--iterations", "0", "k", "m", "f"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn help_flag_short_circuits_parsing() {
        let err = Args::try_parse_from(["kv-exec", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
