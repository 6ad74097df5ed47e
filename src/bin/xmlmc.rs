//! Command-line front end for the XMLMC client
//!
//! Usage: xmlmc --instance MyInstance --user admin --password secret invoke session getSessionInfo
//!
//! Without `--instance`, settings come from `XMLMC_*` environment variables
//! (a `.env` file is honoured). With an API key no logon is performed.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use espapi::{XmlmcConfig, XmlmcService};

#[derive(Parser)]
#[command(name = "xmlmc")]
#[command(about = "Invoke XMLMC methods and manage files on an instance")]
struct Args {
    /// Instance name or full server URL
    #[arg(short, long)]
    instance: Option<String>,

    /// Static API key (skips logon)
    #[arg(long)]
    api_key: Option<String>,

    /// User to log on as when no API key is given
    #[arg(short, long)]
    user: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke service::method with key=value parameters and print the response XML
    Invoke {
        service: String,
        method: String,
        params: Vec<String>,
    },
    /// Upload a local file
    Put { local: PathBuf, remote: String },
    /// Print a remote file as text
    Get { remote: String },
    /// Report whether a remote path exists
    Exists { remote: String },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    Rm { remote: String },
    Mkdir { remote: String },
}

fn load_config(args: &Args) -> Result<XmlmcConfig> {
    let mut config = match &args.instance {
        Some(instance) => XmlmcConfig::new(instance.clone()),
        None => XmlmcConfig::from_env().context("no --instance given and environment is incomplete")?,
    };
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key.clone());
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout_seconds(timeout);
    }
    config.validate()?;
    Ok(config)
}

fn parse_param(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| anyhow!("parameter '{}' is not in key=value form", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let has_api_key = config.api_key.is_some();
    let mut service = XmlmcService::new(config)?;
    info!("🚀 Using {}", service.server_url());

    if !has_api_key {
        let user = args
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("--user is required when no API key is configured"))?;
        let password = args.password.as_deref().unwrap_or_default();
        service.logon(user, password).await.context("logon failed")?;
    }

    let outcome = run(&mut service, args.command).await;

    if !has_api_key {
        if let Err(e) = service.logoff().await {
            error!("Logoff failed: {}", e);
        }
    }

    outcome
}

async fn run(service: &mut XmlmcService, command: Command) -> Result<()> {
    match command {
        Command::Invoke { service: name, method, params } => {
            service.clear_params();
            for raw in &params {
                let (key, value) = parse_param(raw)?;
                service.add_param(key, value);
            }
            let result = service.invoke(&name, &method).await.map(|_| ());
            if let Err(e) = result {
                if let Some(message) = service.last_error_message() {
                    error!("{}", message);
                }
                return Err(e.into());
            }
            println!("{}", service.response_xml()?);
        }
        Command::Put { local, remote } => service.put_file(&local, &remote).await?,
        Command::Get { remote } => println!("{}", service.get_file_contents(&remote).await?),
        Command::Exists { remote } => println!("{}", service.file_exists(&remote).await?),
        Command::Copy { from, to } => service.copy_file(&from, &to).await?,
        Command::Move { from, to } => service.move_file(&from, &to).await?,
        Command::Rm { remote } => service.remove_file(&remote).await?,
        Command::Mkdir { remote } => service.create_folder(&remote).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("language=en-GB").unwrap(), ("language", "en-GB"));
        assert_eq!(parse_param("expr=a=b").unwrap(), ("expr", "a=b"));
        assert_eq!(parse_param("empty=").unwrap(), ("empty", ""));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "xmlmc", "--instance", "acme", "--api-key", "k", "invoke", "session", "getSessionInfo", "a=1",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.instance, "acme");
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert!(matches!(args.command, Command::Invoke { ref params, .. } if params.len() == 1));
    }
}
