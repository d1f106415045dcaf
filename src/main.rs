//! Stub server - CLI entry point

use anyhow::Result;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use stub_server::{ServerConfig, StubServer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = r#"# Stub server configuration
stubs:
  - id: hello-world
    name: Static greeting
    request:
      method: [GET]
      path:
        type: exact
        value: /hello
    response:
      status: 200
      body:
        type: json
        content:
          message: "Hello, World!"

  - id: echo
    name: Echo the posted JSON with extra fields
    request:
      method: [POST]
      path:
        type: exact
        value: /echo
    response:
      status: 200
      template: true
      headers:
        Content-Type: application/json
      body:
        type: text
        content: >-
          {{#assign 'extra'}}{"echoed": true}{{/assign}}{{jsonMerge request.body extra assign='merged'}}{{formatJson merged format='compact'}}

  - id: user
    name: Path parameters
    request:
      method: [GET]
      path:
        type: template
        template: /users/{id}
    response:
      status: 200
      template: true
      body:
        type: json
        content:
          id: "{{request.pathParams.id}}"
          requestedAt: "{{now}}"

  - id: slow
    request:
      path:
        type: prefix
        value: /slow
    response:
      status: 200
    delay:
      min_ms: 100
      max_ms: 500

  - id: outage
    request:
      path:
        type: exact
        value: /outage
    response:
      status: 200
    fault:
      type: error
      status: 503
      message: Service unavailable

settings:
  log_matches: true
  log_unmatched: true
  default_content_type: application/json
  max_body_bytes: 10485760
"#;

#[derive(Parser, Debug)]
#[command(
    name = "stub-server",
    about = "Programmable HTTP stub server - request matching and response templating",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stub-server.yaml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        println!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        ServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let server = StubServer::bind(SocketAddr::new(args.host, args.port), config).await?;
    info!(url = %server.base_url(), "Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::from_yaml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.stubs.len(), 5);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["stub-server"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.host.to_string(), "127.0.0.1");
        assert_eq!(args.config, PathBuf::from("stub-server.yaml"));
        assert!(!args.validate);
    }
}
