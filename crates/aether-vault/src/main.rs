use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use aether_client::config::{HttpConfig, IpcConfig, TransportConfig};
use aether_client::{VaultClient, socket};
use aether_core::capability::Capability;
use aether_core::context::Context;
use aether_core::error::{Result, VaultError};
use aether_core::intention::Intention;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "aether-vault", version)]
struct Cli {
    /// Transport config file (TOML). Takes precedence over --socket/--url.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent socket path (otherwise AETHER_VAULT_SOCK / XDG_RUNTIME_DIR / ~/.aether-vault/run).
    #[arg(long, env = socket::SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Vault base URL; selects the HTTP(S) transport.
    #[arg(long, env = "AETHER_VAULT_URL")]
    url: Option<String>,

    #[arg(long, env = "AETHER_VAULT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Skip TLS certificate verification.
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Token presented to /auth/authenticate before vault requests.
    #[arg(long, env = "AETHER_VAULT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Check vault reachability.
    Health,
    /// Authenticate and report the result.
    Auth,
    /// Request a capability.
    Capability {
        #[arg(long, value_parser = parse_intention)]
        intention: Intention,

        /// Requested lifetime in seconds.
        #[arg(long, default_value_t = 300)]
        ttl: u64,

        #[command(flatten)]
        context: ContextArgs,
    },
    /// Request a named credential. Secret fields are never printed.
    Credential {
        #[arg(long)]
        name: String,

        #[arg(long, value_parser = parse_intention)]
        intention: Intention,

        #[command(flatten)]
        context: ContextArgs,
    },
    /// Revoke a capability previously printed by `capability`.
    RevokeCapability {
        /// JSON file holding the capability.
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ContextArgs {
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    service: Option<String>,

    #[arg(long = "env")]
    environment: Option<String>,

    #[arg(long)]
    region: Option<String>,
}

impl ContextArgs {
    fn to_context(&self) -> Context {
        let mut builder = Context::builder();
        if let Some(user) = &self.user {
            builder = builder.user_id(user);
        }
        if let Some(service) = &self.service {
            builder = builder.service_id(service);
        }
        if let Some(environment) = &self.environment {
            builder = builder.environment(environment);
        }
        if let Some(region) = &self.region {
            builder = builder.region(region);
        }
        builder.build().with_request_id()
    }
}

fn parse_intention(s: &str) -> std::result::Result<Intention, String> {
    Intention::from_str(s).map_err(|e| e.message().to_owned())
}

/// Pick the transport: config file, then explicit URL, then explicit socket,
/// then the environment defaults.
fn resolve_config(cli: &Cli) -> Result<TransportConfig> {
    if let Some(path) = &cli.config {
        return TransportConfig::load(path);
    }
    if let Some(url) = &cli.url {
        let mut http = HttpConfig::new(url.as_str()).with_verify_ssl(!cli.insecure);
        if let Some(key) = cli.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.with_api_key(key);
        }
        return Ok(http.into());
    }
    if let Some(socket) = &cli.socket {
        return Ok(IpcConfig::new(socket).into());
    }
    Ok(TransportConfig::from_env())
}

fn read_capability(path: &Path) -> Result<Capability> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        VaultError::configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        VaultError::capability(format!("invalid capability in {}: {e}", path.display()))
    })
}

async fn authenticate(client: &VaultClient, token: Option<&str>) -> Result<()> {
    let credentials = match token {
        Some(token) => serde_json::json!({ "token": token }),
        None => serde_json::json!({}),
    };
    client.authenticate(credentials).await?;
    Ok(())
}

async fn run(cli: &Cli) -> Result<serde_json::Value> {
    let config = resolve_config(cli)?;
    debug!(?config, "resolved transport config");
    let client = VaultClient::connect(&config).await?;
    run_and_close(&client, cli).await
}

/// Run the command, then close `client` whether or not it succeeded.
async fn run_and_close(client: &VaultClient, cli: &Cli) -> Result<serde_json::Value> {
    let output = execute(client, cli).await;
    let closed = client.close().await;
    match (output, closed) {
        (Ok(output), Ok(())) => Ok(output),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "failed to close client after error");
            Err(e)
        }
    }
}

async fn execute(client: &VaultClient, cli: &Cli) -> Result<serde_json::Value> {
    let kind = client.transport_kind();

    let output = match &cli.cmd {
        Cmd::Health => {
            let healthy = client.health_check().await;
            serde_json::json!({ "healthy": healthy, "transport": kind })
        }
        Cmd::Auth => {
            authenticate(client, cli.token.as_deref()).await?;
            serde_json::json!({ "authenticated": true, "transport": kind })
        }
        Cmd::Capability {
            intention,
            ttl,
            context,
        } => {
            authenticate(client, cli.token.as_deref()).await?;
            let capability = client
                .request_capability(*intention, &context.to_context(), Duration::from_secs(*ttl))
                .await?;
            serde_json::to_value(&capability).map_err(|e| {
                VaultError::capability(format!("cannot encode capability: {e}"))
            })?
        }
        Cmd::Credential {
            name,
            intention,
            context,
        } => {
            authenticate(client, cli.token.as_deref()).await?;
            let credential = client
                .request_credential(name, *intention, &context.to_context())
                .await?;
            serde_json::json!({
                "name": credential.name(),
                "kind": credential.kind(),
                "created_at": credential.created_at(),
                "expires_at": credential.expires_at(),
                "ttl": credential.ttl().as_secs_f64(),
            })
        }
        Cmd::RevokeCapability { file } => {
            let capability = read_capability(file)?;
            authenticate(client, cli.token.as_deref()).await?;
            client.revoke_capability(&capability).await?;
            serde_json::json!({ "revoked": capability.id() })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let unhealthy_exit = matches!(cli.cmd, Cmd::Health);

    match run(&cli).await {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            if unhealthy_exit && output["healthy"] == false {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("aether-vault: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::error::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("aether-vault").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn capability_args_parse() {
        let cli = parse(&[
            "--socket",
            "/tmp/agent.sock",
            "capability",
            "--intention",
            "database:read",
            "--ttl",
            "60",
            "--user",
            "alice",
            "--env",
            "staging",
        ]);
        let Cmd::Capability {
            intention,
            ttl,
            context,
        } = &cli.cmd
        else {
            panic!("expected capability command");
        };
        assert_eq!(*intention, Intention::DatabaseRead);
        assert_eq!(*ttl, 60);
        let ctx = context.to_context();
        assert_eq!(ctx.user_id(), Some("alice"));
        assert_eq!(ctx.environment(), "staging");
        assert!(ctx.request_id().is_some());
    }

    #[test]
    fn unknown_intention_is_rejected() {
        let result = Cli::try_parse_from([
            "aether-vault",
            "capability",
            "--intention",
            "database:drop",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_url_selects_http() {
        let cli = parse(&[
            "--url",
            "https://vault.example.com",
            "--api-key",
            "k",
            "--insecure",
            "health",
        ]);
        let TransportConfig::Http(http) = resolve_config(&cli).unwrap() else {
            panic!("expected http config");
        };
        assert_eq!(http.base_url, "https://vault.example.com");
        assert!(!http.verify_ssl);
        assert!(http.api_key.is_some());
    }

    #[test]
    fn config_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        std::fs::write(&path, "type = \"ipc\"\nsocket_path = \"/run/custom.sock\"\n").unwrap();
        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--url",
            "https://ignored.example.com",
            "health",
        ]);
        let TransportConfig::Ipc(ipc) = resolve_config(&cli).unwrap() else {
            panic!("expected ipc config");
        };
        assert_eq!(ipc.socket_path, PathBuf::from("/run/custom.sock"));
    }

    #[test]
    fn read_capability_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.json");
        std::fs::write(
            &path,
            r#"{"id":"cap-9","intention":"secret:read","context":{},"policy_id":"p","ttl":60}"#,
        )
        .unwrap();
        let capability = read_capability(&path).unwrap();
        assert_eq!(capability.id(), "cap-9");

        std::fs::write(&path, "{}").unwrap();
        assert_eq!(
            read_capability(&path).unwrap_err().kind(),
            ErrorKind::Capability
        );
    }

    #[tokio::test]
    async fn failed_command_still_closes_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/authenticate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "session-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/capabilities/request"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "intention denied"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let uri = server.uri();
        let cli = parse(&[
            "--url",
            uri.as_str(),
            "--token",
            "t",
            "capability",
            "--intention",
            "secret:read",
        ]);
        let client = VaultClient::connect(&resolve_config(&cli).unwrap())
            .await
            .unwrap();
        assert!(client.health_check().await);

        let err = run_and_close(&client, &cli).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert!(!client.is_authenticated().await);
        assert!(!client.health_check().await);
    }
}
