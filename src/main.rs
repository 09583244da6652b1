//! Berth - host port reservation and container lifecycle for test topologies
//!
//! This is the main CLI entry point for Berth.

use anyhow::Context;
use berth::cleanup::remove_scope;
use berth::container::{scoped_container_name, ContainerRuntime, DockerRuntime};
use berth::port::PortReservation;
use berth::{BerthConfig, ContainerSpec, Lifecycle, PortRequest, RemoveOptions, StartupGate};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Berth - reserve host ports and run containers on them
#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Race-resistant host port reservation and container lifecycle", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the host ports a reservation would pick
    Reserve {
        /// Container ports (e.g. 26657/tcp)
        #[arg(required = true)]
        ports: Vec<String>,
    },

    /// Reserve ports, create and start a container
    Run {
        /// Image to run
        image: String,
        /// Container name (generated within the scope if omitted)
        #[arg(long)]
        name: Option<String>,
        /// Cleanup scope label value
        #[arg(long, default_value = "berth")]
        scope: String,
        /// Container port to publish on a reserved host port
        #[arg(short, long)]
        publish: Vec<String>,
        /// Environment variable (KEY=VALUE)
        #[arg(short, long)]
        env: Vec<String>,
        /// Bind mount (source:target[:mode])
        #[arg(short, long)]
        volume: Vec<String>,
        /// Network to attach to
        #[arg(long)]
        network: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Command to run
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Print host addresses of a running container's ports
    Ports {
        /// Container ID or name
        container: String,
        /// Container ports (e.g. 26657/tcp)
        #[arg(required = true)]
        ports: Vec<String>,
    },

    /// Stop a container
    Stop {
        /// Container ID or name
        container: String,
    },

    /// Remove a container
    #[command(name = "rm")]
    Remove {
        /// Container ID or name
        container: String,
        /// Keep anonymous volumes
        #[arg(long)]
        keep_volumes: bool,
    },

    /// Remove all containers and volumes of a cleanup scope
    Cleanup {
        /// Cleanup scope label value
        scope: String,
    },
}

fn parse_ports(ports: &[String]) -> anyhow::Result<Vec<PortRequest>> {
    ports
        .iter()
        .map(|p| p.parse::<PortRequest>().map_err(Into::into))
        .collect()
}

/// Split `KEY=VALUE` arguments; a missing `=` or empty key is an error
fn parse_env(env: &[String]) -> anyhow::Result<Vec<(&str, &str)>> {
    env.iter()
        .map(|e| match e.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key, value)),
            _ => Err(anyhow::anyhow!(
                "invalid environment variable {:?}, expected KEY=VALUE",
                e
            )),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BerthConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Reserve { ports } => {
            let requests = parse_ports(&ports)?;
            let reservation = PortReservation::reserve(&config.host_ip, &requests)?;
            for port in reservation.ports() {
                println!("{} -> {}", port.request(), port.binding());
            }
        }

        Commands::Run {
            image,
            name,
            scope,
            publish,
            env,
            volume,
            network,
            json,
            command,
        } => {
            let requests = parse_ports(&publish)?;
            let runtime = Arc::new(DockerRuntime::connect()?.with_cleanup_label(&scope));
            let mut lifecycle = Lifecycle::new(runtime, StartupGate::new(), config, &scope)?;

            let container_name = name.unwrap_or_else(|| scoped_container_name(&scope, "run"));
            let mut spec = ContainerSpec::new(&container_name, &image).cmd(command);

            for (key, value) in parse_env(&env)? {
                spec = spec.env(key, value);
            }
            for bind in volume {
                spec = spec.bind(&bind);
            }
            for request in &requests {
                spec = spec.port(*request);
            }
            if let Some(network) = network {
                spec = spec.network(&network);
            }

            lifecycle.create_container(spec).await?;

            if let Err(e) = lifecycle.start_container().await {
                if let Err(cleanup) = lifecycle.remove_container(RemoveOptions::default()).await {
                    tracing::warn!("Failed to remove container after failed start: {}", cleanup);
                }
                return Err(e.into());
            }

            let id = lifecycle.container_id().unwrap_or_default();
            let ports: Vec<&str> = publish.iter().map(String::as_str).collect();
            let addrs = lifecycle.get_host_ports(&ports).await?;

            if json {
                let ports: BTreeMap<&str, String> = ports.into_iter().zip(addrs).collect();
                let body = serde_json::json!({
                    "id": id,
                    "name": lifecycle.name(),
                    "scope": lifecycle.scope(),
                    "started_at": lifecycle.started_at(),
                    "ports": ports,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("{}", id);
                for (port, addr) in ports.iter().zip(addrs) {
                    println!("{} -> {}", port, addr);
                }
            }
        }

        Commands::Ports { container, ports } => {
            let runtime = Arc::new(DockerRuntime::connect()?);
            let lifecycle = Lifecycle::new(runtime, StartupGate::new(), config, "berth")?
                .attach(&container, &container);

            let ports: Vec<&str> = ports.iter().map(String::as_str).collect();
            let addrs = lifecycle.get_host_ports(&ports).await?;
            for (port, addr) in ports.iter().zip(addrs) {
                println!("{} -> {}", port, addr);
            }
        }

        Commands::Stop { container } => {
            let runtime = Arc::new(DockerRuntime::connect()?);
            Lifecycle::new(runtime, StartupGate::new(), config, "berth")?
                .attach(&container, &container)
                .stop_container()
                .await?;
            println!("{}", container);
        }

        Commands::Remove {
            container,
            keep_volumes,
        } => {
            let runtime = Arc::new(DockerRuntime::connect()?);
            let mut lifecycle = Lifecycle::new(runtime, StartupGate::new(), config, "berth")?
                .attach(&container, &container);
            lifecycle
                .remove_container(RemoveOptions {
                    force: true,
                    remove_volumes: !keep_volumes,
                })
                .await?;
            println!("{}", container);
        }

        Commands::Cleanup { scope } => {
            let runtime = DockerRuntime::connect()?;
            let runtime: &dyn ContainerRuntime = &runtime;
            let cleanup = remove_scope(runtime, &config.cleanup_label_key, &scope).await?;

            println!(
                "Removed {} container(s), {} volume(s)",
                cleanup.containers_removed.len(),
                cleanup.volumes.removed.len()
            );
            for id in &cleanup.containers_failed {
                eprintln!("failed to remove container {}", id);
            }
            for name in &cleanup.volumes.failed {
                eprintln!("failed to remove volume {}", name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_env() {
        let env = args(&["CHAIN_ID=test-1", "EMPTY=", "OPTS=a=b"]);
        assert_eq!(
            parse_env(&env).unwrap(),
            vec![("CHAIN_ID", "test-1"), ("EMPTY", ""), ("OPTS", "a=b")]
        );
    }

    #[test]
    fn test_parse_env_rejects_malformed() {
        assert!(parse_env(&args(&["CHAIN_ID"])).is_err());
        assert!(parse_env(&args(&["=value"])).is_err());
    }

    #[test]
    fn test_parse_ports() {
        let ports = parse_ports(&args(&["26657/tcp", "9000/udp", "7331"])).unwrap();
        assert_eq!(
            ports,
            vec![PortRequest::tcp(26657), PortRequest::udp(9000), PortRequest::tcp(7331)]
        );
        assert!(parse_ports(&args(&["http"])).is_err());
    }
}
