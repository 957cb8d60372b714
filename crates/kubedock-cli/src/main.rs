// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! kubedock binary: runs containers as pods.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kubedock_backend::{start_cleanup_task, Backend, BackendConfig, Container, KubernetesBackend};
use kubedock_config::{KubedockConfig, KubernetesConfig};
use kubedock_k8s::KubeClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod args;

/// kubedock - run containers as pods in a K8s cluster.
#[derive(Parser, Debug)]
#[command(name = "kubedock", about = "Run containers as K8s pods", version)]
struct Cli {
	/// Path to a TOML config file
	#[arg(long, global = true, env = "KUBEDOCK_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run a container until interrupted, then delete it
	Run(RunArgs),
	/// Delete containers older than the given age
	Prune {
		/// Age in seconds
		#[arg(long, default_value_t = 3600)]
		older_than: u64,
	},
	/// Show version information
	Version,
}

#[derive(Args, Debug)]
struct RunArgs {
	image: String,

	#[arg(long)]
	name: Option<String>,

	/// Environment variable as KEY=VALUE
	#[arg(short, long = "env")]
	env: Vec<String>,

	/// Port as [HOST:]CONTAINER
	#[arg(short, long = "publish")]
	publish: Vec<String>,

	/// Publish every exposed port on a random local port
	#[arg(short = 'P', long)]
	publish_all: bool,

	/// Network alias, each one becomes a service
	#[arg(long = "network-alias")]
	network_aliases: Vec<String>,

	/// Bind as HOST_PATH:CONTAINER_PATH
	#[arg(short, long = "volume")]
	volume: Vec<String>,

	/// Reach the pod through a local reverse proxy instead of a port-forward
	#[arg(long)]
	reverse_proxy: bool,

	/// Command and arguments passed to the image
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	cmd: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	if let Command::Version = cli.command {
		println!("kubedock version: {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &cli.config {
		Some(path) => kubedock_config::load_config_with_file(path)?,
		None => kubedock_config::load_config()?,
	};

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let client = KubeClient::new()
		.await
		.context("failed to create K8s client")?;
	let backend = Arc::new(KubernetesBackend::new(
		Arc::new(client),
		backend_config(&config.kubernetes),
	));

	match cli.command {
		Command::Run(args) => run(backend, &config, args).await,
		Command::Prune { older_than } => {
			let result = backend
				.delete_older_than(Duration::from_secs(older_than))
				.await?;
			for name in &result.deleted {
				println!("{name}");
			}
			tracing::info!(count = result.count, "Pruned containers");
			Ok(())
		}
		Command::Version => Ok(()),
	}
}

fn backend_config(config: &KubernetesConfig) -> BackendConfig {
	BackendConfig {
		namespace: config.namespace.clone(),
		init_image: config.init_image.clone(),
		image_pull_secrets: config.image_pull_secrets.clone(),
		pod_template: config.pod_template.clone(),
		timeout_secs: config.timeout_secs,
		instance_id: config.instance_id.clone(),
		default_pull_policy: config.pull_policy.clone(),
		dump_logs_on_failure: config.dump_logs_on_failure,
		reverse_proxy_max_retry: config.reverse_proxy_max_retry,
	}
}

async fn run(backend: Arc<KubernetesBackend>, config: &KubedockConfig, run: RunArgs) -> Result<()> {
	let name = run.name.clone().unwrap_or_else(|| run.image.clone());
	let mut container = Container::new(name, run.image);
	container.env = run.env;
	container.cmd = run.cmd;
	container.network_aliases = run.network_aliases;
	container.publish_all = run.publish_all;

	let ports = run
		.publish
		.iter()
		.map(String::as_str)
		.map(args::parse_port)
		.collect::<Result<Vec<_>>>()?;
	args::apply_ports(&mut container, &ports);

	for bind in &run.volume {
		let (src, dst) = args::parse_bind(bind)?;
		container
			.add_bind(dst, &src)
			.with_context(|| format!("invalid bind '{bind}'"))?;
	}

	if config.kubernetes.prune_interval_secs > 0 {
		tokio::spawn(start_cleanup_task(
			Arc::clone(&backend),
			Duration::from_secs(config.kubernetes.prune_interval_secs),
			Duration::from_secs(config.kubernetes.prune_max_age_secs),
		));
	}

	let state = backend.start_container(&mut container).await?;
	tracing::info!(
		container = %container.short_id,
		pod = %container.pod_name(),
		state = %state,
		"Container running, press ctrl-c to stop"
	);

	if run.reverse_proxy {
		backend.create_reverse_proxies(&container).await;
	} else {
		backend.create_port_forwards(&container).await;
	}
	for (local, port) in container.service_ports() {
		println!("127.0.0.1:{local} -> {port}");
	}

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for ctrl-c")?;

	tracing::info!(container = %container.short_id, "Stopping container");
	backend.delete_container(&container).await?;
	Ok(())
}
