//! GCP project operator - reconciles projects, billing and IAM

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector::ObjectRef, Controller};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gcp_project_operator::config::OperatorConfig;
use gcp_project_operator::controller::{
    error_policy, reconcile_admin_project, reconcile_project, Context,
};
use gcp_project_operator::crd::{GcpAdminProject, GcpCredentials, GcpProject};
use gcp_project_operator::Error;

/// Watch timeout in seconds, kept under typical API server limits
const WATCH_TIMEOUT_SECS: u32 = 25;

/// GCP project operator - reconciles project, billing and IAM state
#[derive(Parser, Debug)]
#[command(
    name = "gcp-project-operator",
    version,
    about,
    long_about = None,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Controller flags when no subcommand is given
    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Controller flags from the subcommand, or from the top level in default mode
    fn controller_args(self) -> ControllerArgs {
        match self.command {
            Some(Commands::Controller(args)) => args,
            None => self.controller,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the project controllers (default mode)
    Controller(ControllerArgs),
}

/// Controller tuning
#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Only watch resources in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// First delay between long-running operation polls
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Give up on a single long-running operation after this many seconds
    #[arg(long, env = "OPERATION_TIMEOUT_SECS", default_value = "300")]
    operation_timeout_secs: u64,

    /// Deadline for one reconcile invocation
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value = "600")]
    reconcile_timeout_secs: u64,

    /// Re-check converged resources for drift after this many seconds
    #[arg(long, env = "SUCCESS_REQUEUE_SECS", default_value = "300")]
    success_requeue_secs: u64,

    /// Provider requests per second per credential
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    rate_limit_per_second: u32,

    /// Provider request burst per credential
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "20")]
    rate_limit_burst: u32,

    /// Role granted to a child project's service account
    #[arg(long, env = "PROJECT_ROLE", default_value = "roles/owner")]
    project_role: String,

    /// Also grant organization-level billing and project-creator roles
    #[arg(long, env = "GRANT_ORGANIZATION_ROLES")]
    grant_organization_roles: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl ControllerArgs {
    fn operator_config(&self) -> OperatorConfig {
        let mut config = OperatorConfig::default();
        config.wait.initial_interval = Duration::from_millis(self.poll_interval_ms);
        config.wait.timeout = Duration::from_secs(self.operation_timeout_secs);
        config.reconcile_timeout = Duration::from_secs(self.reconcile_timeout_secs);
        config.success_requeue = Duration::from_secs(self.success_requeue_secs);
        config.rate_limit_per_second = self.rate_limit_per_second;
        config.rate_limit_burst = self.rate_limit_burst;
        config.project_role = self.project_role.clone();
        config.grant_organization_roles = self.grant_organization_roles;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [GcpProject::crd(), GcpAdminProject::crd(), GcpCredentials::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let args = cli.controller_args();

    // Initialize tracing
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    run_controller(args).await
}

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Log the outcome of one reconcile from the controller stream
fn log_reconcile_result<K: kube::Resource, E: std::fmt::Debug>(
    kind: &'static str,
) -> impl Fn(Result<(ObjectRef<K>, Action), E>) -> futures::future::Ready<()> {
    move |result| {
        match result {
            Ok((obj, action)) => {
                tracing::debug!(kind, resource = %obj.name, ?action, "reconciliation completed");
            }
            Err(e) => {
                tracing::error!(kind, error = ?e, "reconciliation error");
            }
        }
        futures::future::ready(())
    }
}

/// Run both project controllers until shutdown
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("GCP project operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let config = args.operator_config();
    tracing::info!(
        namespace = args.watch_namespace.as_deref().unwrap_or("*"),
        rate_limit = config.rate_limit_per_second,
        burst = config.rate_limit_burst,
        "operator configured"
    );

    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(config)
            .build()
            .map_err(|e: Error| anyhow::anyhow!("Failed to build controller context: {}", e))?,
    );

    let namespace = args.watch_namespace.as_deref();
    let projects: Api<GcpProject> = api_for(&client, namespace);
    let admin_projects: Api<GcpAdminProject> = api_for(&client, namespace);

    tracing::info!("Starting controllers...");
    tracing::info!("  - GCPProject controller");
    tracing::info!("  - GCPAdminProject controller");

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let project_controller = Controller::new(projects, watcher())
        .shutdown_on_signal()
        .run(reconcile_project, error_policy::<GcpProject>, ctx.clone())
        .for_each(log_reconcile_result("GCPProject"));

    let admin_project_controller = Controller::new(admin_projects, watcher())
        .shutdown_on_signal()
        .run(
            reconcile_admin_project,
            error_policy::<GcpAdminProject>,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("GCPAdminProject"));

    futures::future::join(project_controller, admin_project_controller).await;
    tracing::info!("Controllers stopped");
    Ok(())
}
