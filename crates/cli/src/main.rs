#![forbid(unsafe_code)]

mod render;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kubeview_api::{QueryExecutor, QueryResponse};
use kubeview_core::columns::{find_column, SortDirection, SortingState};
use kubeview_core::variables::{VariableScope, VariableValue};
use kubeview_core::RowId;
use kubeview_prom::PromClient;
use kubeview_table::{spawn_table, AsyncTable, QueryBuilder, SortOutcome, TableCommand, TableHandle, TableSnapshot};
use kubeview_workloads::variables::{cluster_options, load_top_level_scope, table_scope, top_level_scope};
use kubeview_workloads::{workload_table, TopLevelVariableSettings, WorkloadKind, WorkloadQueryBuilder, WorkloadRow};
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubeviewctl", version, about = "Kubernetes workload health tables from Prometheus")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human, global = true)]
    output: Output,

    #[arg(long, global = true, env = "KUBEVIEW_PROMETHEUS_URL", default_value = "http://localhost:9090")]
    prometheus_url: String,

    /// Cluster label value; the first discovered cluster when unset
    #[arg(long, global = true, env = "KUBEVIEW_DEFAULT_CLUSTER")]
    cluster: Option<String>,

    #[arg(long, global = true, env = "KUBEVIEW_DATASOURCE", default_value = "prometheus")]
    datasource: String,

    /// Metric whose `cluster` label values list the clusters
    #[arg(long, global = true, env = "KUBEVIEW_CLUSTER_FILTER")]
    cluster_filter: Option<String>,

    #[arg(long, global = true, env = "KUBEVIEW_QUERY_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Args, Debug)]
struct TableArgs {
    /// ds | deploy | sts (or the full kind name)
    kind: WorkloadKind,
    /// Restrict to these namespaces (repeatable); all namespaces when omitted
    #[arg(long = "ns")]
    namespaces: Vec<String>,
    /// Regex applied to the workload name
    #[arg(long)]
    search: Option<String>,
    /// Sort column: name | namespace | replicas | alerts
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    desc: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one discovery and enrichment cycle and print the table
    Ls {
        #[command(flatten)]
        table: TableArgs,
        /// Expand rows by id (`namespace/name`) and print their detail panels
        #[arg(long = "expand")]
        expand: Vec<String>,
    },
    /// Refresh the table periodically until Ctrl-C
    Watch {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Print the generated PromQL without contacting Prometheus
    Query {
        #[command(flatten)]
        table: TableArgs,
        /// Rows (`namespace/name`) to build enrichment queries for
        #[arg(long = "row")]
        rows: Vec<String>,
    },
    /// List cluster options
    Clusters,
}

fn init_tracing() {
    let env = std::env::var("KUBEVIEW_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEVIEW_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KUBEVIEW_METRICS_ADDR; expected host:port");
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T { std::env::var(name).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default) }

fn settings(cli: &Cli) -> TopLevelVariableSettings {
    TopLevelVariableSettings {
        datasource: cli.datasource.clone(),
        default_datasource: cli.datasource.clone(),
        default_cluster: cli.cluster.clone(),
        cluster_filter: cli.cluster_filter.clone(),
    }
}

fn executor(cli: &Cli) -> Result<Arc<dyn QueryExecutor>> {
    let client = PromClient::new(&cli.prometheus_url, Duration::from_secs(cli.timeout_secs)).context("building Prometheus client")?;
    Ok(Arc::new(client))
}

fn namespace_value(namespaces: &[String]) -> VariableValue {
    match namespaces {
        [] => VariableValue::All,
        [one] => VariableValue::Text(one.clone()),
        many => VariableValue::Multi(many.to_vec()),
    }
}

fn sorting(args: &TableArgs) -> Option<SortingState> {
    let dir = if args.desc { SortDirection::Desc } else { SortDirection::Asc };
    match (&args.sort, args.desc) {
        (Some(col), _) => Some(SortingState::new(col.clone(), dir)),
        (None, true) => Some(SortingState::new(kubeview_workloads::columns::NAME, dir)),
        (None, false) => None,
    }
}

fn parse_row(id: &str) -> Result<WorkloadRow> {
    let (ns, name) = id.split_once('/').ok_or_else(|| anyhow!("row id {:?} must be namespace/name", id))?;
    Ok(WorkloadRow::new(ns, name))
}

/// Apply the table flags before the first cycle.
fn configure(table: &mut AsyncTable<WorkloadRow>, args: &TableArgs) -> Result<()> {
    table.set_variable("namespace", namespace_value(&args.namespaces));
    if let Some(search) = &args.search {
        table.set_variable("search", VariableValue::Text(search.clone()));
    }
    if let Some(s) = sorting(args) {
        if table.set_sorting(s.clone()) == SortOutcome::Ignored {
            let known: Vec<&str> = table.columns().iter().map(|c| c.id).collect();
            bail!("unknown sort column {:?} (expected one of {})", s.column_id, known.join(", "));
        }
    }
    Ok(())
}

async fn open_table(cli: &Cli, args: &TableArgs, executor: Arc<dyn QueryExecutor>) -> Result<TableHandle<WorkloadRow>> {
    let top = Arc::new(load_top_level_scope(executor.as_ref(), &settings(cli)).await);
    let mut table = workload_table(args.kind, top);
    configure(&mut table, args)?;
    Ok(spawn_table(table, executor, env_or("KUBEVIEW_QUEUE_CAP", 64usize)))
}

/// Refresh and wait for the cycle to settle, bounded by `KUBEVIEW_WAIT_SECS`.
async fn run_cycle(handle: &TableHandle<WorkloadRow>) -> Result<Arc<TableSnapshot<WorkloadRow>>> {
    let wait_secs = env_or("KUBEVIEW_WAIT_SECS", 30u64);
    let gen = handle.current().generation + 1;
    if !handle.refresh().await {
        bail!("table loop stopped");
    }
    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    match tokio::time::timeout_at(deadline, handle.settled_after(gen)).await {
        Ok(Some(snap)) => Ok(snap),
        Ok(None) => bail!("table loop stopped"),
        Err(_) => {
            warn!(wait_secs, "table did not settle in time; printing partial state");
            Ok(handle.current())
        }
    }
}

fn print_table(output: Output, kind: WorkloadKind, snap: &TableSnapshot<WorkloadRow>) -> Result<()> {
    match output {
        Output::Human => print!("{}", render::render_human(kind, snap)),
        Output::Json => println!("{}", render::render_json(kind, snap)?),
    }
    Ok(())
}

/// Expand `ids`, then execute every detail panel of the expanded rows.
async fn print_details(
    output: Output,
    handle: &TableHandle<WorkloadRow>,
    executor: &Arc<dyn QueryExecutor>,
    ids: &[String],
) -> Result<()> {
    let snap = handle.current();
    let ids: Vec<&String> = ids
        .iter()
        .filter(|id| {
            let known = snap.row(id).is_some();
            if !known {
                eprintln!("no row {}", id);
            }
            known
        })
        .collect();
    for id in &ids {
        handle.send(TableCommand::ToggleExpanded(RowId::new(id.as_str()))).await;
    }
    let wait = Duration::from_secs(env_or("KUBEVIEW_WAIT_SECS", 30u64));
    let ready = |s: &TableSnapshot<WorkloadRow>| ids.iter().all(|id| s.row(id).map(|r| r.detail.is_some()).unwrap_or(true));
    let snap = match tokio::time::timeout(wait, handle.wait_for(ready)).await {
        Ok(Some(snap)) => snap,
        _ => handle.current(),
    };

    let mut json = Vec::new();
    for id in &ids {
        let Some(detail) = snap.row(id).and_then(|r| r.detail.clone()) else {
            eprintln!("no detail available for {}", id);
            continue;
        };
        let mut panels: Vec<(String, QueryResponse)> = Vec::new();
        for panel in &detail.panels {
            match executor.execute(&panel.request).await {
                Ok(resp) => panels.push((panel.title.clone(), resp)),
                Err(e) => eprintln!("{}: {} failed: {}", detail.title, panel.title, e),
            }
        }
        match output {
            Output::Human => print!("{}", render::render_detail(&detail.title, &panels)),
            Output::Json => json.push(serde_json::json!({
                "id": id,
                "title": detail.title,
                "panels": panels.iter().map(|(title, resp)| serde_json::json!({
                    "title": title,
                    "ref_id": resp.ref_id,
                    "series": resp.series,
                })).collect::<Vec<_>>(),
            })),
        }
    }
    if matches!(output, Output::Json) && !json.is_empty() {
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}

/// Refresh every `period` and print each settled snapshot until `shutdown` resolves,
/// including while a cycle is still in flight. Returns the number of tables printed.
async fn watch_until<F>(
    handle: &TableHandle<WorkloadRow>,
    output: Output,
    kind: WorkloadKind,
    period: Duration,
    shutdown: F,
) -> Result<u64>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut printed = 0u64;
    loop {
        let snap = tokio::select! {
            res = run_cycle(handle) => res?,
            _ = &mut shutdown => break,
        };
        if matches!(output, Output::Human) {
            println!("--- {} (generation {}) ---", kind.plural(), snap.generation);
        }
        print_table(output, kind, &snap)?;
        printed += 1;
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = &mut shutdown => break,
        }
    }
    info!(printed, "shutting down watch loop");
    Ok(printed)
}

fn offline_scope(cli: &Cli, args: &TableArgs) -> Result<VariableScope> {
    let cluster = cli.cluster.as_deref().ok_or_else(|| anyhow!("--cluster (or KUBEVIEW_DEFAULT_CLUSTER) is required"))?;
    let mut scope = table_scope(Arc::new(top_level_scope(&settings(cli), Some(cluster))));
    scope.set("namespace", namespace_value(&args.namespaces));
    if let Some(search) = &args.search {
        scope.set("search", search.as_str());
    }
    Ok(scope)
}

fn print_queries(cli: &Cli, args: &TableArgs, rows: &[String]) -> Result<()> {
    let vars = offline_scope(cli, args)?;
    let builder = WorkloadQueryBuilder::new(args.kind);
    let mut table = workload_table(args.kind, Arc::new(VariableScope::new()));
    configure(&mut table, args)?;
    let sort = table.sorting().clone();
    let config = find_column(table.columns(), &sort.column_id).and_then(|c| c.sorting.as_ref());
    let root = builder.root_query(&vars, &sort, config)?;
    let rows = rows.iter().map(|r| parse_row(r)).collect::<Result<Vec<_>>>()?;
    let enrich = builder.row_queries(&rows, &vars)?;

    match cli.output {
        Output::Human => {
            println!("# {}", root.ref_id);
            println!("{}", root.expr);
            for q in &enrich {
                println!("# {}", q.ref_id);
                println!("{}", q.expr);
            }
        }
        Output::Json => {
            let all: Vec<_> = std::iter::once(&root).chain(enrich.iter()).collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Ls { table, expand } => {
            let executor = executor(&cli)?;
            let handle = open_table(&cli, table, executor.clone()).await?;
            let snap = run_cycle(&handle).await?;
            print_table(cli.output, table.kind, &snap)?;
            if !expand.is_empty() && snap.error.is_none() {
                print_details(cli.output, &handle, &executor, expand).await?;
            }
            handle.send(TableCommand::Shutdown).await;
            if snap.error.is_some() {
                std::process::exit(1);
            }
        }
        Commands::Watch { table, interval } => {
            let executor = executor(&cli)?;
            let handle = open_table(&cli, table, executor).await?;
            let period = Duration::from_secs((*interval).max(1));
            let shutdown = async {
                let _ = signal::ctrl_c().await;
            };
            watch_until(&handle, cli.output, table.kind, period, shutdown).await?;
            handle.send(TableCommand::Shutdown).await;
        }
        Commands::Query { table, rows } => print_queries(&cli, table, rows)?,
        Commands::Clusters => {
            let executor = executor(&cli)?;
            let clusters = cluster_options(executor.as_ref(), &settings(&cli)).await.context("listing clusters")?;
            match cli.output {
                Output::Human => {
                    for c in &clusters {
                        println!("{}", c);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
            }
        }
    }
    Ok(())
}
