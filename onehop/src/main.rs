use clap::{Args, Parser, Subcommand};
use onehop::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use trapi::{ClientConfig, HttpTrapiClient, TrapiClient};

#[derive(Parser)]
#[command(name = "onehop")]
#[command(about = "One-hop tests for TRAPI knowledge providers and ARAs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one-hop tests and write the report
    Run {
        /// TOML file with run settings; flags take precedence
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        args: RunArgs,
    },
    /// List the available test transforms
    Transforms,
    /// Resolve live endpoints without running any tests
    Resolve {
        #[command(flatten)]
        args: RunArgs,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Identifier of the run; defaults to the local date and time
    #[arg(long)]
    run_id: Option<String>,
    /// TRAPI version override
    #[arg(long)]
    trapi_version: Option<String>,
    /// Biolink Model version override, or "suppress"
    #[arg(long)]
    biolink_version: Option<String>,
    /// KPs to test: infores ids, comma lists or globs
    #[arg(long)]
    kp_id: Option<String>,
    /// ARAs to test, or SKIP
    #[arg(long)]
    ara_id: Option<String>,
    /// production, staging, testing or development
    #[arg(long)]
    environment: Option<String>,
    /// Test only the first edge of each resource
    #[arg(long)]
    one: bool,
    #[arg(long)]
    max_in_flight: Option<usize>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long)]
    probe_timeout_secs: Option<u64>,
    #[arg(long)]
    run_timeout_secs: Option<u64>,
    #[arg(long)]
    registry_url: Option<String>,
    /// Local registry document, used instead of the registry URL
    #[arg(long)]
    registry_file: Option<PathBuf>,
    #[arg(long)]
    ontology_kp_url: Option<String>,
    /// Disable entity ancestry lookups
    #[arg(long)]
    no_ontology_kp: bool,
    /// Biolink Model hierarchy file to use instead of the bundled one
    #[arg(long)]
    biolink_model: Option<PathBuf>,
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl From<RunArgs> for ConfigFile {
    fn from(args: RunArgs) -> Self {
        ConfigFile {
            run_id: args.run_id,
            trapi_version: args.trapi_version,
            biolink_version: args.biolink_version,
            kp_id: args.kp_id,
            ara_id: args.ara_id,
            environment: args.environment,
            one: args.one.then_some(true),
            max_in_flight: args.max_in_flight,
            request_timeout_secs: args.request_timeout_secs,
            probe_timeout_secs: args.probe_timeout_secs,
            run_timeout_secs: args.run_timeout_secs,
            registry_url: args.registry_url,
            registry_file: args.registry_file,
            ontology_kp_url: args.ontology_kp_url,
            no_ontology_kp: args.no_ontology_kp.then_some(true),
            biolink_model: args.biolink_model,
            report_dir: args.report_dir,
        }
    }
}

fn run_config(file: Option<PathBuf>, args: RunArgs) -> Result<RunConfig, ConfigError> {
    let base = match file {
        Some(path) => ConfigFile::load(&path)?,
        None => ConfigFile::default(),
    };
    RunConfig::try_from(base.overlay(args.into()))
}

fn http_client(config: &RunConfig) -> Result<Arc<dyn TrapiClient>, Box<dyn std::error::Error>> {
    let client_config = ClientConfig::new()
        .with_request_timeout(config.request_timeout)
        .with_probe_timeout(config.probe_timeout);
    Ok(Arc::new(HttpTrapiClient::new(client_config)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, args } => {
            let config = run_config(config, args)?;
            run_tests(config).await?;
        }
        Commands::Transforms => {
            list_transforms(&TransformRegistry::standard());
        }
        Commands::Resolve { args } => {
            let config = run_config(None, args)?;
            resolve_endpoints(config).await?;
        }
    }

    Ok(())
}

async fn run_tests(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = http_client(&config)?;
    let report_dir = config.report_dir.clone();
    let runner = OneHopTestRunner::new(RunContext::new(config, client));

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Run aborted: {}", e);
            return Err(e.into());
        }
    };

    let summary = &report.summary;
    println!("Run {} ({:?})", summary.run_id, summary.mode);
    for (kp, tally) in &summary.kps {
        println!(
            "  KP  {:<30} passed {:>4}  failed {:>4}  skipped {:>4}",
            kp, tally.passed, tally.failed, tally.skipped
        );
    }
    for (ara, kps) in &summary.aras {
        for (kp, tally) in kps {
            println!(
                "  ARA {:<30} passed {:>4}  failed {:>4}  skipped {:>4}",
                format!("{} / {}", ara, kp),
                tally.passed,
                tally.failed,
                tally.skipped
            );
        }
    }
    for excluded in &summary.excluded {
        println!(
            "  excluded {} {}: {}",
            excluded.component, excluded.infores, excluded.cause
        );
    }
    println!(
        "Report written to {}",
        report_dir.join(&summary.run_id).display()
    );
    Ok(())
}

fn list_transforms(registry: &TransformRegistry) {
    println!("Available transforms:");
    for descriptor in registry.descriptors() {
        println!(
            "  {:<5} {:<28} {}",
            descriptor.kind.code(),
            descriptor.kind.test_name(),
            descriptor.description
        );
    }
}

async fn resolve_endpoints(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = http_client(&config)?;
    let context = RunContext::new(config, client.clone());
    let entries = context.registry.entries().await?;
    let resolver = EndpointResolver::new(client, context.config.probe_timeout);

    let mut selected = select_resources(&entries, Component::Kp, &context.config.kp_filter);
    if !context.config.ara_filter.is_skip() {
        selected.extend(select_resources(&entries, Component::Ara, &context.config.ara_filter));
    }
    info!("Resolving {} resource(s)", selected.len());

    for entry in selected {
        match resolver.resolve(entry, context.config.environment).await {
            Ok(endpoint) => println!(
                "{} {}: {} ({})",
                entry.component, entry.infores, endpoint.url, endpoint.environment
            ),
            Err(e) => println!("{} {}: {}", entry.component, entry.infores, e),
        }
    }
    Ok(())
}
