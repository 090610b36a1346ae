//! Aggregation command line
//!
//! Loads the dashboard settings and a request context file, runs one
//! aggregation and prints the result as JSON on stdout.

use aggregation::metering::{Query, QueryOp, QueryTerm};
use aggregation::{
    telemetry, AggregationService, ClientFactory, FloatingIpManager, UsageDescriptor,
};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use horizon_shared::{ConfigGate, ConfigOverrides, RequestContext, ServiceCatalog, Token};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Request context as stored on disk by the web layer
#[derive(Debug, Deserialize)]
struct ContextFile {
    token: String,
    tenant_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    superuser: bool,
    catalog: ServiceCatalog,
}

fn cli() -> Command {
    Command::new("aggregation")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Federates cloud services into quota, metering and floating IP views")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .default_value("config/aggregation.yaml"),
        )
        .arg(
            Arg::new("context")
                .long("context")
                .value_name("FILE")
                .help("Request context JSON file (token, tenant and catalog)"),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .value_name("REGION")
                .help("Catalog region (overrides config)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (overrides config)")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("validate-config")
                .long("validate-config")
                .help("Validate configuration and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(Command::new("quota-usages").about("Quota usage rows for the tenant"))
        .subcommand(
            Command::new("metering")
                .about("Global metering usage table")
                .arg(
                    Arg::new("descriptor")
                        .long("descriptor")
                        .value_name("NAME")
                        .help("Usage table to build")
                        .value_parser(["disk", "network_traffic", "network", "object_store"])
                        .default_value("disk"),
                )
                .arg(
                    Arg::new("since")
                        .long("since")
                        .value_name("TIMESTAMP")
                        .help("Only count samples from this ISO-8601 timestamp on"),
                )
                .arg(
                    Arg::new("no-statistics")
                        .long("no-statistics")
                        .help("List resources without fetching statistics")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("floating-ips")
                .about("Floating IPs of the tenant")
                .arg(
                    Arg::new("targets")
                        .long("targets")
                        .help("List association targets instead")
                        .action(ArgAction::SetTrue),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .context("missing --config")?,
    );
    let config = if config_path.exists() {
        ConfigGate::from_file(&config_path)
            .await
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        ConfigGate::from_env().context("Failed to load config from environment")?
    };

    let overrides = ConfigOverrides {
        region: matches.get_one::<String>("region").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        ..Default::default()
    };
    let config = config.merge_with_overrides(overrides)?;

    telemetry::init_tracing(&config.logging)?;
    if !config_path.exists() {
        warn!(path = %config_path.display(), "settings file not found, using environment");
    }

    if matches.get_flag("validate-config") {
        config.validate()?;
        info!("configuration is valid");
        return Ok(());
    }

    let context_path = matches
        .get_one::<String>("context")
        .context("--context is required to run an aggregation")?;
    let ctx = load_context(context_path, config).await?;
    let factory = ClientFactory::from_config(ctx.config()).await?;
    let service = AggregationService::with_factory(factory);

    match matches.subcommand() {
        Some(("quota-usages", _)) => {
            let usages = service.tenant_quota_usages(&ctx).await?;
            print_json(&usages)?;
        }
        Some(("metering", sub)) => run_metering(&service, &ctx, sub).await?,
        Some(("floating-ips", sub)) => {
            let manager = service.floating_ips(&ctx)?;
            if sub.get_flag("targets") {
                print_json(&manager.list_targets().await?)?;
            } else {
                print_json(&manager.list().await?)?;
            }
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}

async fn load_context(path: &str, config: ConfigGate) -> Result<RequestContext> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read context file {}", path))?;
    let file: ContextFile =
        serde_json::from_str(&content).context("Failed to parse context file")?;

    let timeout = config.request_timeout();
    info!(tenant_id = %file.tenant_id, user_id = %file.user_id, "request context loaded");

    Ok(RequestContext::builder(
        Token::new(file.token, None),
        file.tenant_id,
        Arc::new(file.catalog),
        Arc::new(config),
    )
    .user(file.user_id, file.username)
    .superuser(file.superuser)
    .timeout(timeout)
    .build())
}

async fn run_metering(
    service: &AggregationService,
    ctx: &RequestContext,
    matches: &ArgMatches,
) -> Result<()> {
    let name = matches
        .get_one::<String>("descriptor")
        .context("missing --descriptor")?;
    let descriptor = UsageDescriptor::by_name(name)
        .with_context(|| format!("Unknown usage table: {}", name))?;

    let window = matches
        .get_one::<String>("since")
        .map(|since| Query::new(vec![QueryTerm::new("timestamp", QueryOp::Ge, since.clone())]));

    let usage = service.metering(ctx)?;
    let records = usage
        .global_data_get(
            &descriptor,
            None,
            !matches.get_flag("no-statistics"),
            window.as_ref(),
            true,
        )
        .await?;

    info!(table = %descriptor.name, rows = records.len(), "metering table built");
    print_json(&records)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render result")?;
    println!("{}", rendered);
    Ok(())
}
