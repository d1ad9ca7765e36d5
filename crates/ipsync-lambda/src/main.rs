// # ipsync-lambda
//
// Thin Lambda shell over ipsync-core. It is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging
// 3. Registering stores and sources, building the components
// 4. Handing every event to the dispatcher
//
// No reconciliation, retry or lifecycle logic lives here.
//
// ## Configuration
//
// ### Target IP set
// - `IPSYNC_IPSET_NAME` (or `IPSET_NAME`): IP set name (required)
// - `IPSYNC_IPSET_SCOPE`: regional, cloudfront
// - `IPSYNC_ADDRESS_FAMILY`: v4, v6
// - `IPSYNC_CAPACITY`, `IPSYNC_MAX_MUTATIONS`: service limits
//
// ### Ranges
// - `IPSYNC_SERVICE` (or `SERVICE`): service filter
// - `IPSYNC_REGIONS`: comma-separated region filter
// - `IPSYNC_SOURCE_URL`: published document
//
// ### Store
// - `IPSYNC_STORE_TYPE`: wafv2, file, memory
// - `IPSYNC_STORE_PATH`: path (for file)
// - `IPSYNC_MODE=dry-run`: log WAF updates without making them
//
// ### Behaviour
// - `IPSYNC_MAX_ATTEMPTS`, `IPSYNC_REJECT_STALE`, `IPSYNC_LIFECYCLE_DEADLINE_SECS`
// - `IPSYNC_LOG_LEVEL` (or `DEBUG=true`)

mod callback;
mod config;
mod handler;
mod invoker;

use anyhow::Result;
use ipsync_core::config::StoreConfig;
use ipsync_core::traits::{IpRangeSource, IpSetStore, ReconcileInvoker};
use ipsync_core::{
    BackendRegistry, LifecycleGateway, LocalInvoker, NotificationHandler, Reconciler, Seeder,
};
use lambda_runtime::{Diagnostic, LambdaEvent, service_fn};
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use callback::HttpCallbackSink;
use config::Config;
use handler::App;
use invoker::LambdaInvoker;

/// Timeout for the lifecycle response PUT
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum IpsyncExitCode {
    /// Runtime loop ended normally
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<IpsyncExitCode> for ExitCode {
    fn from(code: IpsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// JSON logs for CloudWatch, which adds its own timestamps
fn init_tracing(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(level.to_lowercase()))
        .with_current_span(false)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return IpsyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return IpsyncExitCode::ConfigError.into();
    }

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("{}", e);
        return IpsyncExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpsyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let app = match build_app(&config).await {
            Ok(app) => Arc::new(app),
            Err(e) => {
                error!("Startup error: {}", e);
                return IpsyncExitCode::ConfigError;
            }
        };

        let result = lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
            let app = app.clone();
            async move { invoke(&app, event).await }
        }))
        .await;

        match result {
            Ok(()) => IpsyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Runtime error: {}", e);
                IpsyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Run one event, reporting failures with their classification as the error type
async fn invoke(app: &App, event: LambdaEvent<Value>) -> Result<Value, Diagnostic> {
    let remaining = handler::remaining_time(event.context.deadline);
    app.dispatch(event.payload, remaining)
        .await
        .map_err(|e| Diagnostic {
            error_type: e.kind().to_string(),
            error_message: e.to_string(),
        })
}

/// Build every component from configuration
async fn build_app(config: &Config) -> Result<App> {
    let sync = config.to_sync_config()?;
    info!(
        "Starting ipsync for {} (service {}, store {})",
        sync.ip_set.to_ref(),
        sync.filter.service,
        sync.store.type_name()
    );

    let aws = aws_config::load_from_env().await;

    let registry = BackendRegistry::with_local_stores();
    ipsync_source_http::register(&registry);
    ipsync_store_wafv2::register(&registry, aws_sdk_wafv2::Client::new(&aws));

    let store: Arc<dyn IpSetStore> = Arc::from(registry.create_store(&sync).await?);
    let source: Arc<dyn IpRangeSource> = Arc::from(registry.create_source(&sync.source)?);

    let reconciler = Arc::new(
        Reconciler::new(store, sync.reconciler.clone()).with_service(sync.filter.service.clone()),
    );
    let notifications = Arc::new(NotificationHandler::new(
        source,
        reconciler,
        sync.range_filter(),
    ));

    // Local stores live in this process, so the seed must run here too
    let invoker: Arc<dyn ReconcileInvoker> = match sync.store {
        StoreConfig::Wafv2 { .. } => {
            Arc::new(LambdaInvoker::new(aws_sdk_lambda::Client::new(&aws)))
        }
        _ => Arc::new(LocalInvoker::new(notifications.clone())),
    };

    let seeder = Arc::new(Seeder::new(invoker, sync.source_url()));
    let sink = Arc::new(HttpCallbackSink::new(CALLBACK_TIMEOUT)?);
    let log_hint = match std::env::var("AWS_LAMBDA_LOG_STREAM_NAME") {
        Ok(stream) => format!("CloudWatch Log Stream: {}", stream),
        Err(_) => "the function logs".to_string(),
    };
    let gateway =
        LifecycleGateway::new(seeder, sink, sync.lifecycle.clone()).with_log_hint(log_hint);

    Ok(App::new(
        gateway,
        notifications,
        sync.lifecycle.safety_margin(),
    ))
}
