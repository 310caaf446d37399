use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use tw_client::{MailboxClient, PipeClient, SocketClient};
use tw_domain::config::{ObservabilityConfig, ServerCommand};
use tw_cli::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let outcome = cli::serve::serve(cli::shutdown_on_signal()).await;
            shutdown_tracer(tracer_provider);
            outcome
        }
        Command::MailboxServer => {
            let config = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let outcome = cli::serve::mailbox_server(&config, cli::shutdown_on_signal()).await;
            shutdown_tracer(tracer_provider);
            outcome
        }
        Command::SocketAdapter { port, command } => {
            let config = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let outcome =
                cli::adapter::socket_adapter(&config, port, &command, cli::shutdown_on_signal()).await;
            shutdown_tracer(tracer_provider);
            outcome
        }
        Command::MailboxAdapter { command } => {
            let config = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let outcome =
                cli::adapter::mailbox_adapter(&config, &command, cli::shutdown_on_signal()).await;
            shutdown_tracer(tracer_provider);
            outcome
        }
        Command::Pipe { command } => {
            init_cli_tracing();
            let Some(command) = ServerCommand::from_argv(&command) else {
                eprintln!("usage: toolwire pipe <command> [args...]");
                std::process::exit(1);
            };
            cli::interactive::run(&PipeClient::new(command)).await
        }
        Command::Socket { host, port } => {
            init_cli_tracing();
            let config = cli::load_config()?;
            let host = host.unwrap_or_else(|| config.socket.host.clone());
            let port = match port {
                None => config.socket.port,
                Some(raw) => match raw.parse::<u16>() {
                    Ok(port) => port,
                    Err(_) => {
                        eprintln!("invalid port: {raw}");
                        eprintln!("usage: toolwire socket [host] [port]");
                        std::process::exit(1);
                    }
                },
            };
            let client = SocketClient::new(host, port)
                .with_request_timeout(config.socket.request_timeout());
            cli::interactive::run(&client).await
        }
        Command::Mailbox => {
            init_cli_tracing();
            let config = cli::load_config()?;
            cli::interactive::run(&MailboxClient::from_config(&config.mailbox)).await
        }
        Command::Version => {
            println!("toolwire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing on stderr for the long-running roles.  Stdout is
/// reserved for protocol traffic under `serve`.
///
/// When `otlp_endpoint` is configured an OpenTelemetry layer exports every
/// span over OTLP/gRPC.  The returned provider must be shut down on exit to
/// flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli::SERVICE_LOG_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr);

    match &obs.otlp_endpoint {
        Some(endpoint) => {
            let exporter = match opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
            {
                Ok(e) => e,
                Err(e) => {
                    eprintln!(
                        "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                         starting without OpenTelemetry"
                    );
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt_layer)
                        .init();
                    return None;
                }
            };

            let resource = opentelemetry_sdk::Resource::builder()
                .with_service_name(obs.service_name.clone())
                .build();

            let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                    obs.sample_rate,
                ))
                .with_resource(resource)
                .build();

            let otel_layer = tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer(cli::TRACER_NAME));

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            Some(tracer_provider)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();

            None
        }
    }
}

fn shutdown_tracer(provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
}

/// Compact stderr-only tracing for the interactive clients, quiet by
/// default so it stays out of the way of the prompts.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli::CLIENT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
