//! Log output and optional OTLP trace export.
//!
//! Logs go to stderr, pretty-printed or as one JSON object per line. Spans are
//! additionally exported over OTLP/gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//! set; the other standard `OTEL_*` variables tune the exporter.

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, fmt, str::FromStr, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug, warn};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as log_fmt, layer::SubscriberExt};
use ulid::Ulid;

const DEFAULT_OTLP_ENDPOINT_SCHEME: &str = "https://";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

impl LogFormat {
    pub const VARIANTS: [&'static str; 2] = ["pretty", "json"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown log format: {other}")),
        }
    }
}

/// Exporter settings taken from the `OTEL_EXPORTER_OTLP_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
    /// A non-gRPC protocol the user asked for; reported once logging is up.
    ignored_protocol: Option<String>,
}

impl OtlpSettings {
    /// `None` unless an endpoint is configured.
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty())?;

        Some(Self {
            endpoint: with_scheme(endpoint.trim()),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
            ignored_protocol: var("OTEL_EXPORTER_OTLP_PROTOCOL")
                .ok()
                .filter(|protocol| protocol != "grpc"),
        })
    }

    /// Host to verify the collector certificate against, for `https` endpoints.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }

    // Keys ending in "-bin" are binary metadata and carry base64 values.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = name.to_ascii_lowercase();
            if name.ends_with("-bin") {
                let bytes = Base64::decode_vec(value)
                    .map_err(|err| anyhow!("failed to base64-decode value for key {name}: {err}"))?;
                let key = MetadataKey::<Binary>::from_bytes(name.as_bytes())
                    .map_err(|err| anyhow!("invalid binary metadata key {name}: {err}"))?;
                metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
            } else {
                let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                    .map_err(|err| anyhow!("invalid ASCII metadata key {name}: {err}"))?;
                let value: MetadataValue<Ascii> = value
                    .parse()
                    .map_err(|err| anyhow!("invalid ASCII metadata value for key {name}: {err}"))?;
                metadata.insert(key, value);
            }
        }
        Ok(metadata)
    }

    fn exporter(&self) -> Result<SpanExporter> {
        let mut builder = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT);

        if let Some(host) = self.tls_domain() {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(host.to_string())
                    .with_native_roots(),
            );
        }
        if !self.headers.is_empty() {
            builder = builder.with_metadata(self.metadata()?);
        }

        builder.build().context("Failed to build OTLP span exporter")
    }

    fn tracer(&self) -> Result<Tracer> {
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(self.exporter()?)
            .with_resource(
                Resource::builder_empty()
                    .with_attributes(vec![
                        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                        KeyValue::new("service.instance.id", self.instance_id.clone()),
                    ])
                    .build(),
            )
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// `k1=v1,k2=v2`; entries without `=` are dropped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!(
            "{DEFAULT_OTLP_ENDPOINT_SCHEME}{}",
            endpoint.trim_end_matches('/')
        )
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

fn log_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => log_fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_target(false)
            .pretty()
            .boxed(),
        LogFormat::Json => log_fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
}

/// Install the global subscriber. `level` defaults to `ERROR`.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a global subscriber is
/// already installed.
pub fn init(level: Option<Level>, format: LogFormat) -> Result<()> {
    let settings = OtlpSettings::from_env();
    let otel_layer = match &settings {
        Some(settings) => Some(tracing_opentelemetry::layer().with_tracer(settings.tracer()?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(log_layer(format))
        .with(otel_layer)
        .with(env_filter(level.unwrap_or(Level::ERROR))?);
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(settings) = &settings {
        debug!(endpoint = %settings.endpoint, "exporting traces over OTLP/gRPC");
        if let Some(protocol) = &settings.ignored_protocol {
            warn!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored: only 'grpc' is supported");
        }
    }

    Ok(())
}

/// Flush pending spans; a no-op when tracing was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        debug!("tracer provider shutdown failed: {err}");
    }
}
