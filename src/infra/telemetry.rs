use std::{
    backtrace::Backtrace,
    cell::RefCell,
    panic,
    sync::Once,
};

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::{ErrorLayer, SpanTrace};
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();
static PANIC_HOOK: Once = Once::new();

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicTrace>> = const { RefCell::new(None) };
}

/// Diagnostics captured at the panic site.
#[derive(Debug, Clone)]
pub struct PanicTrace {
    pub location: Option<String>,
    pub backtrace: String,
    pub span_trace: String,
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();
    install_panic_hook();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Record a backtrace and span trace for every panic, on the panicking thread.
///
/// The previous hook still runs, so panics outside request handling keep their default
/// report.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = PanicTrace {
                location: info
                    .location()
                    .map(|location| format!("{}:{}", location.file(), location.line())),
                backtrace: Backtrace::force_capture().to_string(),
                span_trace: SpanTrace::capture().to_string(),
            };
            LAST_PANIC.with(|slot| {
                slot.replace(Some(trace));
            });
            if !tracing::dispatcher::has_been_set() {
                previous(info);
            }
        }));
    });
}

/// Take the trace recorded by the most recent panic on this thread.
pub fn take_panic_trace() -> Option<PanicTrace> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "presswork_conversions_total",
            Unit::Count,
            "Total number of conversions by format and outcome."
        );
        describe_histogram!(
            "presswork_conversion_ms",
            Unit::Milliseconds,
            "Conversion latency in milliseconds, working directory setup to artifact."
        );
        describe_counter!(
            "presswork_image_downloads_total",
            Unit::Count,
            "Total number of remote image downloads by outcome."
        );
    });
}
