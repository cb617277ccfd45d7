//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "presswork";
const ENV_PREFIX: &str = "PRESSWORK";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CORS_ALLOW_ORIGIN: &str = "*";
const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONTENT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EBOOK_CONVERTER: &str = "ebook-convert";
const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IMAGE_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Command-line arguments for the presswork binary.
#[derive(Debug, Parser)]
#[command(name = "presswork", version, about = "Document conversion service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSWORK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the conversion HTTP service.
    Serve(Box<ServeArgs>),
    /// Discover the external renderer and e-book converter, print what was found, and exit.
    Probe(ProbeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub renderer: RendererOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RendererOverrides {
    /// Override the renderer search paths (`:`-separated directories).
    #[arg(long = "renderer-search-paths", value_name = "PATHS")]
    pub search_paths: Option<String>,

    /// Pin the bundler-wrapped renderer invocation to this Gemfile.
    #[arg(long = "renderer-gemfile", value_name = "PATH")]
    pub gemfile: Option<PathBuf>,

    /// Override the e-book converter executable used for Kindle formats.
    #[arg(long = "renderer-ebook-converter", value_name = "PATH")]
    pub ebook_converter: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub renderer: RendererOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the CORS origin allow-pattern (comma separated, `*` wildcards).
    #[arg(long = "cors-allow-origin", value_name = "PATTERN")]
    pub cors_allow_origin: Option<String>,

    /// Override the per-request conversion timeout.
    #[arg(long = "conversion-timeout-seconds", value_name = "SECONDS")]
    pub conversion_timeout_seconds: Option<u64>,

    /// Override the document size ceiling in bytes.
    #[arg(long = "conversion-max-content-bytes", value_name = "BYTES")]
    pub conversion_max_content_bytes: Option<u64>,

    /// Override the root directory for per-request working directories.
    #[arg(long = "conversion-temp-dir", value_name = "PATH")]
    pub conversion_temp_dir: Option<PathBuf>,

    /// Override the per-image download timeout.
    #[arg(long = "images-download-timeout-seconds", value_name = "SECONDS")]
    pub images_download_timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Enable debug logging.
    #[arg(
        long = "debug",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cors: CorsSettings,
    pub conversion: ConversionSettings,
    pub renderer: RendererSettings,
    pub images: ImageSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub debug: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub allow_origin: String,
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub timeout: Duration,
    pub max_content_bytes: NonZeroUsize,
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub search_paths: Vec<PathBuf>,
    pub gemfile: Option<PathBuf>,
    pub probe_timeout: Duration,
    pub ebook_converter: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub download_timeout: Duration,
    pub max_bytes: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Probe(args)) => raw.apply_renderer_overrides(&args.renderer),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cors: RawCorsSettings,
    conversion: RawConversionSettings,
    renderer: RawRendererSettings,
    images: RawImageSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(pattern) = overrides.cors_allow_origin.as_ref() {
            self.cors.allow_origin = Some(pattern.clone());
        }
        if let Some(seconds) = overrides.conversion_timeout_seconds {
            self.conversion.timeout_seconds = Some(seconds);
        }
        if let Some(bytes) = overrides.conversion_max_content_bytes {
            self.conversion.max_content_bytes = Some(bytes);
        }
        if let Some(dir) = overrides.conversion_temp_dir.as_ref() {
            self.conversion.temp_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.images_download_timeout_seconds {
            self.images.download_timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(debug) = overrides.debug {
            self.logging.debug = Some(debug);
        }

        self.apply_renderer_overrides(&overrides.renderer);
    }

    fn apply_renderer_overrides(&mut self, overrides: &RendererOverrides) {
        if let Some(paths) = overrides.search_paths.as_ref() {
            self.renderer.search_paths = Some(paths.clone());
        }
        if let Some(gemfile) = overrides.gemfile.as_ref() {
            self.renderer.gemfile = Some(gemfile.clone());
        }
        if let Some(converter) = overrides.ebook_converter.as_ref() {
            self.renderer.ebook_converter = Some(converter.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cors,
            conversion,
            renderer,
            images,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cors: build_cors_settings(cors)?,
            conversion: build_conversion_settings(conversion)?,
            renderer: build_renderer_settings(renderer)?,
            images: build_image_settings(images)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = non_zero_seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let debug = logging.debug.unwrap_or(false);
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None if debug => LevelFilter::DEBUG,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(true) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings {
        level,
        format,
        debug,
    })
}

fn build_cors_settings(cors: RawCorsSettings) -> Result<CorsSettings, LoadError> {
    let allow_origin = cors
        .allow_origin
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CORS_ALLOW_ORIGIN.to_string());
    if allow_origin.is_empty() {
        return Err(LoadError::invalid(
            "cors.allow_origin",
            "pattern must not be empty",
        ));
    }

    Ok(CorsSettings { allow_origin })
}

fn build_conversion_settings(
    conversion: RawConversionSettings,
) -> Result<ConversionSettings, LoadError> {
    let timeout_secs = conversion
        .timeout_seconds
        .unwrap_or(DEFAULT_CONVERSION_TIMEOUT_SECS);
    let timeout = non_zero_seconds(timeout_secs, "conversion.timeout_seconds")?;

    let max_bytes_value = conversion
        .max_content_bytes
        .unwrap_or(DEFAULT_MAX_CONTENT_BYTES);
    let max_bytes_usize = usize::try_from(max_bytes_value).map_err(|_| {
        LoadError::invalid(
            "conversion.max_content_bytes",
            "value exceeds supported range for usize",
        )
    })?;
    let max_content_bytes = NonZeroUsize::new(max_bytes_usize).ok_or_else(|| {
        LoadError::invalid("conversion.max_content_bytes", "must be greater than zero")
    })?;

    let temp_dir = conversion.temp_dir.unwrap_or_else(std::env::temp_dir);
    if temp_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "conversion.temp_dir",
            "path must not be empty",
        ));
    }

    Ok(ConversionSettings {
        timeout,
        max_content_bytes,
        temp_dir,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let search_paths = renderer
        .search_paths
        .as_deref()
        .map(|value| {
            std::env::split_paths(value)
                .filter(|path| !path.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let gemfile = renderer
        .gemfile
        .filter(|path| !path.as_os_str().is_empty());

    let probe_secs = renderer
        .probe_timeout_seconds
        .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);
    let probe_timeout = non_zero_seconds(probe_secs, "renderer.probe_timeout_seconds")?;

    let ebook_converter = renderer
        .ebook_converter
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EBOOK_CONVERTER));
    if ebook_converter.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "renderer.ebook_converter",
            "path must not be empty",
        ));
    }

    Ok(RendererSettings {
        search_paths,
        gemfile,
        probe_timeout,
        ebook_converter,
    })
}

fn build_image_settings(images: RawImageSettings) -> Result<ImageSettings, LoadError> {
    let timeout_secs = images
        .download_timeout_seconds
        .unwrap_or(DEFAULT_IMAGE_TIMEOUT_SECS);
    let download_timeout = non_zero_seconds(timeout_secs, "images.download_timeout_seconds")?;

    let max_bytes = NonZeroU64::new(images.max_bytes.unwrap_or(DEFAULT_IMAGE_MAX_BYTES))
        .ok_or_else(|| LoadError::invalid("images.max_bytes", "must be greater than zero"))?;

    Ok(ImageSettings {
        download_timeout,
        max_bytes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    debug: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    allow_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConversionSettings {
    timeout_seconds: Option<u64>,
    max_content_bytes: Option<u64>,
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    search_paths: Option<String>,
    gemfile: Option<PathBuf>,
    probe_timeout_seconds: Option<u64>,
    ebook_converter: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageSettings {
    download_timeout_seconds: Option<u64>,
    max_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
