//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{ArgGroup, Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SITE_TITLE: &str = "Quire";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/";
const DEFAULT_CONTENT_DIR: &str = "content/posts";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_OUTPUT_DIR: &str = "public";
const DEFAULT_BUILD_CONCURRENCY: usize = 8;
const DEFAULT_ROUTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PDS_URL: &str = "https://bsky.social";
const DEFAULT_PUBLICATION_RKEY: &str = "self";
const DEFAULT_MAPPING_PATH: &str = "state/mappings.toml";
const DEFAULT_PASS_DEADLINE_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Static blog builder with an AT Protocol mirror")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the site live.
    Serve(ServeArgs),
    /// Render every route into the output directory.
    Build(BuildArgs),
    /// Push local posts to the remote repository.
    Publish(MirrorArgs),
    /// Bring remote documents back into the content directory.
    Pull(MirrorArgs),
    /// Check the ownership signals a published site exposes.
    Verify(VerifyArgs),
    /// Drop the mapping of a post whose remote record was deleted.
    Forget(ForgetArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct SiteOverrides {
    /// Override the public origin used for canonical URLs.
    #[arg(long = "base-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub base_url: Option<String>,

    /// Override the directory holding post sources.
    #[arg(long = "content-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub content_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub site: SiteOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub site: SiteOverrides,

    /// Override the output directory.
    #[arg(long = "output-dir", short = 'o', value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of routes rendered at once.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Per-route render timeout.
    #[arg(long = "route-timeout-seconds", value_name = "SECONDS")]
    pub route_timeout_seconds: Option<u64>,

    /// Abort when any content record fails validation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MirrorOverrides {
    /// Override the personal data server URL.
    #[arg(long = "pds-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub pds_url: Option<String>,

    /// Override the account handle or DID used to log in.
    #[arg(long, value_name = "HANDLE")]
    pub identifier: Option<String>,

    /// Override the repository DID the site claims.
    #[arg(long, value_name = "DID")]
    pub did: Option<String>,

    /// Override the mapping table location.
    #[arg(long = "mapping-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub mapping_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MirrorArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub site: SiteOverrides,

    #[command(flatten)]
    pub mirror: MirrorOverrides,
}

#[derive(Debug, Args, Default, Clone)]
#[command(group(ArgGroup::new("target").args(["site_url", "dir"])))]
pub struct VerifyArgs {
    #[command(flatten)]
    pub mirror: MirrorArgs,

    /// Probe a live site; defaults to `site.base_url`.
    #[arg(long = "site-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub site_url: Option<String>,

    /// Probe a built output directory instead of a live site.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub dir: Option<PathBuf>,

    /// Posts to check; every local post when omitted.
    #[arg(value_name = "SLUG")]
    pub slugs: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ForgetArgs {
    #[command(flatten)]
    pub mirror: MirrorArgs,

    /// Slug whose mapping should be dropped.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub build: BuildSettings,
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub title: String,
    pub description: String,
    pub base_url: Url,
    pub content_dir: PathBuf,
    /// Passthrough assets; absent when the directory is not configured.
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub output_dir: PathBuf,
    pub concurrency: NonZeroUsize,
    pub route_timeout: Duration,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub pds_url: Url,
    pub identifier: Option<String>,
    pub secret: Option<String>,
    pub did: Option<String>,
    pub publication_rkey: String,
    pub mapping_path: PathBuf,
    pub pass_deadline: Duration,
    pub request_timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("QUIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(args),
        Some(Command::Build(args)) => raw.apply_build_overrides(args),
        Some(Command::Publish(args)) | Some(Command::Pull(args)) => {
            raw.apply_mirror_overrides(args)
        }
        Some(Command::Verify(args)) => raw.apply_mirror_overrides(&args.mirror),
        Some(Command::Forget(args)) => raw.apply_mirror_overrides(&args.mirror),
        None => raw.apply_serve_overrides(&ServeArgs::default()),
    }

    Settings::from_raw(raw)
}

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
    site: RawSiteSettings,
    build: RawBuildSettings,
    mirror: RawMirrorSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_site_overrides(&mut self, overrides: &SiteOverrides) {
        if let Some(base_url) = overrides.base_url.as_ref() {
            self.site.base_url = Some(base_url.clone());
        }
        if let Some(dir) = overrides.content_dir.as_ref() {
            self.site.content_dir = Some(dir.clone());
        }
    }

    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        self.apply_logging_overrides(&args.logging);
        self.apply_site_overrides(&args.site);
        if let Some(host) = args.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = args.server_port {
            self.server.port = Some(port);
        }
    }

    fn apply_build_overrides(&mut self, args: &BuildArgs) {
        self.apply_logging_overrides(&args.logging);
        self.apply_site_overrides(&args.site);
        if let Some(dir) = args.output_dir.as_ref() {
            self.build.output_dir = Some(dir.clone());
        }
        if let Some(concurrency) = args.concurrency {
            self.build.concurrency = Some(concurrency);
        }
        if let Some(seconds) = args.route_timeout_seconds {
            self.build.route_timeout_seconds = Some(seconds);
        }
        if args.strict {
            self.build.strict = Some(true);
        }
    }

    fn apply_mirror_overrides(&mut self, args: &MirrorArgs) {
        self.apply_logging_overrides(&args.logging);
        self.apply_site_overrides(&args.site);
        let overrides = &args.mirror;
        if let Some(url) = overrides.pds_url.as_ref() {
            self.mirror.pds_url = Some(url.clone());
        }
        if let Some(identifier) = overrides.identifier.as_ref() {
            self.mirror.identifier = Some(identifier.clone());
        }
        if let Some(did) = overrides.did.as_ref() {
            self.mirror.did = Some(did.clone());
        }
        if let Some(path) = overrides.mapping_path.as_ref() {
            self.mirror.mapping_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            server: build_server_settings(raw.server)?,
            logging: build_logging_settings(raw.logging)?,
            site: build_site_settings(raw.site)?,
            build: build_build_settings(raw.build)?,
            mirror: build_mirror_settings(raw.mirror)?,
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

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let raw_url = non_empty(site.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("site.base_url", format!("`{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") || base_url.host_str().is_none() {
        return Err(LoadError::invalid(
            "site.base_url",
            "must be an absolute http(s) origin",
        ));
    }

    let static_dir = match site.static_dir {
        Some(dir) if dir.as_os_str().is_empty() => None,
        Some(dir) => Some(dir),
        None => Some(PathBuf::from(DEFAULT_STATIC_DIR)),
    };

    Ok(SiteSettings {
        title: non_empty(site.title).unwrap_or_else(|| DEFAULT_SITE_TITLE.to_string()),
        description: site.description.unwrap_or_default().trim().to_string(),
        base_url,
        content_dir: site
            .content_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR)),
        static_dir,
    })
}

fn build_build_settings(build: RawBuildSettings) -> Result<BuildSettings, LoadError> {
    let concurrency = build.concurrency.unwrap_or(DEFAULT_BUILD_CONCURRENCY);
    let concurrency = NonZeroUsize::new(concurrency)
        .ok_or_else(|| LoadError::invalid("build.concurrency", "must be greater than zero"))?;

    Ok(BuildSettings {
        output_dir: build
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        concurrency,
        route_timeout: positive_seconds(
            build.route_timeout_seconds.unwrap_or(DEFAULT_ROUTE_TIMEOUT_SECS),
            "build.route_timeout_seconds",
        )?,
        strict: build.strict.unwrap_or(false),
    })
}

fn build_mirror_settings(mirror: RawMirrorSettings) -> Result<MirrorConfig, LoadError> {
    let raw_url = non_empty(mirror.pds_url).unwrap_or_else(|| DEFAULT_PDS_URL.to_string());
    let pds_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("mirror.pds_url", format!("`{raw_url}`: {err}")))?;

    let did = non_empty(mirror.did);
    if let Some(did) = did.as_deref()
        && !did.starts_with("did:")
    {
        return Err(LoadError::invalid(
            "mirror.did",
            format!("`{did}` is not a DID"),
        ));
    }

    let publication_rkey = non_empty(mirror.publication_rkey)
        .unwrap_or_else(|| DEFAULT_PUBLICATION_RKEY.to_string());
    if publication_rkey.contains('/') {
        return Err(LoadError::invalid(
            "mirror.publication_rkey",
            "must be a single record key",
        ));
    }

    Ok(MirrorConfig {
        pds_url,
        identifier: non_empty(mirror.identifier),
        secret: non_empty(mirror.secret),
        did,
        publication_rkey,
        mapping_path: mirror
            .mapping_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_PATH)),
        pass_deadline: positive_seconds(
            mirror
                .pass_deadline_seconds
                .unwrap_or(DEFAULT_PASS_DEADLINE_SECS),
            "mirror.pass_deadline_seconds",
        )?,
        request_timeout: positive_seconds(
            mirror
                .request_timeout_seconds
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            "mirror.request_timeout_seconds",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    title: Option<String>,
    description: Option<String>,
    base_url: Option<String>,
    content_dir: Option<PathBuf>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildSettings {
    output_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    route_timeout_seconds: Option<u64>,
    strict: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMirrorSettings {
    pds_url: Option<String>,
    identifier: Option<String>,
    secret: Option<String>,
    did: Option<String>,
    publication_rkey: Option<String>,
    mapping_path: Option<PathBuf>,
    pass_deadline_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
