use std::{process::ExitCode, sync::Arc};

use quire::{
    application::{
        build::{BuildConfig, BuildReport, BuildService},
        error::AppError,
        mirror::{MirrorError, MirrorService, MirrorSettings, SyncReport},
        render::Renderer,
        repos::{ContentRepo, SiteProbe},
        site::{SiteProfile, SiteService},
    },
    config::{self, Command, ForgetArgs, Settings, VerifyArgs},
    infra::{
        artifacts::FsArtifactWriter,
        atproto::XrpcClient,
        content::FsContentRepo,
        error::InfraError,
        http::{self, HttpState},
        mapping::TomlMappingStore,
        probe::{DirectoryProbe, HttpProbe},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

/// Whether a command finished without per-item failures.
enum Completion {
    Clean,
    WithFailures,
}

impl Completion {
    fn from_success(success: bool) -> Self {
        if success { Self::Clean } else { Self::WithFailures }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Completion::Clean) => ExitCode::SUCCESS,
        Ok(Completion::WithFailures) => ExitCode::FAILURE,
        Err(error) => {
            report_application_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(target = "quire::main", error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(target = "quire::main", error = %error, "application error");
    });
}

async fn run() -> Result<Completion, AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(config::ServeArgs::default()));

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Build(_) => run_build(settings).await,
        Command::Publish(_) => run_publish(settings).await,
        Command::Pull(_) => run_pull(settings).await,
        Command::Verify(args) => run_verify(settings, args).await,
        Command::Forget(args) => run_forget(settings, args).await,
    }
}

fn content_repo(settings: &Settings) -> Arc<dyn ContentRepo> {
    Arc::new(FsContentRepo::new(&settings.site.content_dir))
}

fn site_service(settings: &Settings, content: Arc<dyn ContentRepo>) -> Result<SiteService, AppError> {
    let mut profile = SiteProfile::new(
        settings.site.title.clone(),
        settings.site.description.clone(),
        settings.site.base_url.as_str(),
    )
    .map_err(|err| AppError::validation(err.to_string()))?;
    if let Some(did) = settings.mirror.did.as_deref() {
        profile = profile.with_identity(did, settings.mirror.publication_rkey.clone());
    }
    Ok(SiteService::new(content, profile))
}

fn router(settings: &Settings, site: SiteService) -> axum::Router {
    http::build_router(HttpState {
        site: Arc::new(site),
        static_dir: settings.site.static_dir.clone(),
    })
}

async fn run_serve(settings: Settings) -> Result<Completion, AppError> {
    let site = site_service(&settings, content_repo(&settings))?;
    let app = router(&settings, site);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "quire::main",
        addr = %settings.server.addr,
        content_dir = %settings.site.content_dir.display(),
        "serving site"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(Completion::Clean)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "quire::main", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "quire::main", "shutdown requested");
}

async fn run_build(settings: Settings) -> Result<Completion, AppError> {
    let content = content_repo(&settings);
    let site = site_service(&settings, content.clone())?;
    let renderer = Renderer::new(router(&settings, site));
    let writer = FsArtifactWriter::new(&settings.build.output_dir);
    let output = writer.root().to_path_buf();

    let service = BuildService::new(content, renderer, Arc::new(writer));
    let config = BuildConfig {
        base_url: settings.site.base_url.to_string(),
        concurrency: settings.build.concurrency,
        route_timeout: settings.build.route_timeout,
        strict: settings.build.strict,
        static_dir: settings.site.static_dir.clone(),
        publication_descriptor: settings.mirror.did.is_some(),
    };

    let report = service.build(&config).await?;
    print_build_report(&report);
    info!(
        target = "quire::main",
        output = %output.display(),
        written = report.written.len(),
        failures = report.failures.len(),
        "build finished"
    );
    Ok(Completion::from_success(report.is_success()))
}

fn print_build_report(report: &BuildReport) {
    println!(
        "wrote {} artifacts ({} assets)",
        report.written.len(),
        report.assets_copied
    );
    for rejected in &report.rejected {
        println!("  rejected {}: {rejected}", rejected.subject());
    }
    for failure in &report.failures {
        println!("  failed   {}: {}", failure.target, failure.error);
    }
    for link in &report.dangling_links {
        println!("  dangling {link}");
    }
    if report.aux_after_page_failures {
        println!("  feed, sitemap and robots were written although some pages failed");
    }
}

async fn mirror_service(
    settings: &Settings,
    content: Arc<dyn ContentRepo>,
) -> Result<MirrorService, AppError> {
    let mirror = &settings.mirror;
    let mappings = TomlMappingStore::open(&mirror.mapping_path)
        .await
        .map_err(MirrorError::from)?;
    let remote = XrpcClient::new(mirror.pds_url.as_str(), mirror.request_timeout)?;

    let description = Some(settings.site.description.clone()).filter(|d| !d.is_empty());
    Ok(MirrorService::new(
        content,
        Arc::new(mappings),
        Arc::new(remote),
        MirrorSettings {
            identifier: mirror.identifier.clone().unwrap_or_default(),
            secret: mirror.secret.clone().unwrap_or_default(),
            expected_did: mirror.did.clone(),
            publication_rkey: mirror.publication_rkey.clone(),
            site_url: settings.site.base_url.to_string(),
            site_name: settings.site.title.clone(),
            site_description: description,
            pass_deadline: mirror.pass_deadline,
        },
    ))
}

fn print_sync_report(pass: &str, report: &SyncReport) {
    for item in &report.items {
        println!("  {:<40} {}", item.slug, item.outcome);
    }
    let counts = report.counts();
    println!(
        "{pass}: {} synced, {} skipped, {} errored, {} conflicted, {} deferred",
        counts.synced, counts.skipped, counts.errored, counts.conflicted, counts.deferred
    );
}

async fn run_publish(settings: Settings) -> Result<Completion, AppError> {
    let content = content_repo(&settings);
    let mirror = mirror_service(&settings, content.clone()).await?;

    let records = content.list_records().await.map_err(MirrorError::from)?;
    let report = mirror.publish(records).await?;
    print_sync_report("publish", &report);
    Ok(Completion::from_success(report.is_success()))
}

async fn run_pull(settings: Settings) -> Result<Completion, AppError> {
    let mirror = mirror_service(&settings, content_repo(&settings)).await?;

    let remote = mirror.fetch_remote_documents().await?;
    let report = mirror.pull(remote).await?;
    print_sync_report("pull", &report);
    Ok(Completion::from_success(report.is_success()))
}

async fn run_verify(settings: Settings, args: VerifyArgs) -> Result<Completion, AppError> {
    let content = content_repo(&settings);
    let mirror = mirror_service(&settings, content.clone()).await?;

    let probe: Box<dyn SiteProbe> = match (&args.dir, &args.site_url) {
        (Some(dir), _) => Box::new(DirectoryProbe::new(dir)),
        (None, site_url) => {
            let base = match site_url {
                Some(raw) => Url::parse(raw).map_err(|err| {
                    AppError::validation(format!("invalid --site-url `{raw}`: {err}"))
                })?,
                None => settings.site.base_url.clone(),
            };
            Box::new(HttpProbe::new(base, settings.mirror.request_timeout)?)
        }
    };

    let slugs = if args.slugs.is_empty() {
        site_service(&settings, content)?
            .published()
            .await?
            .into_iter()
            .map(|record| record.slug)
            .collect()
    } else {
        args.slugs
    };

    let report = mirror.verify(probe.as_ref(), &slugs).await?;
    match &report.publication {
        Some(uri) => println!("publication {uri}"),
        None => println!("publication descriptor unavailable"),
    }
    for item in &report.items {
        println!("  {:<8} {:<40} {}", item.status, item.slug, item.detail);
    }
    let status = report.status();
    println!("verify: {status}");
    Ok(Completion::from_success(report.is_success()))
}

async fn run_forget(settings: Settings, args: ForgetArgs) -> Result<Completion, AppError> {
    let mirror = mirror_service(&settings, content_repo(&settings)).await?;
    let forgotten = mirror.forget(&args.slug).await?;
    println!("forgot {} ({})", forgotten.slug, forgotten.uri);
    Ok(Completion::Clean)
}
