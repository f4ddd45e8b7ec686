use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use tontine::authority::{Authority, AuthoritySettings, SystemClock};
use tontine::cli::{self, Commands, NotificationCommands, RequestCommands, UserCommands};
use tontine::client::ApiClient;
use tontine::config::{self, Config, Remote};
use tontine::errors::WorkflowError;
use tontine::models::validation_request::{NewValidationRequest, ValidationRequest};
use tontine::notification::webhook::WebhookNotifier;
use tontine::store::{self, memory::MemoryStore, postgres::PgStore, Store};
use tontine::workflow::{
    ApprovalFlow, DecisionTracker, ExecutionGate, NotificationMirror, RequestCreation,
    ValidationApi,
};
use tontine::{api, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg.clone(), port.unwrap_or(cfg.port)).await,
        Some(Commands::User { command }) => handle_user_command(&cfg, command).await,
        Some(command) => {
            let remote = cfg.remote(args.api_url.clone(), args.token.clone());
            let client = Arc::new(remote.client()?);
            handle_client_command(&cfg, &remote, client, command).await
        }
        None => run_server(cfg.clone(), cfg.port).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// `RUST_LOG` filtering, fmt (or JSON) output, and an OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "tontine"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("OpenTelemetry disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let json = std::env::var("TONTINE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tontine=debug,tower_http=debug".into()),
        ))
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (state is lost on exit)");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = &cfg.users_file {
        let seeds = store::load_seed_file(path)?;
        store::apply_seeds(store.as_ref(), &seeds).await?;
    }
    Ok(store)
}

fn build_authority(cfg: &Config, store: Arc<dyn Store>) -> anyhow::Result<Arc<Authority>> {
    let webhook = WebhookNotifier::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone());
    if webhook.is_enabled() {
        tracing::info!(targets = cfg.webhook_urls.len(), "webhook delivery enabled");
    }
    let settings = AuthoritySettings {
        request_ttl: cfg.request_ttl,
        ..AuthoritySettings::default()
    };
    Ok(Arc::new(Authority::new(
        store,
        Arc::new(SystemClock),
        settings,
        webhook,
    )?))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let authority = build_authority(&cfg, store)?;

    let state = Arc::new(AppState {
        authority: authority.clone(),
        dashboard_origin: cfg.dashboard_origin.clone(),
    });
    let app = api::app(state);

    match cfg.expiry_sweep {
        Some(every) => {
            jobs::expiry::spawn(authority, every);
            tracing::info!(every_secs = every.as_secs(), "Background expiry sweep started");
        }
        None => tracing::info!("Background expiry sweep disabled"),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Tontine authority listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_user_command(cfg: &Config, cmd: UserCommands) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Add { id, name, role } => {
            if cfg.database_url.is_none() {
                anyhow::bail!(
                    "user add needs DATABASE_URL; with the in-memory store, list users in TONTINE_USERS_FILE instead"
                );
            }
            let store = open_store(cfg).await?;
            let authority = build_authority(cfg, store)?;
            let token = authority.issue_user(&id, &name, role).await?;
            println!("User saved:");
            println!("  ID:    {}", id);
            println!("  Name:  {}", name);
            println!("  Role:  {}", role);
            println!("  Use:   Authorization: Bearer {}", token);
        }
    }
    Ok(())
}

/// Report a workflow failure the way a person should read it, keeping the
/// detail for the logs.
fn explain(e: WorkflowError) -> anyhow::Error {
    tracing::debug!(kind = ?e.kind(), detail = %e.detail(), "workflow call failed");
    anyhow::anyhow!("{} [{}]", e.user_message(), e.kind().code())
}

fn print_requests(requests: &[ValidationRequest]) {
    if requests.is_empty() {
        println!("No validation requests.");
        return;
    }
    println!(
        "{:<38} {:<16} {:<24} {:<9} {:<12} CREATED",
        "ID", "ACTION", "RESOURCE", "STATUS", "BY"
    );
    for r in requests {
        let resource: String = r.resource_name.chars().take(24).collect();
        println!(
            "{:<38} {:<16} {:<24} {:<9} {:<12} {}",
            r.id,
            r.action_type.as_str(),
            resource,
            r.status.as_str(),
            r.initiated_by.name,
            r.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_request(r: &ValidationRequest) {
    println!("Validation request {}", r.id);
    println!("  Action:    {} ({})", r.action_type.label(), r.action_type);
    println!("  Resource:  {} {} ({})", r.resource_type, r.resource_name, r.resource_id);
    println!("  Reason:    {}", r.reason);
    println!("  By:        {} ({})", r.initiated_by.name, r.initiated_by.id);
    println!("  Approver:  {}", r.assigned_approver);
    println!("  Status:    {}", r.status);
    if let Some(reason) = &r.rejection_reason {
        println!("  Rejected:  {}", reason);
    }
    println!("  Created:   {}", r.created_at.to_rfc3339());
    println!("  Expires:   {}", r.expires_at.to_rfc3339());
    if let Some(at) = r.decided_at {
        println!("  Decided:   {}", at.to_rfc3339());
    }
    if let Some(at) = r.consumed_at {
        println!("  Executed:  {}", at.to_rfc3339());
    }
}

async fn handle_client_command(
    cfg: &Config,
    remote: &Remote,
    client: Arc<ApiClient>,
    cmd: Commands,
) -> anyhow::Result<()> {
    match cmd {
        Commands::Request { command } => handle_request_command(cfg, remote, client, command).await,
        Commands::Approvers => {
            let approvers = client.list_eligible_approvers().await.map_err(explain)?;
            if approvers.is_empty() {
                println!("No eligible approvers.");
            } else {
                println!("{:<38} {:<24} ROLE", "ID", "NAME");
                for u in approvers {
                    println!("{:<38} {:<24} {}", u.id, u.name, u.role);
                }
            }
            Ok(())
        }
        Commands::Notification { command } => handle_notification_command(client, command).await,
        Commands::Serve { .. } | Commands::User { .. } => {
            anyhow::bail!("not a client command")
        }
    }
}

async fn handle_request_command(
    cfg: &Config,
    remote: &Remote,
    client: Arc<ApiClient>,
    cmd: RequestCommands,
) -> anyhow::Result<()> {
    let approval = ApprovalFlow::new(client.clone());

    match cmd {
        RequestCommands::Create {
            action,
            resource_id,
            resource_name,
            reason,
            approver,
        } => {
            let draft = NewValidationRequest {
                action_type: action,
                resource_type: action.resource_type(),
                resource_id,
                resource_name,
                reason,
                assigned_approver: approver,
            };
            let created = RequestCreation::new(client)
                .with_min_reason_len(cfg.min_reason_len)
                .create(&draft)
                .await
                .map_err(explain)?;
            println!("Validation request submitted.");
            print_request(&created);
        }
        RequestCommands::Pending => {
            let me = client.current_user().await.map_err(explain)?;
            let pending = approval.list_pending(&me.id).await.map_err(explain)?;
            print_requests(&pending);
        }
        RequestCommands::Mine { status } => {
            let mine = client.list_mine(status).await.map_err(explain)?;
            print_requests(&mine);
        }
        RequestCommands::Show { id } => {
            let request = client.get_request(&id).await.map_err(explain)?;
            print_request(&request);
        }
        RequestCommands::Accept { id } => {
            let decided = approval.accept(&id).await.map_err(explain)?;
            println!("Request {} accepted.", decided.id);
        }
        RequestCommands::Reject { id, reason } => {
            let decided = approval.reject(&id, &reason).await.map_err(explain)?;
            println!("Request {} rejected.", decided.id);
        }
        RequestCommands::Watch {
            id,
            interval,
            timeout,
        } => {
            let tracker = DecisionTracker::new(
                client,
                Duration::from_secs(interval.max(1)),
                Duration::from_secs(timeout),
            );
            let latest = tracker.wait_for_decision(&id).await.map_err(explain)?;
            if latest.is_pending() {
                println!("Still pending after {}s.", timeout);
            }
            print_request(&latest);
        }
        RequestCommands::Execute { id, target_url } => {
            let executor = Arc::new(
                remote
                    .action_executor(target_url.as_deref())
                    .context("invalid action target")?,
            );
            let gate = ExecutionGate::new(client, executor);
            let request = gate.execute(&id).await.map_err(explain)?;
            println!(
                "{} executed on {} ({}).",
                request.action_type.label(),
                request.resource_name,
                request.resource_id
            );
        }
    }
    Ok(())
}

async fn handle_notification_command(
    client: Arc<ApiClient>,
    cmd: NotificationCommands,
) -> anyhow::Result<()> {
    let mirror = NotificationMirror::new(client.clone(), ApprovalFlow::new(client.clone()));

    let find = |id: String| {
        let mirror = &mirror;
        async move {
            mirror
                .pending_notices()
                .await
                .map_err(explain)?
                .into_iter()
                .find(|p| p.notification.id == id)
                .ok_or_else(|| anyhow::anyhow!("no unread validation notification {}", id))
        }
    };

    match cmd {
        NotificationCommands::List => {
            let notices = mirror.pending_notices().await.map_err(explain)?;
            if notices.is_empty() {
                println!("No unread validation requests.");
                return Ok(());
            }
            println!("{:<38} {:<16} {:<24} FROM", "NOTIFICATION", "ACTION", "RESOURCE");
            for p in notices {
                println!(
                    "{:<38} {:<16} {:<24} {}",
                    p.notification.id,
                    p.notice.action_type.as_str(),
                    p.notice.resource_name,
                    p.notice.initiator_name
                );
            }
        }
        NotificationCommands::Accept { id } => {
            let pending = find(id).await?;
            let outcome = mirror.accept(&pending.notification).await.map_err(explain)?;
            println!("Request {} accepted.", outcome.request.id);
            if !outcome.marked_read {
                println!("(the notification could not be marked read)");
            }
        }
        NotificationCommands::Reject { id, reason } => {
            let pending = find(id).await?;
            let outcome = mirror
                .reject(&pending.notification, &reason)
                .await
                .map_err(explain)?;
            println!("Request {} rejected.", outcome.request.id);
            if !outcome.marked_read {
                println!("(the notification could not be marked read)");
            }
        }
    }
    Ok(())
}
