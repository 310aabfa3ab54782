//! Startup wiring: config → stores → adapters → orchestrator.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::adapters::calendar::CalendarAdapter;
use crate::adapters::crm::CrmAdapter;
use crate::adapters::message::MessageAdapter;
use crate::adapters::voice::VoiceAdapter;
use crate::adapters::{AdapterContract, AdapterRegistry};
use crate::config::Config;
use crate::idempotency::IdempotencyGuard;
use crate::lifecycle::LeadStateMachine;
use crate::orchestrator::{
    EventPublisher, ExecutionOrchestrator, JsonlEventPublisher, SafetyGate, TracingEventPublisher,
};
use crate::providers::http::HttpProviderClient;
use crate::providers::ProviderClient;
use crate::storage::{self, SqliteIdempotencyRepository, SqliteTokenRepository};
use crate::tokens::ExecutionTokenService;

/// Everything a running instance needs.
pub struct Runtime {
    /// Merged configuration.
    pub config: Config,
    /// Shared database pool.
    pub pool: SqlitePool,
    /// Token service over the durable store.
    pub tokens: Arc<ExecutionTokenService>,
    /// Dedupe guard over the durable store.
    pub dedupe: IdempotencyGuard,
    /// Fully wired orchestrator.
    pub orchestrator: ExecutionOrchestrator,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Open the database and build the token service and dedupe guard.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or initialised.
pub async fn open_stores(
    config: &Config,
) -> Result<(SqlitePool, Arc<ExecutionTokenService>, IdempotencyGuard)> {
    let path = config.database_path()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pool = storage::open_pool(&path)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    let tokens = Arc::new(ExecutionTokenService::with_default_ttl(
        Arc::new(SqliteTokenRepository::new(pool.clone())),
        config.tokens.default_ttl(),
    ));
    let dedupe = IdempotencyGuard::new(
        Arc::new(SqliteIdempotencyRepository::new(pool.clone())),
        config.idempotency.ttl(),
    );
    Ok((pool, tokens, dedupe))
}

/// Build one HTTP provider client per configured `[providers.<name>]`
/// section and register the adapters whose providers are present.
///
/// The message adapter needs both `sms` and `email`; the others need the
/// provider of the same name. Adapters without providers are skipped and
/// their action types report "no adapter registered".
///
/// # Errors
///
/// Returns an error if a provider cannot be constructed or two adapters
/// claim the same action type.
pub fn build_registry(
    config: &Config,
    contract: &AdapterContract,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AdapterRegistry> {
    let mut clients = std::collections::BTreeMap::<String, Arc<dyn ProviderClient>>::new();
    for (name, provider) in &config.providers {
        let client = HttpProviderClient::from_config(name, provider, &env)
            .with_context(|| format!("failed to configure provider {name}"))?;
        clients.insert(name.clone(), Arc::new(client));
    }

    let mut registry = AdapterRegistry::new();

    match (clients.get("sms"), clients.get("email")) {
        (Some(sms), Some(email)) => registry.register(Arc::new(MessageAdapter::new(
            contract.clone(),
            Arc::clone(sms),
            Arc::clone(email),
        )))?,
        _ => warn!("message adapter disabled: providers.sms and providers.email are both required"),
    }
    if let Some(voice) = clients.get("voice") {
        registry.register(Arc::new(VoiceAdapter::new(contract.clone(), Arc::clone(voice))))?;
    }
    if let Some(calendar) = clients.get("calendar") {
        registry.register(Arc::new(CalendarAdapter::new(
            contract.clone(),
            Arc::clone(calendar),
        )))?;
    }
    if let Some(crm) = clients.get("crm") {
        registry.register(Arc::new(CrmAdapter::new(contract.clone(), Arc::clone(crm))))?;
    }

    let missing = registry.unsupported_actions();
    if !missing.is_empty() {
        warn!(actions = ?missing, "some action types have no adapter");
    }
    Ok(registry)
}

/// Event sink from `[audit]`: a JSON lines file when configured, else tracing.
///
/// # Errors
///
/// Returns an error if the events file cannot be opened.
pub fn build_publisher(config: &Config) -> Result<Arc<dyn EventPublisher>> {
    match &config.audit.events_path {
        Some(path) => {
            let publisher = JsonlEventPublisher::new(path)
                .with_context(|| format!("failed to open events file {}", path.display()))?;
            Ok(Arc::new(publisher))
        }
        None => Ok(Arc::new(TracingEventPublisher)),
    }
}

/// Wire a complete runtime from configuration.
///
/// # Errors
///
/// Returns an error if the lifecycle table is inconsistent or any store,
/// provider, or sink fails to initialise.
pub async fn build(config: Config) -> Result<Runtime> {
    let state_machine = LeadStateMachine::standard();
    state_machine
        .validate_table()
        .map_err(|problems| anyhow::anyhow!("lifecycle table invalid: {}", problems.join("; ")))?;

    let (pool, tokens, dedupe) = open_stores(&config).await?;
    let contract = AdapterContract::with_guard(dedupe.clone());
    let registry = build_registry(&config, &contract, |key| std::env::var(key).ok())?;
    let publisher = build_publisher(&config)?;
    let safety = SafetyGate::from_config(&config.safety);

    let orchestrator = ExecutionOrchestrator::new(Arc::new(registry), safety, publisher)
        .with_state_machine(state_machine)
        .with_token_service(Arc::clone(&tokens));

    info!(
        default_mode = %config.safety.default_mode,
        kill_switch = config.safety.kill_switch,
        "runtime ready"
    );

    Ok(Runtime {
        config,
        pool,
        tokens,
        dedupe,
        orchestrator,
    })
}
