//! Citecheck Server
//!
//! Axum server exposing check intake, citation identification, paragraph
//! edits, validation jobs (polling and SSE) and manual review, backed by the
//! ValidationCoordinator from crates/core.

mod api;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use citecheck_core::models::LlmProvider;
use citecheck_core::state::CitecheckDb;
use citecheck_core::swarm::{OutputSchema, ValidationConfig, ValidationCoordinator};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

const CONFIG_DIR: &str = ".citecheck";

/// Application state
pub struct AppState {
    pub coordinator: Arc<ValidationCoordinator>,
    /// Prompt templates live here too
    pub db: CitecheckDb,
}

pub type SharedState = Arc<AppState>;

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Deserialize, ToSchema)]
struct ApiKeysRequest {
    anthropic: Option<String>,
    openai: Option<String>,
    gemini: Option<String>,
    openrouter: Option<String>,
    grok: Option<String>,
    deepseek: Option<String>,
    courtlistener: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct PromptListItem {
    slug: String,
    version: i32,
}

#[derive(Serialize, ToSchema)]
struct PromptListResponse {
    prompts: Vec<PromptListItem>,
}

#[derive(Serialize, ToSchema)]
struct PromptResponse {
    slug: String,
    content: String,
}

#[derive(Deserialize, ToSchema)]
struct UpdatePromptRequest {
    content: String,
}

#[derive(Serialize, ToSchema)]
struct UpdatePromptResponse {
    success: bool,
    slug: String,
    new_version: i32,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Citecheck - tiered consensus checking of legal citations")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Citecheck server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Validate a check's citations and print its summary (CLI mode, no server)
    Validate {
        /// Check id
        check_id: String,
        /// Re-run citations that are already validated
        #[arg(long)]
        force: bool,
    },
}

// === Config API Types ===

/// Persisted configuration (subset of ValidationConfig exposed to clients)
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    global_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    global_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    /// "score" or "verdict"
    #[serde(skip_serializing_if = "Option::is_none")]
    tier2_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier2_agents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier3_agents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrent_citations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier3_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_quorum: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispersion_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_radius: Option<usize>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    per_agent_providers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    per_agent_models: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    per_agent_base_urls: HashMap<String, String>,
}

impl PersistedConfig {
    fn path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join("config.json")
    }

    async fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                    Self::default()
                }),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        }
    }

    async fn save(&self) -> Result<(), std::io::Error> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, content).await
    }

    fn merge(&mut self, other: PersistedConfig) {
        if other.global_provider.is_some() {
            self.global_provider = other.global_provider;
        }
        if other.global_model.is_some() {
            self.global_model = other.global_model;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.tier2_schema.is_some() {
            self.tier2_schema = other.tier2_schema;
        }
        if other.tier2_agents.is_some() {
            self.tier2_agents = other.tier2_agents;
        }
        if other.tier3_agents.is_some() {
            self.tier3_agents = other.tier3_agents;
        }
        if other.max_concurrent_citations.is_some() {
            self.max_concurrent_citations = other.max_concurrent_citations;
        }
        if other.agent_timeout_secs.is_some() {
            self.agent_timeout_secs = other.agent_timeout_secs;
        }
        if other.tier3_timeout_secs.is_some() {
            self.tier3_timeout_secs = other.tier3_timeout_secs;
        }
        if other.min_quorum.is_some() {
            self.min_quorum = other.min_quorum;
        }
        if other.dispersion_threshold.is_some() {
            self.dispersion_threshold = other.dispersion_threshold;
        }
        if other.context_radius.is_some() {
            self.context_radius = other.context_radius;
        }
        self.per_agent_providers.extend(other.per_agent_providers);
        self.per_agent_models.extend(other.per_agent_models);
        self.per_agent_base_urls.extend(other.per_agent_base_urls);
    }

    /// Overlay onto the built-in defaults. Unknown provider or schema names
    /// are logged and ignored.
    fn to_validation_config(&self) -> ValidationConfig {
        let mut config = ValidationConfig::default();

        if let Some(id) = &self.global_provider {
            match LlmProvider::parse(id) {
                Some(provider) => config.global_provider = provider,
                None => tracing::warn!(provider = %id, "Unknown provider, keeping default"),
            }
        }
        config.global_model = self.global_model.clone();
        config.base_url = self.base_url.clone();

        match self.tier2_schema.as_deref() {
            Some("score") => config.tier2_schema = OutputSchema::Score,
            Some("verdict") => config.tier2_schema = OutputSchema::Verdict,
            Some(other) => tracing::warn!(schema = %other, "Unknown tier-2 schema, keeping default"),
            None => {}
        }
        if let Some(agents) = &self.tier2_agents {
            config.tier2_agents = agents.clone();
        }
        if let Some(agents) = &self.tier3_agents {
            config.tier3_agents = agents.clone();
        }
        if let Some(n) = self.max_concurrent_citations {
            config.max_concurrent_citations = n;
        }
        if let Some(secs) = self.agent_timeout_secs {
            config.agent_timeout_secs = secs;
        }
        if let Some(secs) = self.tier3_timeout_secs {
            config.tier3_timeout_secs = secs;
        }
        if let Some(n) = self.min_quorum {
            config.min_quorum = n;
        }
        if let Some(threshold) = self.dispersion_threshold {
            config.dispersion_threshold = threshold;
        }
        if let Some(radius) = self.context_radius {
            config.context_radius = radius;
        }

        for (agent, id) in &self.per_agent_providers {
            match LlmProvider::parse(id) {
                Some(provider) => {
                    config.per_agent_providers.insert(agent.clone(), provider);
                }
                None => tracing::warn!(agent = %agent, provider = %id, "Unknown provider override"),
            }
        }
        config.per_agent_models = self.per_agent_models.clone();
        config.per_agent_base_urls = self.per_agent_base_urls.clone();
        config
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ConfigResponse {
    config: PersistedConfig,
    defaults: ConfigDefaults,
    /// Changes take effect on the next server start
    restart_required: bool,
}

#[derive(Debug, Serialize, ToSchema)]
struct ConfigDefaults {
    global_provider: &'static str,
    tier2_schema: &'static str,
    tier2_agents: Vec<String>,
    tier3_agents: Vec<String>,
    max_concurrent_citations: usize,
    agent_timeout_secs: u64,
    tier3_timeout_secs: u64,
    min_quorum: usize,
    dispersion_threshold: f64,
    context_radius: usize,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        let config = ValidationConfig::default();
        Self {
            global_provider: config.global_provider.id(),
            tier2_schema: "score",
            tier2_agents: config.tier2_agents,
            tier3_agents: config.tier3_agents,
            max_concurrent_citations: config.max_concurrent_citations,
            agent_timeout_secs: config.agent_timeout_secs,
            tier3_timeout_secs: config.tier3_timeout_secs,
            min_quorum: config.min_quorum,
            dispersion_threshold: config.dispersion_threshold,
            context_radius: config.context_radius,
        }
    }
}

// === Provider API Types ===

#[derive(Debug, Serialize, ToSchema)]
struct ProviderInfo {
    id: String,
    name: String,
    default_model: String,
    supports_base_url: bool,
    env_var: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ProvidersResponse {
    providers: Vec<ProviderInfo>,
}

fn get_provider_info() -> Vec<ProviderInfo> {
    LlmProvider::all()
        .into_iter()
        .map(|p| ProviderInfo {
            id: p.id().to_string(),
            name: p.display_name().to_string(),
            default_model: p.default_model().to_string(),
            supports_base_url: p.supports_base_url(),
            env_var: p.env_var().to_string(),
        })
        .collect()
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Citecheck API",
        version = "1.0.0",
        description = "Tiered consensus checking of legal citations"
    ),
    paths(
        api::checks::create_check,
        api::checks::list_checks,
        api::checks::get_check,
        api::checks::list_snapshots,
        api::checks::get_snapshot,
        api::checks::identify_citations,
        api::checks::validate_citations,
        api::checks::list_check_jobs,
        api::checks::revalidate_citation,
        api::checks::edit_paragraph,
        api::checks::review_citation,
        api::checks::get_summary,
        api::jobs::get_job,
        api::jobs::job_events,
        get_config,
        update_config,
        get_providers,
        list_prompts,
        get_prompt,
        update_prompt,
        save_api_keys
    ),
    components(
        schemas(
            api::ErrorBody,
            api::checks::CreateCheckRequest,
            api::checks::EditParagraphRequest,
            api::checks::ReviewRequest,
            api::checks::JobAccepted,
            ApiResponse,
            ApiKeysRequest,
            ConfigResponse,
            ConfigDefaults,
            PersistedConfig,
            ProvidersResponse,
            ProviderInfo,
            PromptListResponse,
            PromptListItem,
            PromptResponse,
            UpdatePromptRequest,
            UpdatePromptResponse
        )
    ),
    tags(
        (name = "checks", description = "Documents, snapshots and citations"),
        (name = "jobs", description = "Validation jobs and progress"),
        (name = "config", description = "Configuration management"),
        (name = "providers", description = "LLM provider discovery"),
        (name = "prompts", description = "Panel prompt templates")
    )
)]
struct ApiDoc;

// === Config Handlers ===

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration and defaults", body = ConfigResponse)
    )
)]
async fn get_config() -> Json<ConfigResponse> {
    let config = PersistedConfig::load().await;
    Json(ConfigResponse {
        config,
        defaults: ConfigDefaults::default(),
        restart_required: false,
    })
}

/// Update configuration (partial merge)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse)
    )
)]
async fn update_config(Json(updates): Json<PersistedConfig>) -> Json<ConfigResponse> {
    let mut config = PersistedConfig::load().await;
    config.merge(updates);

    if let Err(e) = config.save().await {
        tracing::error!("Failed to save config: {}", e);
    }

    Json(ConfigResponse {
        config,
        defaults: ConfigDefaults::default(),
        restart_required: true,
    })
}

/// Get available LLM providers
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "providers",
    responses(
        (status = 200, description = "List of supported LLM providers", body = ProvidersResponse)
    )
)]
async fn get_providers() -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: get_provider_info(),
    })
}

/// Whether a key can be stored in the env file as a single-quoted value
fn storable_key(value: &str) -> bool {
    !value
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || c == '\'')
}

/// Env file content with `updates` applied and every other entry kept
fn merge_env(existing: &str, updates: &[(&str, &str)]) -> anyhow::Result<String> {
    let mut entries: Vec<(String, String)> = dotenvy::from_read_iter(existing.as_bytes())
        .collect::<Result<_, _>>()
        .context("Existing .env file is malformed")?;
    for (var, value) in updates {
        match entries.iter_mut().find(|(k, _)| k == var) {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((var.to_string(), value.to_string())),
        }
    }

    let mut content = String::from("# Citecheck API Keys - DO NOT COMMIT\n\n");
    for (var, value) in entries {
        if !storable_key(&value) {
            anyhow::bail!("Existing value of {} cannot be rewritten safely", var);
        }
        content.push_str(&format!("{}='{}'\n", var, value));
    }
    Ok(content)
}

fn key_response(status: StatusCode, success: bool, message: String) -> (StatusCode, Json<ApiResponse>) {
    (status, Json(ApiResponse { success, message }))
}

/// Save API keys to .citecheck/.env, keeping keys not in the request
#[utoipa::path(
    post,
    path = "/api/v1/settings/api-keys",
    tag = "config",
    request_body = ApiKeysRequest,
    responses(
        (status = 200, description = "API keys saved", body = ApiResponse),
        (status = 400, description = "A key contains whitespace, quotes or control characters", body = ApiResponse)
    )
)]
async fn save_api_keys(Json(req): Json<ApiKeysRequest>) -> (StatusCode, Json<ApiResponse>) {
    let keys = [
        (LlmProvider::Anthropic.env_var(), &req.anthropic),
        (LlmProvider::OpenAI.env_var(), &req.openai),
        (LlmProvider::Gemini.env_var(), &req.gemini),
        (LlmProvider::OpenRouter.env_var(), &req.openrouter),
        (LlmProvider::Grok.env_var(), &req.grok),
        (LlmProvider::DeepSeek.env_var(), &req.deepseek),
        ("COURTLISTENER_API_TOKEN", &req.courtlistener),
    ];
    let mut updates = Vec::new();
    for (var, key) in keys {
        let Some(key) = key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            continue;
        };
        if !storable_key(key) {
            return key_response(
                StatusCode::BAD_REQUEST,
                false,
                format!("{} contains whitespace, quotes or control characters", var),
            );
        }
        updates.push((var, key));
    }

    let dir = PathBuf::from(CONFIG_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        return key_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            format!("Failed to create {} directory: {}", CONFIG_DIR, e),
        );
    }

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        let _ = tokio::fs::write(&gitignore, "# Never commit API keys\n.env\n*.env\n*.db\n").await;
    }

    let env_path = dir.join(".env");
    let existing = tokio::fs::read_to_string(&env_path).await.unwrap_or_default();
    let content = match merge_env(&existing, &updates) {
        Ok(content) => content,
        Err(e) => {
            return key_response(StatusCode::INTERNAL_SERVER_ERROR, false, format!("{:#}", e));
        }
    };

    match tokio::fs::write(&env_path, content).await {
        Ok(_) => {
            // Saved keys replace whatever this process loaded at startup
            let _ = dotenvy::from_path_override(&env_path);
            tracing::info!(keys = updates.len(), "API keys saved");
            key_response(StatusCode::OK, true, "API keys saved and loaded".to_string())
        }
        Err(e) => key_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            format!("Failed to write .env file: {}", e),
        ),
    }
}

// === Prompt Template Handlers ===

/// List panel prompts
#[utoipa::path(
    get,
    path = "/api/v1/prompts",
    tag = "prompts",
    responses(
        (status = 200, description = "List of prompts", body = PromptListResponse)
    )
)]
async fn list_prompts(State(state): State<SharedState>) -> Json<PromptListResponse> {
    match state.db.list_prompts() {
        Ok(prompts) => Json(PromptListResponse {
            prompts: prompts
                .into_iter()
                .map(|(slug, version)| PromptListItem { slug, version })
                .collect(),
        }),
        Err(e) => {
            tracing::error!("Failed to list prompts: {:#}", e);
            Json(PromptListResponse { prompts: vec![] })
        }
    }
}

/// Get a prompt by slug
#[utoipa::path(
    get,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    responses(
        (status = 200, description = "Prompt content", body = PromptResponse),
        (status = 404, description = "Unknown prompt")
    )
)]
async fn get_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<Json<PromptResponse>, StatusCode> {
    match state.db.get_prompt(&slug) {
        Ok(content) => Ok(Json(PromptResponse { slug, content })),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

/// Update a prompt
#[utoipa::path(
    put,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    request_body = UpdatePromptRequest,
    responses(
        (status = 200, description = "Prompt updated", body = UpdatePromptResponse)
    )
)]
async fn update_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<UpdatePromptRequest>,
) -> Json<UpdatePromptResponse> {
    match state.db.set_prompt(&slug, &req.content) {
        Ok(new_version) => Json(UpdatePromptResponse {
            success: true,
            slug,
            new_version,
        }),
        Err(e) => {
            tracing::error!(slug = %slug, "Failed to update prompt: {:#}", e);
            Json(UpdatePromptResponse {
                success: false,
                slug,
                new_version: 0,
            })
        }
    }
}

// === OpenAPI Handler ===

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(spec))
            .map(IntoResponse::into_response)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// All routes, without a listener
pub fn build_router(state: SharedState) -> Router {
    let prompt_routes = Router::new()
        .route("/", get(list_prompts))
        .route("/:slug", get(get_prompt).put(update_prompt));

    let settings_routes = Router::new().route("/api-keys", post(save_api_keys));

    Router::new()
        .nest("/api/v1/checks", api::checks::routes())
        .nest("/api/v1/jobs", api::jobs::routes())
        .nest("/api/v1/prompts", prompt_routes)
        .nest("/api/v1/settings", settings_routes)
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/providers", get(get_providers))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

async fn open_state() -> anyhow::Result<SharedState> {
    let db = CitecheckDb::open()?;
    match db.seed_prompts() {
        Ok(count) if count > 0 => tracing::info!(count, "Seeded default prompts"),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to seed prompts: {:#}", e),
    }

    let config = PersistedConfig::load().await.to_validation_config();
    let coordinator = Arc::new(ValidationCoordinator::from_config(config, &db));
    Ok(Arc::new(AppState { coordinator, db }))
}

pub async fn run_server(port: u16) -> anyhow::Result<()> {
    let state = open_state().await?;
    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Citecheck server running at http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api/v1/openapi.json", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_cli_validation(check_id: &str, force: bool) -> anyhow::Result<()> {
    let state = open_state().await?;
    let job = state.coordinator.validate_now(check_id, force).await?;
    tracing::info!(
        job_id = %job.id,
        completed = job.tier2_progress.completed,
        failed = job.tier2_progress.failed,
        escalated = job.tier3_progress.total,
        "Validation finished"
    );

    let summary = state.coordinator.summary(check_id).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _ = dotenvy::from_path(PathBuf::from(CONFIG_DIR).join(".env"));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command.unwrap_or(CliCommand::Serve { port: 8080 }) {
        CliCommand::Serve { port } => run_server(port).await,
        CliCommand::Validate { check_id, force } => run_cli_validation(&check_id, force).await,
    }
}
