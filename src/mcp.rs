use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rmcp::schemars;
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use carrental::cache::{CacheError, CacheStats, PageCache};
use carrental::db::{Database, TableStats};
use carrental::forms::{self, CarSubmission, ClientSubmission, SessionStore};
use carrental::types::DatasetKind;

/// How often expired pages and idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type Pages = PageCache<Mutex<Database>>;

// ── Parameter types ──

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListParams {
    /// Dataset: clients, cars, car_classes, rental_agreements, rental_history, maintenances
    pub dataset: String,
    /// Skip the cache and return the 20 newest records, newest first
    #[serde(default)]
    pub latest: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClientFormParams {
    /// Opaque visitor id; form values are remembered per visitor
    pub visitor: String,
    /// Client id as typed into the form
    pub id: Option<String>,
    pub full_name: Option<String>,
    pub license_number: Option<String>,
    pub phone_number: Option<String>,
    /// Value of the visitor's FormData cookie, if they have one
    pub form_data: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CarFormParams {
    /// Opaque visitor id; form values are remembered per visitor
    pub visitor: String,
    /// Car id as typed into the form
    pub id: Option<String>,
    pub model: Option<String>,
    /// Model year as typed into the form
    pub year: Option<String>,
}

// ── Response wrappers for JSON serialization ──

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    tables: TableStats,
    cache: CacheStats,
    sessions: usize,
}

fn mcp_err(msg: impl std::fmt::Display) -> McpError {
    McpError::internal_error(msg.to_string(), None)
}

/// Store failures are server errors; a bad key is the caller's fault.
fn cache_err(err: CacheError) -> McpError {
    match err {
        CacheError::EmptyKey => McpError::invalid_params(err.to_string(), None),
        CacheError::Store(e) => mcp_err(format!("store unavailable: {e}")),
    }
}

fn parse_dataset(s: &str) -> Result<DatasetKind, McpError> {
    s.parse::<DatasetKind>().map_err(|_| {
        McpError::invalid_params(
            format!(
                "invalid dataset '{s}'. \
                 Valid: clients, cars, car_classes, rental_agreements, rental_history, maintenances"
            ),
            None,
        )
    })
}

fn require_visitor(visitor: &str) -> Result<(), McpError> {
    if visitor.trim().is_empty() {
        return Err(McpError::invalid_params("visitor must not be empty", None));
    }
    Ok(())
}

fn json_text<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| mcp_err(format!("serialization failed: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// One listing page. An empty page is reported as a tool error ("not found").
fn list_page(pages: &Pages, kind: DatasetKind, latest: bool) -> Result<CallToolResult, McpError> {
    let page = if latest {
        pages.fresh_reverse_page(kind)
    } else {
        pages.page(kind, kind.page_key())
    }
    .map_err(cache_err)?;

    if page.is_empty() {
        return Ok(CallToolResult::error(vec![Content::text(format!(
            "No {} found.",
            kind.title()
        ))]));
    }
    json_text(&page)
}

// ── MCP Server ──

#[derive(Clone)]
pub struct RentalServer {
    tool_router: ToolRouter<Self>,
    /// Process-wide page cache; owns the database connection.
    pages: Arc<Pages>,
    sessions: Arc<SessionStore>,
}

#[tool_router]
impl RentalServer {
    pub fn new(db: Database) -> Self {
        Self {
            tool_router: Self::tool_router(),
            pages: Arc::new(PageCache::new(Mutex::new(db))),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    /// First page of a dataset.
    #[tool(
        description = "List the first 20 records of a dataset (clients, cars, car_classes, rental_agreements, rental_history, maintenances). Served from a cache refreshed every 262 seconds; set latest=true for the 20 newest records straight from the database."
    )]
    async fn rental_list(
        &self,
        Parameters(params): Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let kind = parse_dataset(&params.dataset)?;
        let latest = params.latest;
        let pages = Arc::clone(&self.pages);

        tokio::task::spawn_blocking(move || {
            debug!(kind = %kind, latest, "list");
            list_page(&pages, kind, latest)
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }

    /// Client search form.
    #[tool(
        description = "Client data form. Restores the visitor's last values (session or FormData cookie), applies any submitted fields, remembers them, and returns the form, a client dropdown, and the FormData cookie to set."
    )]
    async fn rental_client_form(
        &self,
        Parameters(params): Parameters<ClientFormParams>,
    ) -> Result<CallToolResult, McpError> {
        require_visitor(&params.visitor)?;
        let pages = Arc::clone(&self.pages);
        let sessions = Arc::clone(&self.sessions);

        tokio::task::spawn_blocking(move || {
            debug!(visitor = %params.visitor, "client form");
            let submission = ClientSubmission {
                id: params.id,
                full_name: params.full_name,
                license_number: params.license_number,
                phone_number: params.phone_number,
                form_data: params.form_data,
            };
            let view = forms::client_form(&*pages, &sessions, &params.visitor, submission)
                .map_err(cache_err)?;
            json_text(&view)
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }

    /// Car search form.
    #[tool(
        description = "Car data form. Restores the visitor's last values from their session, applies any submitted fields (id, model, year), remembers them, and returns the form with a car dropdown."
    )]
    async fn rental_car_form(
        &self,
        Parameters(params): Parameters<CarFormParams>,
    ) -> Result<CallToolResult, McpError> {
        require_visitor(&params.visitor)?;
        let pages = Arc::clone(&self.pages);
        let sessions = Arc::clone(&self.sessions);

        tokio::task::spawn_blocking(move || {
            debug!(visitor = %params.visitor, "car form");
            let submission = CarSubmission {
                id: params.id,
                model: params.model,
                year: params.year,
            };
            let view = forms::car_form(&*pages, &sessions, &params.visitor, submission)
                .map_err(cache_err)?;
            json_text(&view)
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }

    /// Row counts plus cache and session figures.
    #[tool(
        description = "Show row counts per table, page cache statistics (entries, hits, misses) and the number of live visitor sessions."
    )]
    async fn rental_stats(&self) -> Result<CallToolResult, McpError> {
        let pages = Arc::clone(&self.pages);
        let sessions = Arc::clone(&self.sessions);

        tokio::task::spawn_blocking(move || {
            debug!("stats");
            let tables = {
                let db = pages
                    .gateway()
                    .lock()
                    .map_err(|_| mcp_err("database lock poisoned"))?;
                db.stats()
                    .map_err(|e| mcp_err(format!("stats query failed: {e}")))?
            };
            json_text(&StatsResponse {
                tables,
                cache: pages.stats(),
                sessions: sessions.len(),
            })
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }
}

#[tool_handler]
impl ServerHandler for RentalServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "carrental".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "carrental browses a vehicle rental database: clients, cars, car classes, \
                 rental agreements, rental history and maintenance records.\n\n\
                 Workflow:\n\
                 1. Use rental_list with a dataset name to see its first 20 records.\n\
                 2. Pages are cached for 262 seconds; pass latest=true for the newest records.\n\
                 3. Use rental_client_form / rental_car_form with a stable visitor id to fill \
                 the search forms; values are remembered for 30 minutes of inactivity.\n\
                 4. Use rental_stats for row counts and cache figures."
                    .into(),
            ),
        }
    }
}

/// Start the MCP server over stdio.
pub async fn run_server(db_path: &Path) -> anyhow::Result<()> {
    info!("starting carrental MCP server v{}", env!("CARGO_PKG_VERSION"));
    let db = Database::open(db_path)
        .map_err(|e| anyhow::anyhow!("failed to open database: {e}"))?;
    let server = RentalServer::new(db);

    let pages = Arc::clone(&server.pages);
    let sessions = Arc::clone(&server.sessions);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            pages.purge_expired();
            sessions.purge_idle();
        }
    });

    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    sweeper.abort();
    info!("carrental MCP server stopped");
    Ok(())
}
