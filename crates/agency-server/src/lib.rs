//! Agency CRM Server
//!
//! Multi-tenant REST backend for agencies: form builder with branching
//! logic, public submissions that become scored leads, contacts, todos and
//! subscription limits.

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod services;
pub mod storage;

use agency_core::scoring::LeadScorer;
use agency_core::Store;
use axum::{
    http::HeaderValue,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use services::{
    AgencyService, AuditLogger, AuthService, BootstrapService, ContactService, FormService,
    LeadService, RequestDeduplicator, SettingsService, SubscriptionService, TodoService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth_service: Arc<AuthService>,
    pub dedup: Arc<RequestDeduplicator>,
    pub audit: Arc<AuditLogger>,
    pub subscriptions: Arc<SubscriptionService>,
    pub agencies: Arc<AgencyService>,
    pub bootstrap: Arc<BootstrapService>,
    pub forms: Arc<FormService>,
    pub leads: Arc<LeadService>,
    pub contacts: Arc<ContactService>,
    pub todos: Arc<TodoService>,
    pub settings: Arc<SettingsService>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, auth_service: AuthService, dedup_ttl: Duration) -> Self {
        let audit = Arc::new(AuditLogger::new(store.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(store.clone()));
        let settings = Arc::new(SettingsService::new(store.clone()));
        let agencies = Arc::new(AgencyService::new(
            store.clone(),
            audit.clone(),
            subscriptions.clone(),
        ));
        let bootstrap = Arc::new(BootstrapService::new(
            store.clone(),
            agencies.clone(),
            subscriptions.clone(),
            settings.clone(),
            audit.clone(),
        ));
        let contacts = Arc::new(ContactService::new(store.clone(), subscriptions.clone()));
        let forms = Arc::new(FormService::new(
            store.clone(),
            audit.clone(),
            subscriptions.clone(),
            contacts.clone(),
            LeadScorer::default(),
        ));
        let leads = Arc::new(LeadService::new(store.clone(), audit.clone()));
        let todos = Arc::new(TodoService::new(store.clone()));

        Self {
            store,
            auth_service: Arc::new(auth_service),
            dedup: Arc::new(RequestDeduplicator::new(dedup_ttl)),
            audit,
            subscriptions,
            agencies,
            bootstrap,
            forms,
            leads,
            contacts,
            todos,
            settings,
        }
    }
}

/// Full HTTP application. An empty `cors_origins` allows any origin.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn api_routes() -> Router<AppState> {
    use handlers::{agencies, audit, bootstrap, contacts, forms, leads, public, settings, todos};

    Router::new()
        .route("/bootstrap", get(bootstrap::bootstrap))
        // Agencies
        .route("/agencies", get(agencies::list).post(agencies::create))
        .route(
            "/agencies/:id",
            get(agencies::get)
                .patch(agencies::update)
                .delete(agencies::delete),
        )
        .route(
            "/agencies/:id/members",
            get(agencies::list_members).post(agencies::add_member),
        )
        .route(
            "/agencies/:id/members/:member_id",
            patch(agencies::update_member).delete(agencies::remove_member),
        )
        .route("/agencies/:id/subscription", put(agencies::change_tier))
        .route("/subscription", get(agencies::subscription))
        // Forms
        .route("/forms", get(forms::list).post(forms::create))
        .route(
            "/forms/:id",
            get(forms::get).patch(forms::update).delete(forms::delete),
        )
        .route("/forms/:id/publish", post(forms::publish))
        .route("/forms/:id/unpublish", post(forms::unpublish))
        .route("/forms/:id/duplicate", post(forms::duplicate))
        .route("/forms/:id/analytics", get(forms::analytics))
        .route(
            "/forms/:id/questions",
            get(forms::list_questions).post(forms::add_question),
        )
        .route("/forms/:id/questions/order", put(forms::reorder_questions))
        .route(
            "/forms/:id/questions/:question_id",
            patch(forms::update_question).delete(forms::delete_question),
        )
        .route("/forms/:id/responses", get(forms::list_responses))
        // Public form endpoints
        .route("/public/forms/:slug", get(public::get_form))
        .route("/public/forms/:slug/next", post(public::next_step))
        .route("/public/forms/:slug/responses", post(public::submit))
        // Leads & contacts
        .route("/leads", get(leads::list))
        .route("/leads/stats", get(leads::stats))
        .route(
            "/leads/:id",
            get(leads::get).patch(leads::update).delete(leads::delete),
        )
        .route("/contacts", get(contacts::list).post(contacts::create))
        .route(
            "/contacts/:id",
            get(contacts::get)
                .patch(contacts::update)
                .delete(contacts::delete),
        )
        // Todos
        .route("/todos", get(todos::list).post(todos::create))
        .route("/todos/:id", patch(todos::update).delete(todos::delete))
        // Settings & audit
        .route(
            "/user-preferences",
            get(settings::get)
                .put(settings::update)
                .delete(settings::reset),
        )
        .route("/audit-logs", get(audit::list))
}
