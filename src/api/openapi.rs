//! OpenAPI documentation

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, catalog, health, library};

/// Registers the bearer JWT scheme referenced by `security(("bearer_auth" = []))`
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        let mut scheme = Http::new(HttpAuthScheme::Bearer);
        scheme.bearer_format = Some("JWT".to_string());
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(scheme));
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Circulation API",
        version = "1.0.0",
        description = "Presence and book circulation for a university library",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Library
        library::check_in,
        library::check_out,
        library::presence,
        library::sessions,
        // Books
        books::borrow,
        books::return_book,
        books::history,
        books::lookup,
        // Catalog
        catalog::availability,
        catalog::active_loans,
        catalog::set_copies,
        catalog::retire_book,
    ),
    components(
        schemas(
            // Library
            library::QrScanRequest,
            library::PresenceResponse,
            crate::models::PresenceSession,
            crate::models::PresenceStatus,
            // Books
            books::BookScanRequest,
            books::LoanResponse,
            crate::models::Book,
            crate::models::LoanStatus,
            crate::models::LoanRecord,
            crate::models::LoanReceipt,
            crate::models::LoanHistory,
            crate::models::LoanHistoryEntry,
            crate::services::circulation::BookLookup,
            // Catalog
            catalog::ActiveLoansResponse,
            catalog::SetCopiesRequest,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "library", description = "Library entrance and presence"),
        (name = "books", description = "Borrowing and returning books"),
        (name = "catalog", description = "Guards used by the catalog service")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
