//! Admin REST API and media-server webhook route tree.

pub mod channels;
pub mod destinations;
pub mod error;
pub mod hooks;
pub mod media;
pub mod system;
pub mod users;

use axum::routing::post;
use axum::Router;

use crate::state::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/hooks", hooks::router())
        .nest("/channels", channels::router())
        .nest("/destinations", destinations::router())
        .nest("/media", media::router())
        .nest("/users", users::router())
        .route("/takeover/{slug}", post(hooks::takeover))
        .merge(system::router())
}
