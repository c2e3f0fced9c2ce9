//! HTTP boundary
//!
//! Bearer-token authentication, request mapping and status codes. All
//! lookup semantics live in `LookupCoordinator`.
//!
//! | Route | Access |
//! |---|---|
//! | `POST /api/auth/login` | public |
//! | `GET /api/health` | public |
//! | `POST /api/auth/logout` | session |
//! | `GET /api/voters/id/:number` | session |
//! | `GET /api/voters/name/:text?with_sites=true` | session |
//! | `GET /api/status` | session |
//! | `GET /api/audit?caller_id=&from=&to=` | admin |

mod auth;
mod error;
mod handlers;
mod router;

use std::sync::Arc;

use crate::coordinator::LookupCoordinator;

pub use auth::{require_admin, require_session, SessionStore, TokenRejection, UserAccount};
pub use error::ApiError;
pub use router::build_router;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LookupCoordinator>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(coordinator: Arc<LookupCoordinator>, sessions: Arc<SessionStore>) -> Self {
        Self {
            coordinator,
            sessions,
        }
    }
}
