pub mod auth;
pub mod health;
pub mod history;
pub mod session;
pub mod users;
pub mod ws;

pub use auth::{login_user, logout_user, register_user};
pub use health::health_check;
pub use history::get_history;
pub use session::{require_session, session_token, validate_session};
pub use users::list_users;
pub use ws::ws_handler;
