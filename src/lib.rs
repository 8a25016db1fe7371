pub mod error;
pub mod config;
pub mod identity;
pub mod reconciler;
pub mod navigation;
pub mod context;

pub use config::{CachePolicy, ReconcilerConfig, RoutePolicy};
pub use context::{AuthContext, AuthView};
pub use error::{AuthError, AuthResult};
pub use reconciler::{Phase, ReconciliationState, Reconciler};
