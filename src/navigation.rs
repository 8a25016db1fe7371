//! Navigation guard: bounce authenticated users off the auth pages once auth has resolved.

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::RoutePolicy;
use crate::reconciler::ReconciliationState;

/// Strip query, fragment and trailing slashes: `/login/?next=x#f` -> `/login`.
pub fn normalize_route(route: &str) -> &str {
    let end = route.find(['?', '#']).unwrap_or(route.len());
    let path = route[..end].trim_end_matches('/');
    if path.is_empty() { "/" } else { path }
}

pub fn is_auth_route(route: &str, policy: &RoutePolicy) -> bool {
    let route = normalize_route(route);
    policy.auth_routes.iter().any(|r| normalize_route(r) == route)
}

/// Redirect target for `route`, if any. Never fires while auth is still loading.
pub fn redirect_target(state: &ReconciliationState, route: &str, policy: &RoutePolicy) -> Option<String> {
    if state.auth_loading {
        return None;
    }
    if state.has_session() && is_auth_route(route, policy) {
        return Some(policy.landing_route.clone());
    }
    None
}

/// Re-evaluate the guard whenever state or route changes and send each redirect once per
/// page (query, fragment and trailing slash ignored). Exits when either input or the
/// redirect receiver goes away.
pub async fn watch_redirects(
    mut state: watch::Receiver<ReconciliationState>,
    mut route: watch::Receiver<String>,
    policy: RoutePolicy,
    redirects: mpsc::Sender<String>,
) {
    let mut last_fired: Option<String> = None;
    loop {
        let current_route = route.borrow_and_update().clone();
        let target = redirect_target(&state.borrow_and_update(), &current_route, &policy);
        let page = normalize_route(&current_route);
        match target {
            Some(target) if last_fired.as_deref() != Some(page) => {
                debug!(target: "talkzii::nav", "redirect {} -> {}", current_route, target);
                if redirects.send(target).await.is_err() {
                    return;
                }
                last_fired = Some(page.to_string());
            }
            Some(_) => {}
            None => last_fired = None,
        }

        tokio::select! {
            changed = state.changed() => if changed.is_err() { return; },
            changed = route.changed() => if changed.is_err() { return; },
            _ = redirects.closed() => return,
        }
    }
}
