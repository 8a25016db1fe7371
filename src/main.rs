//!
//! talkzii_session demo binary
//! ---------------------------
//! Wires the reconciler to the in-process provider, profile store and a local user cache,
//! then replays a short session script (restore, switch user, token refresh, profile
//! update, sign-out) while logging every settled view and navigation redirect.
//!
//! Flags: `--config <file>`, `--cache-dir <dir>`, `--user <id>`.
//! Environment: `RUST_LOG`, `TALKZII_AUTH_ROUTES`, `TALKZII_LANDING_ROUTE`, `TALKZII_TRANSITION_BUFFER`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use talkzii_session::identity::{
    FileUserCache, Gender, Identity, LocalUserCache, MemoryIdentityProvider, MemoryProfileStore, MemoryUserCache,
    Profile,
};
use talkzii_session::navigation::watch_redirects;
use talkzii_session::{AuthContext, Reconciler, ReconcilerConfig};

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn log_view(ctx: &AuthContext, step: &str) {
    let view = ctx.view();
    let json = serde_json::to_string(&view).unwrap_or_else(|e| format!("<unserializable: {}>", e));
    info!(target: "talkzii::demo", "[{}] {}", step, json);
}

async fn settle(ctx: &mut AuthContext, step: &str) {
    // let the drain task pick up whatever the provider just emitted
    tokio::task::yield_now().await;
    ctx.settled().await;
    log_view(ctx, step);
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let config = match parse_arg(&args, "--config") {
        Some(path) => ReconcilerConfig::from_json_file(&PathBuf::from(path))?.with_env(),
        None => ReconcilerConfig::from_env(),
    };
    let user = parse_arg(&args, "--user").unwrap_or_else(|| "demo-user".to_string());

    let cache: Arc<dyn LocalUserCache> = match parse_arg(&args, "--cache-dir") {
        Some(dir) => Arc::new(FileUserCache::new(dir, config.cache.clone())?),
        None => Arc::new(MemoryUserCache::new(config.cache.clone())),
    };
    for id in [user.as_str(), "newcomer"] {
        for key in config.cache.keys_for(Some(id)) {
            cache.put(&key, serde_json::json!({ "seeded_for": id }));
        }
    }

    let provider = MemoryIdentityProvider::with_session(Identity::new(user.clone(), Some(format!("{}@example.com", user))));
    let profiles = Arc::new(MemoryProfileStore::new());
    let mut profile = Profile::new(user.clone());
    profile.display_name = Some(user.clone());
    profile.gender = Some(Gender::PreferNotToSay);
    profiles.upsert(profile);

    info!(
        target: "talkzii::demo",
        "starting reconciler: user='{}', auth_routes={:?}, landing='{}'",
        user, config.routes.auth_routes, config.routes.landing_route
    );
    let mut reconciler = Reconciler::start(Arc::new(provider.clone()), profiles.clone(), cache.clone(), &config);
    let mut ctx = reconciler.context();

    let (route_tx, route_rx) = watch::channel("/login".to_string());
    let (redirect_tx, mut redirect_rx) = mpsc::channel(8);
    let guard = tokio::spawn(watch_redirects(ctx.watch(), route_rx, config.routes.clone(), redirect_tx));
    let router = tokio::spawn(async move {
        while let Some(target) = redirect_rx.recv().await {
            info!(target: "talkzii::demo", "navigate -> {}", target);
            let _ = route_tx.send(target);
        }
    });

    reconciler.bootstrapped().await;
    settle(&mut ctx, "bootstrap").await;

    provider.sign_in(Identity::new("newcomer", None));
    ctx.wait_for(|s| s.identity_id() == Some("newcomer")).await;
    settle(&mut ctx, "switch user (no profile row)").await;

    profiles.upsert(Profile::new("newcomer"));
    provider.refresh_token();
    settle(&mut ctx, "token refreshed").await;

    provider.update_user(Some("newcomer@example.com".into()));
    settle(&mut ctx, "user updated").await;

    ctx.sign_out().await;
    ctx.wait_for(|s| s.identity.is_none()).await;
    settle(&mut ctx, "signed out").await;

    reconciler.shutdown().await;
    guard.abort();
    router.abort();
    for id in [user.as_str(), "newcomer"] {
        let left = config.cache.keys_for(Some(id)).iter().filter(|k| cache.get(k).is_some()).count();
        info!(target: "talkzii::demo", "cache entries left for '{}': {}", id, left);
    }
    Ok(())
}
