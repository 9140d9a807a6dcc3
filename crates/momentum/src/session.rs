//! Sign-in and the shared service context.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use miette::Result;
use momentum_store::{CacheConfig, Notice, QueryCache, StoreClient, StoreConfig};
use momentum_tracker::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::AuthArgs;

/// A signed-in user and the services built around them.
pub struct Session {
    pub ctx: Context,
}

impl Session {
    pub fn store(&self) -> &Arc<StoreClient> {
        &self.ctx.store
    }
}

pub async fn connect(auth: &AuthArgs) -> Result<Session> {
    let config = StoreConfig::builder(&auth.url, &auth.anon_key)
        .build()
        .map_err(|e| miette::miette!("invalid configuration: {}", e))?;
    let store = Arc::new(
        StoreClient::new(config).map_err(|e| miette::miette!("failed to create client: {}", e))?,
    );

    let user = store
        .sign_in(&auth.email, &auth.password)
        .await
        .map_err(|e| miette::miette!("sign in failed: {}", e))?;
    info!(user = %user.id, "signed in");

    let cache = QueryCache::new(CacheConfig::default());
    let ctx = Context::for_session(store, cache)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    report_notices(&ctx);

    Ok(Session { ctx })
}

/// Surface every write outcome once, as a log line.
fn report_notices(ctx: &Context) {
    let mut notices = ctx.mutations.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(Notice::Success { label }) => info!("{}", label),
                Ok(Notice::Failure { label, message }) => warn!("{} failed: {}", label, message),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed notices"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
