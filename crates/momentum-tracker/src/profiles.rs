//! User profiles.

use std::sync::Arc;

use momentum_store::{Order, PROFILES_TABLE, Profile, Query};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::{Context, Result, keys};

pub struct Profiles<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn profiles(&self) -> Profiles<'_> {
        Profiles { ctx: self }
    }
}

impl Profiles<'_> {
    /// The signed-in user's profile.
    pub async fn me(&self) -> Result<Profile> {
        self.get(self.ctx.user_id).await
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Profile> {
        let query = Query::table(PROFILES_TABLE).eq("id", user_id);
        let found: Arc<Option<Profile>> = self
            .ctx
            .read(keys::profile(user_id), move |store| async move {
                store.select_one(&query).await
            })
            .await?;
        found
            .as_ref()
            .clone()
            .ok_or_else(|| TrackerError::not_found(format!("profile {}", user_id)))
    }

    /// Every profile the caller can see, by name. Only admins see them all.
    pub async fn all(&self) -> Result<Arc<Vec<Profile>>> {
        let query = Query::table(PROFILES_TABLE).order("display_name", Order::Asc);
        self.ctx
            .read(keys::profiles().with("all"), move |store| async move {
                store.select(&query).await
            })
            .await
    }
}
