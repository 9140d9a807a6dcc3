//! Circles: creation, invite codes and membership.

use std::sync::Arc;

use momentum_store::{
    CIRCLE_MEMBERS_TABLE, CIRCLES_TABLE, Circle, CircleMember, MemberRole, Mutation, NewCircle,
    Order, Query,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::{Context, Result, keys};

pub const INVITE_CODE_LEN: usize = 8;

/// A fresh invite code: uppercase alphanumerics from a random UUID.
pub fn generate_invite_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(INVITE_CODE_LEN)
        .collect::<String>()
        .to_uppercase()
}

/// Invite codes are matched case-insensitively and without surrounding space.
pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub struct Circles<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn circles(&self) -> Circles<'_> {
        Circles { ctx: self }
    }
}

impl Circles<'_> {
    /// Circles the user belongs to, oldest first.
    pub async fn mine(&self) -> Result<Arc<Vec<Circle>>> {
        let user_id = self.ctx.user_id;
        self.ctx
            .read(keys::circles_for(user_id), move |store| async move {
                let memberships: Vec<CircleMember> = store
                    .select(&Query::table(CIRCLE_MEMBERS_TABLE).eq("user_id", user_id))
                    .await?;
                let query = Query::table(CIRCLES_TABLE)
                    .in_list("id", memberships.iter().map(|m| m.circle_id))
                    .order("created_at", Order::Asc);
                store.select(&query).await
            })
            .await
    }

    /// Create a circle and join it as its admin.
    #[instrument(skip(self, description))]
    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<Circle> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::invalid("circle name is empty"));
        }
        let row = NewCircle {
            name: name.to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            invite_code: generate_invite_code(),
            created_by: self.ctx.user_id,
        };
        let circle: Circle = self
            .ctx
            .write(
                Mutation::new("Circle created")
                    .invalidates(keys::circles())
                    .quiet(),
                move |store| async move { store.insert_one(CIRCLES_TABLE, &row).await },
            )
            .await?;

        self.add_membership(circle.id, self.ctx.user_id, MemberRole::Admin, "Circle ready")
            .await?;
        info!(circle = %circle.id, invite = %circle.invite_code, "created circle");
        Ok(circle)
    }

    /// Join the circle an invite code belongs to. Joining twice is harmless.
    #[instrument(skip(self))]
    pub async fn join(&self, invite_code: &str) -> Result<Circle> {
        let code = normalize_invite_code(invite_code);
        if code.is_empty() {
            return Err(TrackerError::invalid("invite code is empty"));
        }
        let circle: Circle = self
            .ctx
            .store
            .select_one(&Query::table(CIRCLES_TABLE).eq("invite_code", &code))
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("circle with invite code {}", code)))?;

        self.add_membership(circle.id, self.ctx.user_id, MemberRole::Member, "Joined circle")
            .await?;
        info!(circle = %circle.id, "joined circle");
        Ok(circle)
    }

    #[instrument(skip(self))]
    pub async fn leave(&self, circle_id: Uuid) -> Result<()> {
        self.remove_member(circle_id, self.ctx.user_id).await
    }

    pub async fn members(&self, circle_id: Uuid) -> Result<Arc<Vec<CircleMember>>> {
        let query = Query::table(CIRCLE_MEMBERS_TABLE)
            .eq("circle_id", circle_id)
            .order("joined_at", Order::Asc);
        self.ctx
            .read(keys::circle_members(circle_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    /// Remove a member. Whether the caller may do so is the server's call.
    #[instrument(skip(self))]
    pub async fn remove_member(&self, circle_id: Uuid, user_id: Uuid) -> Result<()> {
        let query = Query::table(CIRCLE_MEMBERS_TABLE)
            .eq("circle_id", circle_id)
            .eq("user_id", user_id);
        let label = if user_id == self.ctx.user_id {
            "Left circle"
        } else {
            "Member removed"
        };
        self.ctx
            .write(
                Mutation::new(label)
                    .invalidates(keys::circle_members(circle_id))
                    .invalidates(keys::circles())
                    .invalidates(keys::leaderboard()),
                move |store| async move { store.delete::<CircleMember>(&query).await },
            )
            .await?;
        Ok(())
    }

    pub(crate) async fn add_membership(
        &self,
        circle_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        label: &str,
    ) -> Result<CircleMember> {
        let row = CircleMember {
            circle_id,
            user_id,
            role,
            joined_at: None,
        };
        let rows: Vec<CircleMember> = self
            .ctx
            .write(
                Mutation::new(label)
                    .invalidates(keys::circles())
                    .invalidates(keys::circle_members(circle_id))
                    .invalidates(keys::leaderboard()),
                move |store| async move {
                    store
                        .upsert(CIRCLE_MEMBERS_TABLE, &row, &["circle_id", "user_id"])
                        .await
                },
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| TrackerError::not_found(format!("membership in {}", circle_id)))
    }
}
