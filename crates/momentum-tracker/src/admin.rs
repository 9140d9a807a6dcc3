//! Administrative operations. The server decides whether the caller may run
//! them; a refusal comes back as an ordinary store error.

use momentum_store::{CircleMember, MemberRole, Mutation, PROFILES_TABLE, Profile, Query, UserRole};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::{Context, Result, keys};

/// Edge function that provisions an account with a password.
pub const CREATE_USER_FUNCTION: &str = "admin-create-user";

#[derive(Serialize)]
struct CreateUserRequest {
    email: String,
    password: String,
    display_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedUser {
    pub user_id: Uuid,
}

pub struct Admin<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn admin(&self) -> Admin<'_> {
        Admin { ctx: self }
    }
}

impl Admin<'_> {
    /// Give every listed user `role`. Returns the updated profiles.
    #[instrument(skip(self, user_ids), fields(users = user_ids.len()))]
    pub async fn set_roles(&self, user_ids: &[Uuid], role: UserRole) -> Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Err(TrackerError::invalid("no users selected"));
        }
        let query = Query::table(PROFILES_TABLE).in_list("id", user_ids);
        let updated: Vec<Profile> = self
            .ctx
            .write(
                Mutation::new("Roles updated").invalidates(keys::profiles()),
                move |store| async move { store.update(&query, &json!({ "role": role })).await },
            )
            .await?;
        info!(updated = updated.len(), ?role, "roles updated");
        Ok(updated)
    }

    #[instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<CreatedUser> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(TrackerError::invalid(format!("not an email address: {}", email)));
        }
        if password.is_empty() {
            return Err(TrackerError::invalid("password is empty"));
        }
        let body = CreateUserRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.trim().to_string(),
        };
        let created: CreatedUser = self
            .ctx
            .write(
                Mutation::new("User created").invalidates(keys::profiles()),
                move |store| async move { store.invoke(CREATE_USER_FUNCTION, &body).await },
            )
            .await?;
        info!(user = %created.user_id, "user created");
        Ok(created)
    }

    /// Put a user into a circle, or change their role there.
    #[instrument(skip(self))]
    pub async fn add_member(
        &self,
        circle_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<CircleMember> {
        self.ctx
            .circles()
            .add_membership(circle_id, user_id, role, "Member added")
            .await
    }
}
