use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{StoreError, UserStore};
use super::repo_types::{NewUser, ProfilePatch, PublicUser, User};

/// In-process store used by the test suite. Every check-and-write happens
/// under one lock, mirroring the unique index of the real table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned().map(PublicUser::from))
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::EmailTaken);
        }
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            avatar: None,
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: ProfilePatch,
    ) -> Result<Option<PublicUser>, StoreError> {
        let mut users = self.users.lock().await;
        if let Some(email) = &patch.email {
            if users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::EmailTaken);
            }
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(email) = patch.email {
            user.email = email;
        }
        Ok(Some(user.clone().into()))
    }

    async fn set_avatar(&self, id: Uuid, avatar: &str) -> Result<Option<PublicUser>, StoreError> {
        let mut users = self.users.lock().await;
        Ok(users.iter_mut().find(|u| u.id == id).map(|u| {
            u.avatar = Some(avatar.to_string());
            PublicUser::from(u.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "A".into(),
            email: email.into(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn create_enforces_unique_email() {
        let store = MemoryUserStore::default();
        store.create(new_user("a@x.com")).await.expect("first insert");
        let err = store.create(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
    }

    #[tokio::test]
    async fn update_profile_rejects_email_of_other_user() {
        let store = MemoryUserStore::default();
        let a = store.create(new_user("a@x.com")).await.unwrap();
        store.create(new_user("b@x.com")).await.unwrap();

        let err = store
            .update_profile(
                a.id,
                ProfilePatch {
                    name: None,
                    email: Some("b@x.com".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));

        // keeping one's own email is not a conflict
        let same = store
            .update_profile(
                a.id,
                ProfilePatch {
                    name: Some("Renamed".into()),
                    email: Some("a@x.com".into()),
                },
            )
            .await
            .unwrap()
            .expect("user exists");
        assert_eq!(same.name, "Renamed");
    }

    #[tokio::test]
    async fn public_projection_and_avatar() {
        let store = MemoryUserStore::default();
        let a = store.create(new_user("a@x.com")).await.unwrap();
        let public = store.find_public_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(public.avatar, None);

        let updated = store
            .set_avatar(a.id, "/uploads/x.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.avatar.as_deref(), Some("/uploads/x.png"));
        assert!(store.set_avatar(Uuid::new_v4(), "/uploads/y.png").await.unwrap().is_none());
    }
}
