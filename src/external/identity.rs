use futures::future::{self, BoxFuture};
use uuid::Uuid;

use super::CollaboratorResult;

/// Issues stable opaque user ids and recognises them on later requests.
pub trait IdentityProvider: Send + Sync {
    /// Issue a fresh anonymous identity.
    fn sign_in(&self) -> BoxFuture<'static, CollaboratorResult<String>>;

    /// Return the user id carried by `credential`, or `None` when it is not one of ours.
    fn resolve(&self, credential: &str) -> Option<String>;
}

/// Anonymous sign-in: ids are random 32-character lowercase hex strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

const ID_LEN: usize = 32;

impl IdentityProvider for AnonymousIdentity {
    fn sign_in(&self) -> BoxFuture<'static, CollaboratorResult<String>> {
        let id = Uuid::new_v4().simple().to_string();
        Box::pin(future::ready(Ok(id)))
    }

    fn resolve(&self, credential: &str) -> Option<String> {
        let credential = credential.trim();
        let well_formed = credential.len() == ID_LEN
            && credential
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| credential.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_ids_resolve() {
        let identity = AnonymousIdentity;
        let id = identity.sign_in().await.unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(identity.resolve(&id), Some(id.clone()));
        assert_ne!(identity.sign_in().await.unwrap(), id);
    }

    #[test]
    fn rejects_foreign_credentials() {
        let identity = AnonymousIdentity;
        assert_eq!(identity.resolve(""), None);
        assert_eq!(identity.resolve("alice"), None);
        assert_eq!(identity.resolve(&"G".repeat(32)), None);
        assert_eq!(identity.resolve(&"A".repeat(32)), None);
    }
}
