//! In-memory catalog and identity implementations (tests/dev).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use coursemart_core::{Money, ProductKind, ProductRef, UserId};

use crate::ports::{
    CatalogError, IdentityError, IdentityService, ProductCatalog, ProductSnapshot, SessionToken,
};

/// In-memory [`ProductCatalog`].
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: Mutex<HashMap<ProductRef, ProductSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, product: ProductRef, title: impl Into<String>, price: Money) {
        self.products.lock().unwrap().insert(
            product,
            ProductSnapshot {
                title: title.into(),
                price,
            },
        );
    }

    /// Convenience for tests: register a fresh product and return its ref.
    pub fn add_new(&self, kind: ProductKind, title: impl Into<String>, price: Money) -> ProductRef {
        let product = ProductRef::new(kind, coursemart_core::ProductId::new());
        self.add(product, title, price);
        product
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn resolve(
        &self,
        product: &ProductRef,
    ) -> Result<Option<ProductSnapshot>, CatalogError> {
        Ok(self.products.lock().unwrap().get(product).cloned())
    }
}

/// In-memory [`IdentityService`] with failure injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryIdentity {
    users: Mutex<HashMap<String, UserId>>,
    fail_create: AtomicBool,
    fail_session: AtomicBool,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_create_failing(&self, failing: bool) {
        self.fail_create.store(failing, Ordering::SeqCst);
    }

    pub fn set_session_failing(&self, failing: bool) {
        self.fail_session.store(failing, Ordering::SeqCst);
    }

    pub fn user_for(&self, email: &str) -> Option<UserId> {
        self.users.lock().unwrap().get(email).copied()
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentity {
    async fn create_user_inline(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<UserId, IdentityError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(IdentityError("identity service down".to_string()));
        }
        let mut users = self.users.lock().unwrap();
        let user_id = *users
            .entry(email.to_string())
            .or_insert_with(UserId::new);
        Ok(user_id)
    }

    async fn issue_session(&self, _user_id: UserId) -> Result<SessionToken, IdentityError> {
        if self.fail_session.load(Ordering::SeqCst) {
            return Err(IdentityError("session issuance down".to_string()));
        }
        Ok(SessionToken(format!("sess_{}", Uuid::now_v7().simple())))
    }
}
