//! In-memory grant store and collaborators (tests/dev).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use coursemart_core::{OrderId, ProductId, UserId};

use crate::grant::EntitlementGrant;
use crate::ports::{CollaboratorError, EnrollmentService, LibraryService};
use crate::store::{GrantStore, GrantStoreError};

/// In-memory [`GrantStore`]; the map entry is the uniqueness anchor.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: Mutex<HashMap<(OrderId, ProductId), EntitlementGrant>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn insert_if_absent(&self, grant: EntitlementGrant) -> Result<bool, GrantStoreError> {
        let mut grants = self
            .grants
            .lock()
            .map_err(|_| GrantStoreError::Backend("lock poisoned".to_string()))?;
        let key = (grant.order_id, grant.product.id);
        if grants.contains_key(&key) {
            return Ok(false);
        }
        grants.insert(key, grant);
        Ok(true)
    }

    async fn grants_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<EntitlementGrant>, GrantStoreError> {
        let grants = self
            .grants
            .lock()
            .map_err(|_| GrantStoreError::Backend("lock poisoned".to_string()))?;
        let mut found: Vec<EntitlementGrant> = grants
            .values()
            .filter(|g| g.order_id == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|g| g.granted_at);
        Ok(found)
    }
}

/// In-memory enrollment service with failure injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryEnrollments {
    enrolled: Mutex<HashSet<(UserId, ProductId)>>,
    failing: AtomicBool,
}

impl InMemoryEnrollments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_enrolled(&self, user_id: UserId, course_id: ProductId) -> bool {
        self.enrolled.lock().unwrap().contains(&(user_id, course_id))
    }
}

#[async_trait]
impl EnrollmentService for InMemoryEnrollments {
    async fn ensure_enrolled(
        &self,
        user_id: UserId,
        course_id: ProductId,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError("enrollment service down".to_string()));
        }
        self.enrolled.lock().unwrap().insert((user_id, course_id));
        Ok(())
    }
}

/// In-memory paper/e-book library with failure injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryLibrary {
    unlocked: Mutex<HashSet<(UserId, ProductId)>>,
    failing: AtomicBool,
}

impl InMemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_unlocked(&self, user_id: UserId, product_id: ProductId) -> bool {
        self.unlocked.lock().unwrap().contains(&(user_id, product_id))
    }
}

#[async_trait]
impl LibraryService for InMemoryLibrary {
    async fn ensure_unlocked(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError("library service down".to_string()));
        }
        self.unlocked.lock().unwrap().insert((user_id, product_id));
        Ok(())
    }
}
