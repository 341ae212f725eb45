//! In-memory stores backing the user and product capabilities.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::capability::messages::{Product, User};
use crate::error::MeshError;

/// Id of the catalog item every process provisions and every new user receives.
pub const WELCOME_PRODUCT_ID: &str = "1";

/// Users keyed by email.
#[derive(Debug, Clone, Default)]
pub struct UserRepository {
    by_email: Arc<DashMap<String, User>>,
}

impl UserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) -> Result<(), MeshError> {
        match self.by_email.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(MeshError::AlreadyExists(format!(
                "user with email {}",
                user.email
            ))),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    /// Store `user` provisionally. The entry is removed again when the
    /// returned reservation is dropped without [`UserReservation::commit`],
    /// including when the future holding it is cancelled.
    pub fn reserve(&self, user: User) -> Result<UserReservation, MeshError> {
        let email = user.email.clone();
        let id = user.id.clone();
        self.insert(user)?;
        Ok(UserReservation {
            repository: self.clone(),
            email,
            id,
            committed: false,
        })
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        self.by_email.get(email).map(|u| u.clone())
    }

    /// Return the user for `email`, creating a placeholder account on first sight.
    pub fn provision(&self, email: &str) -> User {
        self.by_email
            .entry(email.to_string())
            .or_insert_with(|| User {
                id: uuid::Uuid::new_v4().to_string(),
                email: email.to_string(),
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

/// A user stored by [`UserRepository::reserve`] that is not yet final.
#[must_use = "dropping the reservation removes the user"]
#[derive(Debug)]
pub struct UserReservation {
    repository: UserRepository,
    email: String,
    id: String,
    committed: bool,
}

impl UserReservation {
    /// Keep the user.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UserReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Only our own entry; a later user with the same email is left alone.
        let removed = self
            .repository
            .by_email
            .remove_if(&self.email, |_, user| user.id == self.id);
        if removed.is_some() {
            tracing::debug!(email = %self.email, "Rolled back uncommitted user");
        }
    }
}

/// Products keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    items: Arc<DashMap<String, Product>>,
}

impl ProductCatalog {
    /// Catalog holding the welcome product.
    pub fn seeded() -> Self {
        let catalog = Self::default();
        catalog.provision_welcome();
        catalog
    }

    pub fn welcome_product() -> Product {
        Product {
            id: WELCOME_PRODUCT_ID.to_string(),
            name: "Product 1".to_string(),
            description: "Product 1 Description".to_string(),
            price: 100.0,
            quantity: 100,
        }
    }

    /// Upsert the welcome product.
    pub fn provision_welcome(&self) {
        let product = Self::welcome_product();
        self.items.insert(product.id.clone(), product);
    }

    pub fn get(&self, id: &str) -> Option<Product> {
        self.items.get(id).map(|p| p.clone())
    }

    pub fn insert(&self, product: Product) -> Result<(), MeshError> {
        match self.items.entry(product.id.clone()) {
            Entry::Occupied(_) => Err(MeshError::AlreadyExists(format!("product {}", product.id))),
            Entry::Vacant(slot) => {
                slot.insert(product);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
