pub mod backend;

pub use backend::{connect_backend, CartBackend, MemoryCartBackend, RedisCartBackend};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    catalog::CatalogClient,
    config::AppConfig,
    errors::{CartLineError, ServiceError},
    events::{Event, EventSender},
};

const CART_KEY_PREFIX: &str = "cart:";

/// One stored cart line. The unit price is captured at add/update time so the
/// pre-checkout gate can tell the buyer the price moved under them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartEntry {
    pub quantity: i32,
    pub unit_price: Decimal,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cart line enriched with the current catalog snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub product_name: String,
    /// Current catalog price, not the price at add time
    pub unit_price: Decimal,
    pub stock: i32,
    pub seller_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub total: Decimal,
    pub item_count: i32,
}

impl CartView {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: Decimal::ZERO,
            item_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of the pre-checkout validation gate. Never mutates the cart.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartValidation {
    pub valid: bool,
    pub errors: Vec<CartLineError>,
    pub cart: CartView,
}

/// Per-user cart store over a volatile hash backend, with every stock and
/// availability check re-reading the live catalog snapshot.
#[derive(Clone)]
pub struct CartService {
    backend: Arc<dyn CartBackend>,
    catalog: Arc<dyn CatalogClient>,
    event_sender: Arc<EventSender>,
    ttl: Duration,
}

impl CartService {
    pub fn new(
        backend: Arc<dyn CartBackend>,
        catalog: Arc<dyn CatalogClient>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            event_sender,
            ttl: Duration::from_secs(config.cart_ttl_days * 24 * 60 * 60),
        }
    }

    fn cart_key(owner: &str) -> String {
        format!("{}{}", CART_KEY_PREFIX, owner)
    }

    async fn entries(&self, owner: &str) -> Result<HashMap<Uuid, CartEntry>, ServiceError> {
        let raw = self.backend.get_all(&Self::cart_key(owner)).await?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            let product_id = Uuid::parse_str(&field).map_err(|_| {
                ServiceError::SerializationError(format!("Bad cart field: {}", field))
            })?;
            let entry: CartEntry = serde_json::from_str(&value)?;
            entries.insert(product_id, entry);
        }
        Ok(entries)
    }

    async fn write_entry(
        &self,
        owner: &str,
        product_id: Uuid,
        entry: &CartEntry,
    ) -> Result<(), ServiceError> {
        let value = serde_json::to_string(entry)?;
        self.backend
            .set_field(
                &Self::cart_key(owner),
                &product_id.to_string(),
                &value,
                self.ttl,
            )
            .await
    }

    /// Returns the cart enriched with current catalog data. Lines whose
    /// product has disappeared from the catalog are dropped from storage.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: &str) -> Result<CartView, ServiceError> {
        let entries = self.entries(owner).await?;
        if entries.is_empty() {
            return Ok(CartView::empty());
        }

        let mut items = Vec::with_capacity(entries.len());
        for (product_id, entry) in entries {
            let Some(product) = self.catalog.get_product(product_id).await? else {
                self.backend
                    .delete_field(&Self::cart_key(owner), &product_id.to_string())
                    .await?;
                continue;
            };

            let subtotal = product.price * Decimal::from(entry.quantity);
            items.push(CartLine {
                product_id,
                quantity: entry.quantity,
                product_name: product.name,
                unit_price: product.price,
                stock: product.stock,
                seller_id: product.seller_id,
                subtotal,
                added_at: entry.added_at,
            });
        }

        items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.product_id.cmp(&b.product_id)));

        let total = items.iter().map(|i| i.subtotal).sum();
        let item_count = items.iter().map(|i| i.quantity).sum();

        Ok(CartView {
            items,
            total,
            item_count,
        })
    }

    /// Adds `quantity` units of a product, stacking onto any existing line.
    /// The stock check runs against the live catalog snapshot and covers the
    /// cumulative quantity, not just the increment.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        if !product.is_active() {
            return Err(ServiceError::InvalidOperation(
                "Product is not available".to_string(),
            ));
        }

        let entries = self.entries(owner).await?;
        let existing = entries.get(&product_id);
        let new_quantity = existing.map(|e| e.quantity).unwrap_or(0) + quantity;

        if new_quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} items available in stock",
                product.stock
            )));
        }

        let now = Utc::now();
        let entry = CartEntry {
            quantity: new_quantity,
            unit_price: product.price,
            added_at: existing.map(|e| e.added_at).unwrap_or(now),
            updated_at: now,
        };
        self.write_entry(owner, product_id, &entry).await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                owner: owner.to_string(),
                product_id,
                quantity,
            })
            .await;

        info!(owner, product_id = %product_id, quantity, "Item added to cart");
        self.get_cart(owner).await
    }

    /// Sets the quantity of an existing line. Zero or negative removes it.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        owner: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(owner, product_id).await;
        }

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        if quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} items available in stock",
                product.stock
            )));
        }

        let entries = self.entries(owner).await?;
        let existing = entries
            .get(&product_id)
            .ok_or_else(|| ServiceError::NotFound("Item not in cart".to_string()))?;

        let entry = CartEntry {
            quantity,
            unit_price: product.price,
            added_at: existing.added_at,
            updated_at: Utc::now(),
        };
        self.write_entry(owner, product_id, &entry).await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                owner: owner.to_string(),
                product_id,
                quantity,
            })
            .await;

        self.get_cart(owner).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: &str,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        self.backend
            .delete_field(&Self::cart_key(owner), &product_id.to_string())
            .await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                owner: owner.to_string(),
                product_id,
            })
            .await;

        self.get_cart(owner).await
    }

    /// Drops the whole cart. After a successful checkout this is what
    /// atomically replaces the cart with an empty one.
    #[instrument(skip(self))]
    pub async fn clear(&self, owner: &str) -> Result<(), ServiceError> {
        self.backend.delete(&Self::cart_key(owner)).await?;

        self.event_sender
            .send_or_log(Event::CartCleared {
                owner: owner.to_string(),
            })
            .await;

        info!(owner, "Cart cleared");
        Ok(())
    }

    /// Merges a guest cart into a user cart on login. Quantities are summed
    /// and capped at current stock, the earliest added_at wins, and the
    /// guest cart is deleted afterwards. Safe when either cart is empty.
    #[instrument(skip(self))]
    pub async fn merge(&self, guest_owner: &str, user_owner: &str) -> Result<CartView, ServiceError> {
        let guest_entries = self.entries(guest_owner).await?;
        if guest_entries.is_empty() {
            self.backend.delete(&Self::cart_key(guest_owner)).await?;
            return self.get_cart(user_owner).await;
        }

        let user_entries = self.entries(user_owner).await?;

        for (product_id, guest_entry) in guest_entries {
            let product = match self.catalog.get_product(product_id).await? {
                Some(p) => p,
                None => {
                    warn!(product_id = %product_id, "Skipping vanished product during cart merge");
                    continue;
                }
            };

            let existing = user_entries.get(&product_id);
            let summed = existing.map(|e| e.quantity).unwrap_or(0) + guest_entry.quantity;
            let capped = summed.min(product.stock);
            if capped < 1 {
                continue;
            }

            let added_at = match existing {
                Some(e) => e.added_at.min(guest_entry.added_at),
                None => guest_entry.added_at,
            };

            let entry = CartEntry {
                quantity: capped,
                unit_price: product.price,
                added_at,
                updated_at: Utc::now(),
            };
            self.write_entry(user_owner, product_id, &entry).await?;
        }

        self.backend.delete(&Self::cart_key(guest_owner)).await?;

        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_owner: guest_owner.to_string(),
                user_owner: user_owner.to_string(),
            })
            .await;

        info!(guest_owner, user_owner, "Carts merged");
        self.get_cart(user_owner).await
    }

    /// Pre-checkout gate: re-checks every line against the current catalog
    /// snapshot and reports all problems without touching the cart.
    #[instrument(skip(self))]
    pub async fn validate(&self, owner: &str) -> Result<CartValidation, ServiceError> {
        let entries = self.entries(owner).await?;
        let mut errors = Vec::new();
        let mut items = Vec::with_capacity(entries.len());

        for (product_id, entry) in entries {
            let Some(product) = self.catalog.get_product(product_id).await? else {
                errors.push(CartLineError::not_found(product_id));
                continue;
            };

            if !product.is_active() {
                errors.push(CartLineError::inactive(product_id));
            }

            if entry.quantity > product.stock {
                errors.push(CartLineError::insufficient_stock(
                    product_id,
                    product.stock,
                    entry.quantity,
                ));
            }

            if entry.unit_price != product.price {
                errors.push(CartLineError::price_changed(
                    product_id,
                    entry.unit_price,
                    product.price,
                ));
            }

            let subtotal = product.price * Decimal::from(entry.quantity);
            items.push(CartLine {
                product_id,
                quantity: entry.quantity,
                product_name: product.name,
                unit_price: product.price,
                stock: product.stock,
                seller_id: product.seller_id,
                subtotal,
                added_at: entry.added_at,
            });
        }

        items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.product_id.cmp(&b.product_id)));
        let total = items.iter().map(|i| i.subtotal).sum();
        let item_count = items.iter().map(|i| i.quantity).sum();

        Ok(CartValidation {
            valid: errors.is_empty(),
            errors,
            cart: CartView {
                items,
                total,
                item_count,
            },
        })
    }
}
