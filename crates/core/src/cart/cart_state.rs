//! Reducer-style cart state.
//!
//! Each method is one state transition. Every transition that touches line
//! quantities finishes with `recompute_totals`, so `items_qty` is consistent
//! after each step and not only at rest.

use serde::{Deserialize, Serialize};

use super::cart_model::{AddItemRequest, CartLineItem, CartSnapshot};

/// Coarse request lifecycle flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// How an add was reflected locally before the network answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddMark {
    /// A line with the same SKU already existed and was marked loading.
    Existing,
    /// A placeholder line was appended with this synthetic id.
    Placeholder(String),
    /// No cart is loaded yet; nothing was changed.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    pub details: Option<CartSnapshot>,
    /// Copy of `details` taken before a bulk clear. The outer `None` means no
    /// backup is pending; `Some(None)` is a pending backup of an unloaded cart.
    pub backup_details: Option<Option<CartSnapshot>>,
    pub status: CartStatus,
    pub error: Option<String>,
}

impl CartState {
    pub fn items_qty(&self) -> u32 {
        self.details.as_ref().map(|d| d.items_qty).unwrap_or(0)
    }

    pub fn item(&self, item_id: &str) -> Option<&CartLineItem> {
        self.details.as_ref().and_then(|d| d.item(item_id))
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    // ── Fetch ───────────────────────────────────────────────────────────────

    /// Enter `Loading` only on the very first fetch. Returns whether it did.
    pub fn fetch_started(&mut self) -> bool {
        if self.status == CartStatus::Idle {
            self.status = CartStatus::Loading;
            return true;
        }
        false
    }

    pub fn fetch_succeeded(&mut self, mut snapshot: CartSnapshot) {
        snapshot.recompute_totals();
        self.details = Some(snapshot);
        self.status = CartStatus::Succeeded;
        self.error = None;
    }

    /// Keeps whatever `details` were loaded before.
    pub fn fetch_failed(&mut self, message: impl Into<String>) {
        self.status = CartStatus::Failed;
        self.error = Some(message.into());
    }

    // ── Add ─────────────────────────────────────────────────────────────────

    pub fn add_started(&mut self, request: &AddItemRequest, placeholder_id: String) -> AddMark {
        let Some(details) = self.details.as_mut() else {
            return AddMark::Detached;
        };

        if let Some(existing) = details.items.iter_mut().find(|i| i.sku == request.sku) {
            existing.loading = true;
            return AddMark::Existing;
        }

        details.items.push(CartLineItem {
            item_id: placeholder_id.clone(),
            sku: request.sku.clone(),
            qty: request.qty,
            name: request.name.clone(),
            price: request.price,
            image: request.image.clone(),
            loading: true,
            previous_qty: None,
        });
        details.recompute_totals();
        AddMark::Placeholder(placeholder_id)
    }

    /// Replace the pending line for `requested_sku` with the server's line.
    pub fn add_succeeded(&mut self, requested_sku: &str, mut confirmed: CartLineItem) {
        let Some(details) = self.details.as_mut() else {
            return;
        };
        confirmed.loading = false;
        confirmed.previous_qty = None;

        let slot = details
            .items
            .iter()
            .position(|i| i.sku == requested_sku)
            .or_else(|| {
                details
                    .items
                    .iter()
                    .position(|i| i.item_id == confirmed.item_id)
            });

        match slot {
            Some(index) => {
                if confirmed.image.is_none() {
                    confirmed.image = details.items[index].image.take();
                }
                details.items[index] = confirmed;
                let confirmed_id = details.items[index].item_id.clone();
                let mut position = 0;
                // The backend may merge into a line stored under a different SKU.
                details.items.retain(|item| {
                    let keep = position == index || item.item_id != confirmed_id;
                    position += 1;
                    keep
                });
            }
            None => details.items.push(confirmed),
        }
        details.recompute_totals();
    }

    pub fn add_failed(&mut self, requested_sku: &str, message: impl Into<String>) {
        if let Some(details) = self.details.as_mut() {
            details
                .items
                .retain(|item| !(item.sku == requested_sku && item.is_placeholder()));
            for item in details.items.iter_mut().filter(|i| i.sku == requested_sku) {
                item.loading = false;
            }
            details.recompute_totals();
        }
        self.error = Some(message.into());
    }

    // ── Update quantity ─────────────────────────────────────────────────────

    /// Apply the requested quantity at once. Returns false if the line is absent.
    ///
    /// `previous_qty` keeps the first (confirmed) value across a burst of updates.
    pub fn update_started(&mut self, item_id: &str, qty: u32) -> bool {
        let Some(details) = self.details.as_mut() else {
            return false;
        };
        let Some(item) = details.item_mut(item_id) else {
            return false;
        };
        if item.previous_qty.is_none() {
            item.previous_qty = Some(item.qty);
        }
        item.qty = qty;
        item.loading = true;
        details.recompute_totals();
        true
    }

    /// Server is authoritative for the final line; the local image is kept
    /// because update responses do not carry one.
    pub fn update_succeeded(&mut self, mut confirmed: CartLineItem) {
        let Some(details) = self.details.as_mut() else {
            return;
        };
        let Some(item) = details.item_mut(&confirmed.item_id) else {
            return;
        };
        if confirmed.image.is_none() {
            confirmed.image = item.image.take();
        }
        confirmed.loading = false;
        confirmed.previous_qty = None;
        *item = confirmed;
        details.recompute_totals();
    }

    /// A newer update for the line is pending: move the rollback baseline to
    /// the server-confirmed quantity without touching the displayed one.
    pub fn update_confirmed_superseded(&mut self, item_id: &str, confirmed_qty: u32) {
        if let Some(item) = self.details.as_mut().and_then(|d| d.item_mut(item_id)) {
            item.previous_qty = Some(confirmed_qty);
        }
    }

    pub fn update_failed(&mut self, item_id: &str, message: impl Into<String>) {
        if let Some(details) = self.details.as_mut() {
            if let Some(item) = details.item_mut(item_id) {
                if let Some(previous) = item.previous_qty.take() {
                    item.qty = previous;
                }
                item.loading = false;
            }
            details.recompute_totals();
        }
        self.error = Some(message.into());
    }

    // ── Remove ──────────────────────────────────────────────────────────────

    pub fn remove_started(&mut self, item_id: &str) -> bool {
        match self.details.as_mut().and_then(|d| d.item_mut(item_id)) {
            Some(item) => {
                item.loading = true;
                true
            }
            None => false,
        }
    }

    pub fn remove_succeeded(&mut self, item_id: &str) {
        if let Some(details) = self.details.as_mut() {
            details.items.retain(|item| item.item_id != item_id);
            details.recompute_totals();
        }
    }

    /// The line stays in place; only its pending flag clears.
    pub fn remove_failed(&mut self, item_id: &str, message: impl Into<String>) {
        if let Some(item) = self.details.as_mut().and_then(|d| d.item_mut(item_id)) {
            item.loading = false;
        }
        self.error = Some(message.into());
    }

    // ── Clear ───────────────────────────────────────────────────────────────

    /// Empty the cart locally without a backup.
    pub fn clear_local(&mut self) {
        if let Some(details) = self.details.as_mut() {
            details.items.clear();
            details.recompute_totals();
        }
    }

    /// Back up `details`, empty the items, and return the server-side ids
    /// that existed before the clear.
    pub fn clear_started(&mut self) -> Vec<String> {
        self.backup_details = Some(self.details.clone());
        let Some(details) = self.details.as_mut() else {
            return Vec::new();
        };
        let item_ids = details
            .items
            .iter()
            .filter(|item| !item.is_placeholder())
            .map(|item| item.item_id.clone())
            .collect();
        details.items.clear();
        details.recompute_totals();
        item_ids
    }

    pub fn clear_succeeded(&mut self) {
        self.backup_details = None;
    }

    pub fn clear_failed(&mut self, message: impl Into<String>) {
        if let Some(backup) = self.backup_details.take() {
            self.details = backup;
        }
        self.error = Some(message.into());
    }

    // ── Order ───────────────────────────────────────────────────────────────

    /// The backend consumed the cart into an order.
    pub fn order_placed(&mut self) {
        self.details = None;
        self.backup_details = None;
        self.status = CartStatus::Idle;
        self.error = None;
    }
}
