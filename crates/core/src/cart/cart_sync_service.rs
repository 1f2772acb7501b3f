//! Cart synchronization engine.
//!
//! Keeps an optimistically updated local cart consistent with the remote cart
//! service. Every mutation is applied locally first, then confirmed by the
//! backend's answer or reverted.
//!
//! Locking:
//! - `inner` (std mutex) guards the cart state and the per-line update
//!   generations. It is never held across an await.
//! - `guest_cart_gate` serializes guest cart creation, replacement and
//!   assignment so concurrent callers never create two guest carts.
//! - Per-line async locks serialize network calls that target the same
//!   `item_id` (quantity updates, removals, bulk clear).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::cart_api::CartApi;
use super::cart_model::{
    placeholder_item_id, AddItemRequest, Address, CartLineItem, CartRoute, CartSnapshot,
    NewCartItem, OrderPayload, ShippingMethod, PLACEHOLDER_PREFIX,
};
use super::cart_state::{AddMark, CartState};
use super::cart_sync_config::CartSyncConfig;
use crate::errors::{Error, Result};
use crate::events::{CartEvent, CartEventSink, NoOpCartEventSink};
use crate::session::Session;
use crate::storage::LocalStore;

/// Result of a quantity update request.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The backend confirmed this update; the line now holds the server data.
    Confirmed(CartLineItem),
    /// A newer update for the same line took over; it owns the final state.
    Superseded,
    /// No line with that id is in the cart.
    NotInCart,
}

#[derive(Debug, Default)]
struct EngineState {
    cart: CartState,
    /// Latest update generation per line; a pending update only proceeds while
    /// it holds the latest value.
    generations: HashMap<String, u64>,
    /// Source of generation numbers. Never reset, so an update left pending
    /// across `reset` or an order can not match a later one.
    epoch: u64,
}

impl EngineState {
    fn next_generation(&mut self, item_id: &str) -> u64 {
        self.epoch += 1;
        self.generations.insert(item_id.to_string(), self.epoch);
        self.epoch
    }

    /// Back to the initial cart, keeping the generation source.
    fn reset(&mut self) {
        *self = Self {
            epoch: self.epoch,
            ..Self::default()
        };
    }

    fn is_latest(&self, item_id: &str, generation: u64) -> bool {
        self.generations.get(item_id) == Some(&generation)
    }
}

pub struct CartSyncService {
    api: Arc<dyn CartApi>,
    store: Arc<dyn LocalStore>,
    event_sink: Arc<dyn CartEventSink>,
    config: CartSyncConfig,
    inner: Mutex<EngineState>,
    guest_cart_gate: AsyncMutex<()>,
    line_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CartSyncService {
    pub fn new(api: Arc<dyn CartApi>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            api,
            store,
            event_sink: Arc::new(NoOpCartEventSink),
            config: CartSyncConfig::default(),
            inner: Mutex::new(EngineState::default()),
            guest_cart_gate: AsyncMutex::new(()),
            line_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: CartSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the sink notified after every state transition.
    pub fn with_event_sink(mut self, event_sink: Arc<dyn CartEventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> CartState {
        self.lock_inner().cart.clone()
    }

    pub fn details(&self) -> Option<CartSnapshot> {
        self.lock_inner().cart.details.clone()
    }

    pub fn items_qty(&self) -> u32 {
        self.lock_inner().cart.items_qty()
    }

    pub fn clear_error(&self) {
        self.mutate(|cart| cart.clear_error());
    }

    /// Stored guest cart identifier, if the session has one.
    pub fn guest_cart_id(&self) -> Result<Option<String>> {
        self.store.get(&self.config.guest_cart_key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the cart for the session and replace `details` wholesale.
    ///
    /// Only the first fetch shows the blocking loading state. On failure the
    /// previous details stay, and a fresh cart is created best-effort so the
    /// next operation has somewhere to write.
    pub async fn fetch_cart(&self, session: &Session) -> Result<CartSnapshot> {
        let first_load = self.mutate(|cart| cart.fetch_started());
        debug!(
            "[Cart] Fetching {} cart (first_load={})",
            if session.is_guest() { "guest" } else { "customer" },
            first_load
        );

        match self.load_cart(session).await {
            Ok(snapshot) => {
                let items_qty = snapshot.items_qty;
                self.mutate(|cart| cart.fetch_succeeded(snapshot.clone()));
                debug!(
                    "[Cart] Fetched cart {} ({} line(s), qty {})",
                    snapshot.id,
                    snapshot.items.len(),
                    items_qty
                );
                Ok(snapshot)
            }
            Err(err) => {
                let outcome = self.fail(err, |cart, message| cart.fetch_failed(message));
                if let Err(err) = &outcome {
                    self.recover_cart(session, err).await;
                }
                outcome
            }
        }
    }

    /// Add a product line, showing it immediately as pending.
    pub async fn add_item(&self, session: &Session, request: AddItemRequest) -> Result<CartLineItem> {
        if request.sku.trim().is_empty() {
            return self.fail(Error::invalid_request("SKU is required"), set_error);
        }
        if request.qty == 0 {
            return self.fail(
                Error::invalid_request("Quantity must be at least 1"),
                set_error,
            );
        }

        let placeholder_id = placeholder_item_id(Utc::now().timestamp_millis());
        let mark = self.mutate(|cart| cart.add_started(&request, placeholder_id));
        debug!("[Cart] Adding {} x{} ({:?})", request.sku, request.qty, mark);

        match self.send_add(session, &request).await {
            Ok(line) => {
                self.mutate(|cart| cart.add_succeeded(&request.sku, line.clone()));
                info!("[Cart] Added {} as item {}", line.sku, line.item_id);
                Ok(line)
            }
            Err(err) => {
                if mark == AddMark::Detached {
                    debug!("[Cart] Add of {} failed before any cart was loaded", request.sku);
                }
                self.fail(err, |cart, message| cart.add_failed(&request.sku, message))
            }
        }
    }

    /// Change a line's quantity.
    ///
    /// The displayed quantity changes at once. The network call is debounced
    /// per line: only the last request inside the quiet window is sent, and
    /// calls for the same line never overlap on the wire.
    pub async fn update_item_quantity(
        &self,
        session: &Session,
        item_id: &str,
        qty: u32,
    ) -> Result<UpdateOutcome> {
        if qty == 0 {
            return self.fail(
                Error::invalid_request("Quantity must be at least 1"),
                set_error,
            );
        }
        if item_id.starts_with(PLACEHOLDER_PREFIX) {
            return self.fail(
                Error::invalid_request("Item is still being added to the cart"),
                set_error,
            );
        }
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };

        let generation = self.mutate_engine(|inner| {
            if !inner.cart.update_started(item_id, qty) {
                return None;
            }
            Some(inner.next_generation(item_id))
        });
        let Some(generation) = generation else {
            debug!("[Cart] Update skipped, item {} not in cart", item_id);
            return Ok(UpdateOutcome::NotInCart);
        };

        if !self.config.update_debounce.is_zero() {
            tokio::time::sleep(self.config.update_debounce).await;
            if !self.lock_inner().is_latest(item_id, generation) {
                debug!("[Cart] Update of {} to {} superseded while debouncing", item_id, qty);
                return Ok(UpdateOutcome::Superseded);
            }
        }

        let line_lock = self.line_lock(item_id);
        let guard = line_lock.lock_owned().await;

        // Another operation may have run while we waited for the line.
        let send_qty = {
            let inner = self.lock_inner();
            if inner.is_latest(item_id, generation) {
                Some(inner.cart.item(item_id).map(|item| item.qty))
            } else {
                None
            }
        };
        let send_qty = match send_qty {
            Some(Some(send_qty)) => send_qty,
            Some(None) => {
                drop(guard);
                self.release_line_lock(item_id);
                return Ok(UpdateOutcome::NotInCart);
            }
            None => {
                drop(guard);
                self.release_line_lock(item_id);
                return Ok(UpdateOutcome::Superseded);
            }
        };

        let quote_id = self.quote_id_for(&route);
        let result = self
            .api
            .update_item(&route, item_id, send_qty, quote_id.as_deref())
            .await;
        drop(guard);
        self.release_line_lock(item_id);

        match result {
            Ok(line) => {
                let confirmed = self.mutate_engine(|inner| {
                    if inner.is_latest(item_id, generation) {
                        inner.cart.update_succeeded(line.clone());
                        true
                    } else {
                        inner.cart.update_confirmed_superseded(item_id, line.qty);
                        false
                    }
                });
                if confirmed {
                    debug!("[Cart] Item {} quantity confirmed at {}", item_id, line.qty);
                    Ok(UpdateOutcome::Confirmed(line))
                } else {
                    Ok(UpdateOutcome::Superseded)
                }
            }
            Err(err) => {
                let latest = self.lock_inner().is_latest(item_id, generation);
                if latest {
                    self.fail(err, |cart, message| cart.update_failed(item_id, message))
                } else {
                    // The newer pending update owns the line; only report.
                    self.fail(err, set_error)
                }
            }
        }
    }

    /// Remove a line. It stays visible as pending until the backend confirms.
    pub async fn remove_item(&self, session: &Session, item_id: &str) -> Result<()> {
        if item_id.starts_with(PLACEHOLDER_PREFIX) {
            return self.fail(
                Error::invalid_request("Item is still being added to the cart"),
                set_error,
            );
        }
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };

        if !self.mutate(|cart| cart.remove_started(item_id)) {
            debug!("[Cart] Remove skipped, item {} not in cart", item_id);
            return Ok(());
        }

        let line_lock = self.line_lock(item_id);
        let guard = line_lock.lock_owned().await;
        let result = self.api.remove_item(&route, item_id).await;
        drop(guard);
        self.release_line_lock(item_id);

        match result {
            Ok(()) => {
                self.mutate_engine(|inner| {
                    inner.cart.remove_succeeded(item_id);
                    inner.generations.remove(item_id);
                });
                info!("[Cart] Removed item {}", item_id);
                Ok(())
            }
            Err(err) => self.fail(err, |cart, message| cart.remove_failed(item_id, message)),
        }
    }

    /// Empty the cart.
    ///
    /// With `call_api`, every server-side line is deleted concurrently and the
    /// local cart is restored verbatim from a backup if any delete fails.
    /// Deletes that succeeded before the failure are not undone on the server,
    /// so the restored view may list lines the backend already dropped until
    /// the next [`fetch_cart`](Self::fetch_cart).
    pub async fn clear_cart(&self, session: &Session, call_api: bool) -> Result<()> {
        if !call_api {
            self.mutate(|cart| cart.clear_local());
            return Ok(());
        }

        let mut line_ids: Vec<String> = self
            .lock_inner()
            .cart
            .details
            .as_ref()
            .map(|details| {
                details
                    .items
                    .iter()
                    .filter(|item| !item.is_placeholder())
                    .map(|item| item.item_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        line_ids.sort();
        line_ids.dedup();

        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(line_ids.len());
        for item_id in &line_ids {
            guards.push(self.line_lock(item_id).lock_owned().await);
        }

        let outcome = self.clear_remote(session).await;

        drop(guards);
        for item_id in &line_ids {
            self.release_line_lock(item_id);
        }
        outcome
    }

    async fn clear_remote(&self, session: &Session) -> Result<()> {
        let item_ids = self.mutate(|cart| cart.clear_started());
        if item_ids.is_empty() {
            self.mutate(|cart| cart.clear_succeeded());
            return Ok(());
        }

        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, |cart, message| cart.clear_failed(message)),
        };

        debug!("[Cart] Clearing {} line(s)", item_ids.len());
        let deletes = item_ids
            .iter()
            .map(|item_id| self.api.remove_item(&route, item_id));
        let results = join_all(deletes).await;

        match results.into_iter().find_map(|result| result.err()) {
            None => {
                self.mutate_engine(|inner| {
                    inner.cart.clear_succeeded();
                    for item_id in &item_ids {
                        inner.generations.remove(item_id);
                    }
                });
                info!("[Cart] Cleared {} line(s)", item_ids.len());
                Ok(())
            }
            Some(err) => self.fail(err, |cart, message| cart.clear_failed(message)),
        }
    }

    /// Turn the current cart into an order. On success the cart is consumed.
    pub async fn create_order(&self, session: &Session, payload: OrderPayload) -> Result<String> {
        if payload.payment_method.trim().is_empty() {
            return self.fail(
                Error::invalid_request("A payment method is required"),
                set_error,
            );
        }
        if session.is_guest() && payload.email.as_deref().is_none_or(str::is_empty) {
            return self.fail(
                Error::invalid_request("An email address is required for guest checkout"),
                set_error,
            );
        }
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };

        match self.api.place_order(&route, &payload).await {
            Ok(order_id) => {
                self.mutate_engine(|inner| {
                    inner.cart.order_placed();
                    inner.generations.clear();
                });
                if session.is_guest() {
                    if let Err(err) = self.store.delete(&self.config.guest_cart_key) {
                        warn!("[Cart] Failed to forget consumed guest cart: {}", err);
                    }
                }
                info!("[Cart] Placed order {}", order_id);
                Ok(order_id)
            }
            Err(err) => self.fail(err, set_error),
        }
    }

    /// Hand the stored guest cart to the customer who just signed in.
    ///
    /// Returns `Ok(false)` when there is no guest cart to migrate. After a
    /// successful assignment the guest identifier is discarded and later calls
    /// with a customer session use the customer cart only.
    pub async fn assign_guest_cart(&self, session: &Session, customer_id: i64) -> Result<bool> {
        let Some(token) = session.token() else {
            return self.fail(
                Error::invalid_request("Sign in before assigning the guest cart"),
                set_error,
            );
        };

        let _gate = self.guest_cart_gate.lock().await;
        let guest_cart_id = match self.store.get(&self.config.guest_cart_key) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("[Cart] No guest cart to assign");
                return Ok(false);
            }
            Err(err) => return self.fail(err, set_error),
        };

        match self
            .api
            .assign_guest_cart(token, &guest_cart_id, customer_id)
            .await
        {
            Ok(()) => {
                if let Err(err) = self.store.delete(&self.config.guest_cart_key) {
                    return self.fail(err, set_error);
                }
                info!(
                    "[Cart] Assigned guest cart {} to customer {}",
                    guest_cart_id, customer_id
                );
                Ok(true)
            }
            Err(err) => self.fail(err, set_error),
        }
    }

    /// Apply a coupon code, then refresh the cart silently.
    pub async fn apply_coupon(&self, session: &Session, code: &str) -> Result<()> {
        let code = code.trim();
        if code.is_empty() {
            return self.fail(Error::invalid_request("Enter a coupon code"), set_error);
        }
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };
        if let Err(err) = self.api.apply_coupon(&route, code).await {
            return self.fail(err, set_error);
        }
        info!("[Cart] Applied coupon {}", code);
        self.refresh_silently(session).await;
        Ok(())
    }

    /// Remove the applied coupon, then refresh the cart silently.
    pub async fn remove_coupon(&self, session: &Session) -> Result<()> {
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };
        if let Err(err) = self.api.remove_coupon(&route).await {
            return self.fail(err, set_error);
        }
        self.refresh_silently(session).await;
        Ok(())
    }

    /// Shipping methods available for the cart and the given address.
    pub async fn estimate_shipping(
        &self,
        session: &Session,
        address: &Address,
    ) -> Result<Vec<ShippingMethod>> {
        let route = match self.resolve_route(session, false).await {
            Ok(route) => route,
            Err(err) => return self.fail(err, set_error),
        };
        match self.api.estimate_shipping(&route, address).await {
            Ok(methods) => Ok(methods),
            Err(err) => self.fail(err, set_error),
        }
    }

    /// Drop all local cart state and the stored guest cart (logout).
    pub fn reset(&self) -> Result<()> {
        self.mutate_engine(EngineState::reset);
        self.store.delete(&self.config.guest_cart_key)?;
        info!("[Cart] Reset local cart state");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routing and guest carts
    // ─────────────────────────────────────────────────────────────────────────

    /// Pick the remote cart for the session. Guest carts are created lazily
    /// only when `create_guest` is set; otherwise a missing guest cart is a
    /// precondition failure raised before any network call.
    async fn resolve_route(&self, session: &Session, create_guest: bool) -> Result<CartRoute> {
        match session {
            Session::Customer { token } => Ok(CartRoute::Customer {
                token: token.clone(),
            }),
            Session::Guest => {
                let cart_id = if create_guest {
                    self.ensure_guest_cart_id().await?
                } else {
                    self.store
                        .get(&self.config.guest_cart_key)?
                        .ok_or_else(|| {
                            Error::invalid_request("No guest cart exists for this session")
                        })?
                };
                Ok(CartRoute::Guest { cart_id })
            }
        }
    }

    /// Read the stored guest cart id or create one. Single-flight: concurrent
    /// callers wait on the gate and reuse the id persisted by the first.
    async fn ensure_guest_cart_id(&self) -> Result<String> {
        let _gate = self.guest_cart_gate.lock().await;
        if let Some(cart_id) = self.store.get(&self.config.guest_cart_key)? {
            return Ok(cart_id);
        }

        let cart_id = self.api.create_guest_cart().await?;
        self.store.set(&self.config.guest_cart_key, &cart_id)?;
        info!("[Cart] Created guest cart {}", cart_id);
        Ok(cart_id)
    }

    /// Replace a guest cart the backend no longer knows. If another caller
    /// already replaced `stale_id`, its replacement is reused.
    async fn replace_guest_cart(&self, stale_id: Option<&str>) -> Result<String> {
        let _gate = self.guest_cart_gate.lock().await;
        let current = self.store.get(&self.config.guest_cart_key)?;
        if let Some(current) = current.filter(|current| Some(current.as_str()) != stale_id) {
            return Ok(current);
        }

        let cart_id = self.api.create_guest_cart().await?;
        self.store.set(&self.config.guest_cart_key, &cart_id)?;
        info!(
            "[Cart] Replaced guest cart {} with {}",
            stale_id.unwrap_or("<none>"),
            cart_id
        );
        Ok(cart_id)
    }

    fn quote_id_for(&self, route: &CartRoute) -> Option<String> {
        match route {
            CartRoute::Guest { cart_id } => Some(cart_id.clone()),
            CartRoute::Customer { .. } => self
                .lock_inner()
                .cart
                .details
                .as_ref()
                .map(|details| details.id.clone())
                .filter(|id| !id.is_empty()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network steps
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_cart(&self, session: &Session) -> Result<CartSnapshot> {
        let route = self.resolve_route(session, true).await?;
        let mut snapshot = self.api.get_cart(&route).await?;

        let skus: Vec<String> = snapshot.items.iter().map(|item| item.sku.clone()).collect();
        let images = join_all(skus.iter().map(|sku| self.lookup_image(sku))).await;
        for (item, image) in snapshot.items.iter_mut().zip(images) {
            if image.is_some() {
                item.image = image;
            }
            item.loading = false;
            item.previous_qty = None;
        }
        snapshot.recompute_totals();
        Ok(snapshot)
    }

    async fn lookup_image(&self, sku: &str) -> Option<String> {
        match self.api.product_image(sku).await {
            Ok(image) => image,
            Err(err) => {
                warn!("[Cart] Image lookup for {} failed: {}", sku, err);
                None
            }
        }
    }

    /// Send the add; when the target cart no longer exists, create a new one
    /// and retry exactly once.
    async fn send_add(&self, session: &Session, request: &AddItemRequest) -> Result<CartLineItem> {
        let route = self.resolve_route(session, true).await?;
        let item = NewCartItem {
            sku: request.sku.clone(),
            qty: request.qty,
            quote_id: self.quote_id_for(&route),
            product_option: request.product_option.clone(),
        };

        match self.api.add_item(&route, &item).await {
            Err(err) if err.is_cart_missing() => {
                info!(
                    "[Cart] {} cart missing while adding {}, creating a new cart",
                    route.label(),
                    request.sku
                );
                let (route, quote_id) = self.recreate_cart(&route).await?;
                let item = NewCartItem { quote_id, ..item };
                self.api.add_item(&route, &item).await
            }
            other => other,
        }
    }

    async fn recreate_cart(&self, route: &CartRoute) -> Result<(CartRoute, Option<String>)> {
        match route {
            CartRoute::Guest { cart_id } => {
                let cart_id = self.replace_guest_cart(Some(cart_id)).await?;
                Ok((
                    CartRoute::Guest {
                        cart_id: cart_id.clone(),
                    },
                    Some(cart_id),
                ))
            }
            CartRoute::Customer { token } => {
                let cart_id = self.api.create_customer_cart(token).await?;
                Ok((route.clone(), Some(cart_id)))
            }
        }
    }

    /// Best-effort: give the next operation a cart to write to. Failures are
    /// logged only.
    ///
    /// Customers always get `create_customer_cart`, which returns the active
    /// cart when one exists. A guest cart is only replaced when the backend
    /// answered: after a transport or local failure the stored id may still be
    /// valid and replacing it would orphan the guest's lines.
    async fn recover_cart(&self, session: &Session, cause: &Error) {
        let result = match session {
            Session::Customer { token } => self.api.create_customer_cart(token).await,
            Session::Guest => {
                if matches!(
                    cause,
                    Error::Transport(_) | Error::InvalidRequest(_) | Error::Storage(_)
                ) {
                    debug!("[Cart] Keeping guest cart after: {}", cause);
                    return;
                }
                match self.store.get(&self.config.guest_cart_key) {
                    Ok(stale) => self.replace_guest_cart(stale.as_deref()).await,
                    Err(err) => Err(err),
                }
            }
        };
        match result {
            Ok(cart_id) => info!("[Cart] Recovery cart {} ready", cart_id),
            Err(err) => warn!("[Cart] Recovery cart creation failed: {}", err),
        }
    }

    async fn refresh_silently(&self, session: &Session) {
        if let Err(err) = self.fetch_cart(session).await {
            debug!("[Cart] Background refresh failed: {}", err);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State plumbing
    // ─────────────────────────────────────────────────────────────────────────

    fn lock_inner(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate_engine<R>(&self, transition: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, items_qty) = {
            let mut inner = self.lock_inner();
            let result = transition(&mut inner);
            (result, inner.cart.items_qty())
        };
        self.event_sink.emit(CartEvent::Changed { items_qty });
        result
    }

    fn mutate<R>(&self, transition: impl FnOnce(&mut CartState) -> R) -> R {
        self.mutate_engine(|inner| transition(&mut inner.cart))
    }

    /// Apply the failure transition with the user-facing message and return the error.
    fn fail<T>(&self, err: Error, transition: impl FnOnce(&mut CartState, String)) -> Result<T> {
        let message = err.user_message();
        warn!("[Cart] Operation failed: {}", err);
        self.mutate(|cart| transition(cart, message.clone()));
        self.event_sink.emit(CartEvent::Failed { message });
        Err(err)
    }

    fn line_lock(&self, item_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.line_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(item_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drop the line's lock entry once nobody else holds or waits on it.
    fn release_line_lock(&self, item_id: &str) {
        let mut locks = self.line_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(item_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(item_id);
        }
    }
}

fn set_error(cart: &mut CartState, message: String) {
    cart.set_error(message);
}
