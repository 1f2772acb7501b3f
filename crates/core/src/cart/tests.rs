use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use super::*;
use crate::errors::{Error, Result, GENERIC_FAILURE_MESSAGE};
use crate::events::{CartEvent, CartEventSink};
use crate::session::Session;
use crate::storage::{LocalStore, MemoryStore};

const CUSTOMER_CART: &str = "mine";

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transport,
    Api(u16, &'static str),
    CartMissing,
}

impl Failure {
    fn into_error(self, cart_id: &str) -> Error {
        match self {
            Failure::Transport => Error::Transport("operation timed out".to_string()),
            Failure::Api(status, message) => Error::api(status, message),
            Failure::CartMissing => cart_missing(cart_id),
        }
    }
}

fn cart_missing(cart_id: &str) -> Error {
    Error::Api {
        status: 404,
        message: "No such entity with %fieldName = %fieldValue".to_string(),
        parameters: vec![
            ("fieldName".to_string(), "cartId".to_string()),
            ("fieldValue".to_string(), cart_id.to_string()),
        ],
    }
}

#[derive(Default)]
struct Backend {
    carts: HashMap<String, Vec<CartLineItem>>,
    next_item_id: u64,
    next_guest: u64,
    failures: HashMap<&'static str, VecDeque<Failure>>,
    calls: Vec<String>,
    coupon: Option<String>,
}

/// Scripted in-memory commerce backend.
#[derive(Default)]
struct FakeCartApi {
    backend: Mutex<Backend>,
    create_guest_calls: AtomicUsize,
    guest_create_delay: Duration,
    image_delay: Duration,
}

impl FakeCartApi {
    fn new() -> Self {
        let api = Self::default();
        api.with_backend(|b| b.next_item_id = 77);
        api
    }

    fn with_backend<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        f(&mut self.backend.lock().unwrap())
    }

    fn seed(&self, cart_id: &str, items: &[(&str, u32)]) {
        self.with_backend(|b| {
            let mut lines = Vec::new();
            for (sku, qty) in items {
                let item_id = b.next_item_id.to_string();
                b.next_item_id += 1;
                lines.push(server_line(&item_id, sku, *qty));
            }
            b.carts.insert(cart_id.to_string(), lines);
        });
    }

    fn fail_next(&self, op: &'static str, failure: Failure) {
        self.with_backend(|b| b.failures.entry(op).or_default().push_back(failure));
    }

    fn calls(&self) -> Vec<String> {
        self.with_backend(|b| b.calls.clone())
    }

    fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn server_items(&self, cart_id: &str) -> Vec<CartLineItem> {
        self.with_backend(|b| b.carts.get(cart_id).cloned().unwrap_or_default())
    }

    /// Record the call and return the scripted failure for it, if any.
    fn enter(&self, op: &'static str, route: Option<&CartRoute>) -> Result<String> {
        let key = route.map(route_key).unwrap_or_default();
        self.with_backend(|b| {
            b.calls.push(format!("{}:{}", op, key));
            if let Some(failure) = b.failures.get_mut(op).and_then(|queue| queue.pop_front()) {
                return Err(failure.into_error(&key));
            }
            if route.is_some() && !b.carts.contains_key(&key) {
                return Err(cart_missing(&key));
            }
            Ok(key)
        })
    }
}

fn route_key(route: &CartRoute) -> String {
    match route {
        CartRoute::Customer { .. } => CUSTOMER_CART.to_string(),
        CartRoute::Guest { cart_id } => cart_id.clone(),
    }
}

fn server_line(item_id: &str, sku: &str, qty: u32) -> CartLineItem {
    CartLineItem {
        item_id: item_id.to_string(),
        sku: sku.to_string(),
        qty,
        name: Some(format!("Product {}", sku)),
        price: Some(dec!(10)),
        image: None,
        loading: false,
        previous_qty: None,
    }
}

#[async_trait]
impl CartApi for FakeCartApi {
    async fn create_guest_cart(&self) -> Result<String> {
        self.create_guest_calls.fetch_add(1, Ordering::SeqCst);
        if !self.guest_create_delay.is_zero() {
            tokio::time::sleep(self.guest_create_delay).await;
        }
        self.enter("create_guest", None)?;
        Ok(self.with_backend(|b| {
            b.next_guest += 1;
            let cart_id = format!("guest-{}", b.next_guest);
            b.carts.insert(cart_id.clone(), Vec::new());
            cart_id
        }))
    }

    async fn create_customer_cart(&self, _token: &str) -> Result<String> {
        self.enter("create_customer", None)?;
        self.with_backend(|b| {
            b.carts.entry(CUSTOMER_CART.to_string()).or_default();
        });
        Ok("100".to_string())
    }

    async fn get_cart(&self, route: &CartRoute) -> Result<CartSnapshot> {
        let key = self.enter("get", Some(route))?;
        let items = self.server_items(&key);
        Ok(CartSnapshot {
            id: if key == CUSTOMER_CART { "100".to_string() } else { key },
            items,
            currency: Some("USD".to_string()),
            ..CartSnapshot::default()
        })
    }

    async fn add_item(&self, route: &CartRoute, item: &NewCartItem) -> Result<CartLineItem> {
        let key = self.enter("add", Some(route))?;
        Ok(self.with_backend(|b| {
            let next_id = b.next_item_id;
            let lines = b.carts.get_mut(&key).expect("cart exists");
            if let Some(line) = lines.iter_mut().find(|line| line.sku == item.sku) {
                line.qty += item.qty;
                return line.clone();
            }
            let line = server_line(&next_id.to_string(), &item.sku, item.qty);
            lines.push(line.clone());
            b.next_item_id += 1;
            line
        }))
    }

    async fn update_item(
        &self,
        route: &CartRoute,
        item_id: &str,
        qty: u32,
        _quote_id: Option<&str>,
    ) -> Result<CartLineItem> {
        let key = self.enter("update", Some(route))?;
        self.with_backend(|b| {
            b.calls.push(format!("update_qty:{}={}", item_id, qty));
            let lines = b.carts.get_mut(&key).expect("cart exists");
            match lines.iter_mut().find(|line| line.item_id == item_id) {
                Some(line) => {
                    line.qty = qty;
                    Ok(line.clone())
                }
                None => Err(Error::api(404, "The cart doesn't contain the item")),
            }
        })
    }

    async fn remove_item(&self, route: &CartRoute, item_id: &str) -> Result<()> {
        let key = self.enter("remove", Some(route))?;
        self.with_backend(|b| {
            let lines = b.carts.get_mut(&key).expect("cart exists");
            let before = lines.len();
            lines.retain(|line| line.item_id != item_id);
            if lines.len() == before {
                return Err(Error::api(404, "The cart doesn't contain the item"));
            }
            Ok(())
        })
    }

    async fn product_image(&self, sku: &str) -> Result<Option<String>> {
        if !self.image_delay.is_zero() {
            tokio::time::sleep(self.image_delay).await;
        }
        self.enter("image", None)?;
        Ok(Some(format!("https://media.test/{}.jpg", sku)))
    }

    async fn assign_guest_cart(
        &self,
        _token: &str,
        guest_cart_id: &str,
        _customer_id: i64,
    ) -> Result<()> {
        self.enter("assign", None)?;
        self.with_backend(|b| {
            let Some(guest_lines) = b.carts.remove(guest_cart_id) else {
                return Err(cart_missing(guest_cart_id));
            };
            b.carts
                .entry(CUSTOMER_CART.to_string())
                .or_default()
                .extend(guest_lines);
            Ok(())
        })
    }

    async fn apply_coupon(&self, route: &CartRoute, code: &str) -> Result<()> {
        self.enter("coupon", Some(route))?;
        if code == "BOGUS" {
            return Err(Error::api(
                404,
                "The coupon code isn't valid. Verify the code and try again.",
            ));
        }
        self.with_backend(|b| b.coupon = Some(code.to_string()));
        Ok(())
    }

    async fn remove_coupon(&self, route: &CartRoute) -> Result<()> {
        self.enter("coupon_remove", Some(route))?;
        self.with_backend(|b| b.coupon = None);
        Ok(())
    }

    async fn estimate_shipping(
        &self,
        route: &CartRoute,
        _address: &Address,
    ) -> Result<Vec<ShippingMethod>> {
        self.enter("shipping", Some(route))?;
        Ok(vec![ShippingMethod {
            carrier_code: "flatrate".to_string(),
            method_code: "flatrate".to_string(),
            carrier_title: Some("Flat Rate".to_string()),
            method_title: Some("Fixed".to_string()),
            amount: dec!(5),
            available: true,
        }])
    }

    async fn place_order(&self, route: &CartRoute, _payload: &OrderPayload) -> Result<String> {
        let key = self.enter("order", Some(route))?;
        self.with_backend(|b| {
            if b.carts.get(&key).is_none_or(Vec::is_empty) {
                return Err(Error::api(400, "The cart has no items"));
            }
            b.carts.remove(&key);
            Ok("000000101".to_string())
        })
    }
}

/// Checks the quantity invariant on every emitted state change.
#[derive(Default)]
struct InvariantSink {
    engine: OnceLock<Weak<CartSyncService>>,
    checks: AtomicUsize,
    violations: AtomicUsize,
    failures: Mutex<Vec<String>>,
}

impl CartEventSink for InvariantSink {
    fn emit(&self, event: CartEvent) {
        match event {
            CartEvent::Changed { .. } => {
                let Some(engine) = self.engine.get().and_then(Weak::upgrade) else {
                    return;
                };
                if let Some(details) = engine.state().details {
                    let sum: u32 = details.items.iter().map(|item| item.qty).sum();
                    if sum != details.items_qty {
                        self.violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
                self.checks.fetch_add(1, Ordering::SeqCst);
            }
            CartEvent::Failed { message } => self.failures.lock().unwrap().push(message),
        }
    }
}

struct Harness {
    api: Arc<FakeCartApi>,
    store: Arc<MemoryStore>,
    sink: Arc<InvariantSink>,
    engine: Arc<CartSyncService>,
}

fn harness_with(api: FakeCartApi, config: CartSyncConfig) -> Harness {
    let api = Arc::new(api);
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(InvariantSink::default());
    let engine = Arc::new(
        CartSyncService::new(api.clone(), store.clone())
            .with_config(config)
            .with_event_sink(sink.clone()),
    );
    sink.engine.set(Arc::downgrade(&engine)).ok();
    Harness {
        api,
        store,
        sink,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeCartApi::new(),
        CartSyncConfig::default().with_update_debounce(Duration::ZERO),
    )
}

fn customer() -> Session {
    Session::customer("customer-token")
}

fn item_ids(engine: &CartSyncService) -> Vec<String> {
    engine
        .details()
        .map(|d| d.items.into_iter().map(|item| item.item_id).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn add_update_remove_scenario_against_customer_cart() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[]);
    let session = customer();

    assert!(h.engine.details().is_none());
    let snapshot = h.engine.fetch_cart(&session).await.unwrap();
    assert!(snapshot.items.is_empty());
    assert_eq!(h.engine.items_qty(), 0);
    assert_eq!(h.engine.state().status, CartStatus::Succeeded);

    let added = h
        .engine
        .add_item(&session, AddItemRequest::new("ABC123", 1))
        .await
        .unwrap();
    assert_eq!(added.item_id, "77");
    let details = h.engine.details().unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].item_id, "77");
    assert_eq!(details.items[0].qty, 1);
    assert!(!details.items[0].loading);
    assert_eq!(details.items_qty, 1);

    let outcome = h
        .engine
        .update_item_quantity(&session, "77", 3)
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Confirmed(ref line) if line.qty == 3));
    assert_eq!(h.engine.items_qty(), 3);

    h.engine.remove_item(&session, "77").await.unwrap();
    assert!(h.engine.details().unwrap().items.is_empty());
    assert_eq!(h.engine.items_qty(), 0);

    assert!(h.sink.checks.load(Ordering::SeqCst) > 0);
    assert_eq!(h.sink.violations.load(Ordering::SeqCst), 0);
    assert!(h.api.calls_to("add:").iter().all(|c| c == "add:mine"));
}

#[tokio::test]
async fn quantity_invariant_holds_across_mixed_operations() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 2), ("B", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.engine
        .add_item(&session, AddItemRequest::new("C", 4))
        .await
        .unwrap();
    h.engine
        .add_item(&session, AddItemRequest::new("A", 1))
        .await
        .unwrap();
    h.engine
        .update_item_quantity(&session, "78", 6)
        .await
        .unwrap();
    h.engine.remove_item(&session, "77").await.unwrap();

    let details = h.engine.details().unwrap();
    assert_eq!(details.items_qty, 10);
    assert_eq!(h.sink.violations.load(Ordering::SeqCst), 0);
    assert!(h.sink.checks.load(Ordering::SeqCst) >= 8);
}

#[tokio::test]
async fn failed_update_restores_previous_quantity() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 3)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.api
        .fail_next("update", Failure::Api(400, "The requested qty is not available"));
    let err = h
        .engine
        .update_item_quantity(&session, "77", 5)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));

    let state = h.engine.state();
    let item = state.item("77").unwrap();
    assert_eq!(item.qty, 3);
    assert!(!item.loading);
    assert_eq!(item.previous_qty, None);
    assert_eq!(state.items_qty(), 3);
    assert_eq!(
        state.error.as_deref(),
        Some("The requested qty is not available")
    );
    assert_eq!(
        h.sink.failures.lock().unwrap().clone(),
        vec!["The requested qty is not available".to_string()]
    );
}

#[tokio::test]
async fn failed_add_of_new_sku_removes_placeholder() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 2)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();
    let before: Vec<(String, String)> = h
        .engine
        .details()
        .unwrap()
        .items
        .into_iter()
        .map(|item| (item.item_id, item.sku))
        .collect();

    h.api.fail_next("add", Failure::Transport);
    let err = h
        .engine
        .add_item(&session, AddItemRequest::new("NEW", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let after: Vec<(String, String)> = h
        .engine
        .details()
        .unwrap()
        .items
        .into_iter()
        .map(|item| (item.item_id, item.sku))
        .collect();
    assert_eq!(before, after);
    assert_eq!(h.engine.items_qty(), 3);
    assert_eq!(
        h.engine.state().error.as_deref(),
        Some(GENERIC_FAILURE_MESSAGE)
    );
}

#[tokio::test]
async fn failed_add_of_existing_sku_keeps_confirmed_line() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 2)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.api.fail_next("add", Failure::Api(400, "Not enough stock"));
    h.engine
        .add_item(&session, AddItemRequest::new("A", 1))
        .await
        .unwrap_err();

    let item = h.engine.state().item("77").cloned().unwrap();
    assert_eq!(item.qty, 2);
    assert!(!item.loading);
}

#[tokio::test]
async fn clear_cart_restores_all_lines_when_a_delete_fails() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 2), ("C", 3)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();
    let original = h.engine.details().unwrap().items;

    h.api.fail_next("remove", Failure::Api(500, "Internal error"));
    h.engine.clear_cart(&session, true).await.unwrap_err();

    let state = h.engine.state();
    let restored = state.details.as_ref().unwrap();
    let key = |items: &[CartLineItem]| -> Vec<(String, String, u32)> {
        items
            .iter()
            .map(|i| (i.item_id.clone(), i.sku.clone(), i.qty))
            .collect()
    };
    assert_eq!(key(&restored.items), key(&original));
    assert_eq!(restored.items_qty, 6);
    assert!(state.backup_details.is_none());
    assert_eq!(h.api.calls_to("remove:").len(), 3);
}

#[tokio::test]
async fn clear_cart_deletes_every_line_on_success() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 2)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.engine.clear_cart(&session, true).await.unwrap();
    assert!(h.engine.details().unwrap().items.is_empty());
    assert!(h.engine.state().backup_details.is_none());
    assert!(h.api.server_items(CUSTOMER_CART).is_empty());
}

#[tokio::test]
async fn local_clear_makes_no_network_calls() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();
    let calls_before = h.api.calls().len();

    h.engine.clear_cart(&session, false).await.unwrap();
    assert_eq!(h.engine.items_qty(), 0);
    assert_eq!(h.api.calls().len(), calls_before);
    assert_eq!(h.api.server_items(CUSTOMER_CART).len(), 1);
}

#[tokio::test]
async fn concurrent_guest_adds_create_a_single_guest_cart() {
    let api = FakeCartApi {
        guest_create_delay: Duration::from_millis(20),
        ..FakeCartApi::new()
    };
    let h = harness_with(api, CartSyncConfig::default());
    let session = Session::Guest;

    let (first, second) = tokio::join!(
        h.engine.add_item(&session, AddItemRequest::new("A", 1)),
        h.engine.add_item(&session, AddItemRequest::new("B", 1)),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(h.api.create_guest_calls.load(Ordering::SeqCst), 1);
    let guest_id = h.store.get("guest_cart_id").unwrap().unwrap();
    assert_eq!(h.api.server_items(&guest_id).len(), 2);
}

#[tokio::test]
async fn guest_cart_is_assigned_to_customer_after_login() {
    let h = harness();
    let guest = Session::Guest;
    h.engine.fetch_cart(&guest).await.unwrap();
    h.engine
        .add_item(&guest, AddItemRequest::new("A", 1))
        .await
        .unwrap();
    h.engine
        .add_item(&guest, AddItemRequest::new("B", 2))
        .await
        .unwrap();
    assert_eq!(h.engine.items_qty(), 3);
    assert!(h.api.calls_to("add:").iter().all(|c| c == "add:guest-1"));

    let session = customer();
    assert!(h.engine.assign_guest_cart(&session, 42).await.unwrap());
    assert_eq!(h.engine.guest_cart_id().unwrap(), None);

    h.engine
        .add_item(&session, AddItemRequest::new("C", 1))
        .await
        .unwrap();
    assert_eq!(h.api.calls_to("add:").last().unwrap(), "add:mine");
    assert_eq!(h.api.server_items(CUSTOMER_CART).len(), 3);

    // Nothing left to migrate on a second login.
    assert!(!h.engine.assign_guest_cart(&session, 42).await.unwrap());
    assert_eq!(h.api.calls_to("assign:").len(), 1);
}

#[tokio::test]
async fn failed_assignment_keeps_guest_cart_identifier() {
    let h = harness();
    h.engine.fetch_cart(&Session::Guest).await.unwrap();
    h.api.fail_next("assign", Failure::Api(401, "The consumer isn't authorized"));

    h.engine
        .assign_guest_cart(&customer(), 42)
        .await
        .unwrap_err();
    assert_eq!(h.engine.guest_cart_id().unwrap().as_deref(), Some("guest-1"));
}

#[tokio::test]
async fn assignment_requires_customer_session() {
    let h = harness();
    let err = h
        .engine
        .assign_guest_cart(&Session::Guest, 42)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn missing_guest_cart_is_recreated_and_add_retried_once() {
    let h = harness();
    h.store.set("guest_cart_id", "expired-cart").unwrap();

    let line = h
        .engine
        .add_item(&Session::Guest, AddItemRequest::new("A", 1))
        .await
        .unwrap();
    assert_eq!(line.sku, "A");
    assert_eq!(h.api.create_guest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.guest_cart_id().unwrap().as_deref(), Some("guest-1"));
    assert_eq!(h.api.calls_to("add:"), vec!["add:expired-cart", "add:guest-1"]);
}

#[tokio::test]
async fn cart_missing_retry_happens_only_once() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[]);
    h.api.fail_next("add", Failure::CartMissing);
    h.api.fail_next("add", Failure::CartMissing);

    let err = h
        .engine
        .add_item(&customer(), AddItemRequest::new("A", 1))
        .await
        .unwrap_err();
    assert!(err.is_cart_missing());
    assert_eq!(h.api.calls_to("add:").len(), 2);
    assert_eq!(h.api.calls_to("create_customer:").len(), 1);
}

#[tokio::test]
async fn fetch_failure_keeps_stale_details_and_creates_recovery_cart() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 2)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.api.fail_next("get", Failure::Api(500, "Internal error"));
    h.engine.fetch_cart(&session).await.unwrap_err();

    let state = h.engine.state();
    assert_eq!(state.status, CartStatus::Failed);
    assert_eq!(state.items_qty(), 2);
    assert_eq!(state.error.as_deref(), Some("Internal error"));
    assert_eq!(h.api.calls_to("create_customer:").len(), 1);
    // The original fetch is not retried.
    assert_eq!(h.api.calls_to("get:").len(), 2);
}

#[tokio::test]
async fn failed_recovery_is_swallowed() {
    let h = harness();
    h.api.fail_next("get", Failure::Api(500, "Internal error"));
    h.api.fail_next("create_customer", Failure::Api(503, "Unavailable"));

    let err = h.engine.fetch_cart(&customer()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(h.engine.state().error.as_deref(), Some("Internal error"));
}

#[tokio::test]
async fn transport_failure_still_recovers_customer_cart() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.api.fail_next("get", Failure::Transport);
    h.engine.fetch_cart(&session).await.unwrap_err();
    assert_eq!(h.api.calls_to("create_customer:").len(), 1);
    assert_eq!(h.engine.items_qty(), 1);
}

#[tokio::test]
async fn transport_failure_keeps_guest_cart() {
    let h = harness();
    let guest = Session::Guest;
    h.engine.fetch_cart(&guest).await.unwrap();

    h.api.fail_next("get", Failure::Transport);
    h.engine.fetch_cart(&guest).await.unwrap_err();
    assert_eq!(h.api.create_guest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.guest_cart_id().unwrap().as_deref(), Some("guest-1"));
}

#[tokio::test]
async fn api_failure_replaces_guest_cart() {
    let h = harness();
    let guest = Session::Guest;
    h.engine.fetch_cart(&guest).await.unwrap();

    h.api.fail_next("get", Failure::CartMissing);
    h.engine.fetch_cart(&guest).await.unwrap_err();
    assert_eq!(h.engine.guest_cart_id().unwrap().as_deref(), Some("guest-2"));
}

#[tokio::test(start_paused = true)]
async fn fetch_resolves_images_concurrently() {
    let api = FakeCartApi {
        image_delay: Duration::from_millis(50),
        ..FakeCartApi::new()
    };
    let h = harness_with(api, CartSyncConfig::default());
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 1), ("C", 1), ("D", 1)]);

    let started = tokio::time::Instant::now();
    let snapshot = h.engine.fetch_cart(&customer()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));

    let images: Vec<Option<String>> = snapshot.items.iter().map(|i| i.image.clone()).collect();
    assert_eq!(
        images,
        vec![
            Some("https://media.test/A.jpg".to_string()),
            Some("https://media.test/B.jpg".to_string()),
            Some("https://media.test/C.jpg".to_string()),
            Some("https://media.test/D.jpg".to_string()),
        ]
    );
}

#[tokio::test]
async fn image_lookup_failure_does_not_fail_fetch() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    h.api.fail_next("image", Failure::Transport);

    let snapshot = h.engine.fetch_cart(&customer()).await.unwrap();
    assert_eq!(snapshot.items[0].image, None);
    assert_eq!(h.engine.state().status, CartStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn rapid_quantity_updates_are_debounced_per_line() {
    let h = harness_with(
        FakeCartApi::new(),
        CartSyncConfig::default().with_update_debounce(Duration::from_millis(300)),
    );
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    let engine = h.engine.clone();
    let tap = |qty: u32, after_ms: u64| {
        let engine = engine.clone();
        let session = session.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            engine.update_item_quantity(&session, "77", qty).await
        }
    };

    let (first, second, third) = tokio::join!(tap(2, 0), tap(3, 100), tap(4, 200));
    assert_eq!(first.unwrap(), UpdateOutcome::Superseded);
    assert_eq!(second.unwrap(), UpdateOutcome::Superseded);
    assert!(matches!(third.unwrap(), UpdateOutcome::Confirmed(ref line) if line.qty == 4));

    assert_eq!(h.api.calls_to("update_qty:"), vec!["update_qty:77=4"]);
    let item = h.engine.state().item("77").cloned().unwrap();
    assert_eq!(item.qty, 4);
    assert!(!item.loading);
    assert_eq!(item.previous_qty, None);
}

#[tokio::test(start_paused = true)]
async fn optimistic_quantity_is_visible_before_debounce_fires() {
    let h = harness_with(
        FakeCartApi::new(),
        CartSyncConfig::default().with_update_debounce(Duration::from_millis(300)),
    );
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 2)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    let engine = h.engine.clone();
    let pending = tokio::spawn({
        let session = session.clone();
        async move { engine.update_item_quantity(&session, "77", 5).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = h.engine.state();
    assert_eq!(state.item("77").unwrap().qty, 5);
    assert!(state.item("77").unwrap().loading);
    assert_eq!(state.items_qty(), 7);
    assert!(h.api.calls_to("update_qty:").is_empty());

    pending.await.unwrap().unwrap();
    assert_eq!(h.api.calls_to("update_qty:"), vec!["update_qty:77=5"]);
}

#[tokio::test]
async fn update_of_unknown_line_is_noop() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    let outcome = h
        .engine
        .update_item_quantity(&session, "999", 2)
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::NotInCart);
    assert!(h.api.calls_to("update").is_empty());
}

#[tokio::test]
async fn failed_remove_keeps_line_and_clears_loading() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1), ("B", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.api.fail_next("remove", Failure::Transport);
    h.engine.remove_item(&session, "78").await.unwrap_err();

    assert_eq!(item_ids(&h.engine), vec!["77", "78"]);
    assert!(!h.engine.state().item("78").unwrap().loading);
    assert_eq!(h.engine.items_qty(), 2);
}

#[tokio::test]
async fn guest_mutations_without_guest_cart_fail_before_network() {
    let h = harness();
    let guest = Session::Guest;

    let err = h.engine.remove_item(&guest, "77").await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = h
        .engine
        .update_item_quantity(&guest, "77", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    assert!(h.api.calls().is_empty());
    assert_eq!(
        h.engine.state().error.as_deref(),
        Some("No guest cart exists for this session")
    );
}

#[tokio::test]
async fn placeholder_lines_cannot_be_updated_or_removed() {
    let h = harness();
    let session = customer();
    let err = h
        .engine
        .update_item_quantity(&session, "temp-1700000000000", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = h
        .engine
        .remove_item(&session, "temp-1700000000000")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn order_consumes_cart() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    let order_id = h
        .engine
        .create_order(
            &session,
            OrderPayload {
                payment_method: "checkmo".to_string(),
                ..OrderPayload::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(order_id, "000000101");
    let state = h.engine.state();
    assert!(state.details.is_none());
    assert_eq!(state.status, CartStatus::Idle);
}

#[tokio::test]
async fn failed_order_leaves_cart_usable() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();
    h.api.fail_next("order", Failure::Api(400, "The payment method is unavailable"));

    let payload = OrderPayload {
        payment_method: "checkmo".to_string(),
        ..OrderPayload::default()
    };
    h.engine
        .create_order(&session, payload.clone())
        .await
        .unwrap_err();
    assert_eq!(h.engine.items_qty(), 1);

    h.engine.create_order(&session, payload).await.unwrap();
}

#[tokio::test]
async fn guest_order_requires_email_and_forgets_guest_cart() {
    let h = harness();
    let guest = Session::Guest;
    h.engine.fetch_cart(&guest).await.unwrap();
    h.engine
        .add_item(&guest, AddItemRequest::new("A", 1))
        .await
        .unwrap();

    let mut payload = OrderPayload {
        payment_method: "checkmo".to_string(),
        ..OrderPayload::default()
    };
    let err = h
        .engine
        .create_order(&guest, payload.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(h.api.calls_to("order:").is_empty());

    payload.email = Some("shopper@example.com".to_string());
    h.engine.create_order(&guest, payload).await.unwrap();
    assert_eq!(h.engine.guest_cart_id().unwrap(), None);
}

#[tokio::test]
async fn coupon_application_refreshes_cart() {
    let h = harness();
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    h.engine.apply_coupon(&session, " SAVE10 ").await.unwrap();
    assert_eq!(h.api.with_backend(|b| b.coupon.clone()).as_deref(), Some("SAVE10"));
    assert_eq!(h.api.calls_to("get:").len(), 2);

    let err = h.engine.apply_coupon(&session, "BOGUS").await.unwrap_err();
    assert_eq!(
        err.user_message(),
        "The coupon code isn't valid. Verify the code and try again."
    );
    let err = h.engine.apply_coupon(&session, "  ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    h.engine.remove_coupon(&session).await.unwrap();
    assert_eq!(h.api.with_backend(|b| b.coupon.clone()), None);
}

#[tokio::test]
async fn shipping_estimate_uses_session_cart() {
    let h = harness();
    h.engine.fetch_cart(&Session::Guest).await.unwrap();

    let methods = h
        .engine
        .estimate_shipping(
            &Session::Guest,
            &Address {
                country_id: "US".to_string(),
                postcode: Some("10001".to_string()),
                ..Address::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(h.api.calls_to("shipping:"), vec!["shipping:guest-1"]);
}

#[tokio::test]
async fn reset_forgets_state_and_guest_cart() {
    let h = harness();
    h.engine.fetch_cart(&Session::Guest).await.unwrap();
    assert!(h.engine.guest_cart_id().unwrap().is_some());

    h.engine.reset().unwrap();
    assert_eq!(h.engine.state(), CartState::default());
    assert_eq!(h.engine.guest_cart_id().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn update_pending_across_reset_does_not_resend() {
    let h = harness_with(
        FakeCartApi::new(),
        CartSyncConfig::default().with_update_debounce(Duration::from_millis(300)),
    );
    h.api.seed(CUSTOMER_CART, &[("A", 1)]);
    let session = customer();
    h.engine.fetch_cart(&session).await.unwrap();

    let engine = h.engine.clone();
    let stale = tokio::spawn({
        let session = session.clone();
        async move { engine.update_item_quantity(&session, "77", 5).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.engine.reset().unwrap();
    h.engine.fetch_cart(&session).await.unwrap();
    let engine = h.engine.clone();
    let fresh = tokio::spawn({
        let session = session.clone();
        async move { engine.update_item_quantity(&session, "77", 2).await }
    });

    assert_eq!(stale.await.unwrap().unwrap(), UpdateOutcome::Superseded);
    assert!(matches!(fresh.await.unwrap().unwrap(), UpdateOutcome::Confirmed(ref line) if line.qty == 2));
    assert_eq!(h.api.calls_to("update_qty:"), vec!["update_qty:77=2"]);
}

#[tokio::test]
async fn engines_do_not_share_state() {
    let first = harness();
    let second = harness();
    first.api.seed(CUSTOMER_CART, &[("A", 2)]);
    first.engine.fetch_cart(&customer()).await.unwrap();

    assert_eq!(first.engine.items_qty(), 2);
    assert!(second.engine.details().is_none());
}
