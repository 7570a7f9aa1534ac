//! Service registry: maps (provider, method) endpoints to handlers.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{EventEmitter, OrchestratorEvent};

use super::types::{AsyncServiceHandler, ServiceEndpoint, ServiceHandler};

#[derive(Default)]
struct HandlerMaps {
    sync: HashMap<String, HashMap<String, Arc<dyn ServiceHandler>>>,
    asynchronous: HashMap<String, HashMap<String, Arc<dyn AsyncServiceHandler>>>,
}

/// Registry of service handlers keyed by (provider, method).
///
/// Registering over an existing key replaces the prior handler silently
/// (last write wins) so plugins can hot-swap implementations; a
/// `ServiceRegistered` event fires either way. All map operations serialize
/// through a single lock; handlers are cloned out as `Arc`s and invoked
/// outside it.
pub struct ServiceRegistry {
    handlers: RwLock<HandlerMaps>,
    events: EventEmitter,
}

impl ServiceRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            handlers: RwLock::new(HandlerMaps::default()),
            events,
        }
    }

    /// Register a synchronous handler under the endpoint.
    pub fn register_service(&self, endpoint: ServiceEndpoint, handler: Arc<dyn ServiceHandler>) {
        let replaced = {
            let mut maps = self.handlers.write();
            maps.sync
                .entry(endpoint.provider.clone())
                .or_default()
                .insert(endpoint.method.clone(), handler)
                .is_some()
        };
        tracing::debug!(endpoint = %endpoint, replaced, "sync service registered");
        self.emit_registered(&endpoint, replaced);
    }

    /// Register an asynchronous handler under the endpoint.
    pub fn register_async_service(
        &self,
        endpoint: ServiceEndpoint,
        handler: Arc<dyn AsyncServiceHandler>,
    ) {
        let replaced = {
            let mut maps = self.handlers.write();
            maps.asynchronous
                .entry(endpoint.provider.clone())
                .or_default()
                .insert(endpoint.method.clone(), handler)
                .is_some()
        };
        tracing::debug!(endpoint = %endpoint, replaced, "async service registered");
        self.emit_registered(&endpoint, replaced);
    }

    /// Remove every method registered under the provider, sync and async.
    /// Returns whether anything was removed.
    pub fn unregister_service(&self, provider_id: &str) -> bool {
        let removed = {
            let mut maps = self.handlers.write();
            let a = maps.sync.remove(provider_id).is_some();
            let b = maps.asynchronous.remove(provider_id).is_some();
            a || b
        };
        if removed {
            tracing::debug!(provider = provider_id, "service unregistered");
            self.events.emit(OrchestratorEvent::ServiceUnregistered {
                provider: provider_id.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        removed
    }

    /// Whether any handler (sync or async) exists under the provider id.
    pub fn is_registered(&self, provider_id: &str) -> bool {
        let maps = self.handlers.read();
        maps.sync.contains_key(provider_id) || maps.asynchronous.contains_key(provider_id)
    }

    /// Whether a handler exists for the exact endpoint.
    pub fn has_endpoint(&self, endpoint: &ServiceEndpoint) -> bool {
        let maps = self.handlers.read();
        maps.sync
            .get(&endpoint.provider)
            .is_some_and(|m| m.contains_key(&endpoint.method))
            || maps
                .asynchronous
                .get(&endpoint.provider)
                .is_some_and(|m| m.contains_key(&endpoint.method))
    }

    /// List registered endpoints, optionally filtered by provider, sorted for
    /// deterministic output.
    pub fn list_services(&self, provider_filter: Option<&str>) -> Vec<ServiceEndpoint> {
        let maps = self.handlers.read();
        let wanted = |provider: &str| provider_filter.is_none_or(|f| f == provider);
        let mut endpoints: Vec<ServiceEndpoint> = Vec::new();
        for (provider, methods) in maps.sync.iter().filter(|(p, _)| wanted(p)) {
            for method in methods.keys() {
                endpoints.push(ServiceEndpoint::new(provider.clone(), method.clone()));
            }
        }
        for (provider, methods) in maps.asynchronous.iter().filter(|(p, _)| wanted(p)) {
            for method in methods.keys() {
                endpoints.push(ServiceEndpoint::new(provider.clone(), method.clone()));
            }
        }
        endpoints.sort_by(|a, b| (&a.provider, &a.method).cmp(&(&b.provider, &b.method)));
        endpoints.dedup();
        endpoints
    }

    /// Clone out the sync handler for the endpoint, if any.
    pub(crate) fn lookup_sync(&self, provider: &str, method: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers
            .read()
            .sync
            .get(provider)
            .and_then(|m| m.get(method))
            .cloned()
    }

    /// Clone out the async handler for the endpoint, if any.
    pub(crate) fn lookup_async(
        &self,
        provider: &str,
        method: &str,
    ) -> Option<Arc<dyn AsyncServiceHandler>> {
        self.handlers
            .read()
            .asynchronous
            .get(provider)
            .and_then(|m| m.get(method))
            .cloned()
    }

    fn emit_registered(&self, endpoint: &ServiceEndpoint, replaced: bool) {
        self.events.emit(OrchestratorEvent::ServiceRegistered {
            provider: endpoint.provider.clone(),
            method: endpoint.method.clone(),
            replaced,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceFault;
    use crate::messaging::types::Request;
    use serde_json::json;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(EventEmitter::disabled())
    }

    fn echo_handler() -> Arc<dyn ServiceHandler> {
        Arc::new(|request: &Request| Ok(json!({"method": request.method})))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        registry.register_service(ServiceEndpoint::new("files", "read"), echo_handler());

        assert!(registry.is_registered("files"));
        assert!(registry.has_endpoint(&ServiceEndpoint::new("files", "read")));
        assert!(!registry.has_endpoint(&ServiceEndpoint::new("files", "write")));
        assert!(registry.lookup_sync("files", "read").is_some());
        assert!(registry.lookup_async("files", "read").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = registry();
        let endpoint = ServiceEndpoint::new("files", "read");
        registry.register_service(endpoint.clone(), Arc::new(|_: &Request| Ok(json!(1))));
        registry.register_service(endpoint.clone(), Arc::new(|_: &Request| Ok(json!(2))));

        let handler = registry.lookup_sync("files", "read").unwrap();
        let request = Request::new("t", "files", "read");
        assert_eq!(handler.handle(&request).unwrap(), json!(2));
    }

    #[test]
    fn test_replacement_still_emits_event() {
        let (tx, mut rx) = crate::events::create_event_channel();
        let active = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let registry = ServiceRegistry::new(EventEmitter::new(tx, active));
        let endpoint = ServiceEndpoint::new("files", "read");

        registry.register_service(endpoint.clone(), echo_handler());
        registry.register_service(endpoint, echo_handler());

        match rx.try_recv().unwrap() {
            OrchestratorEvent::ServiceRegistered { replaced, .. } => assert!(!replaced),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            OrchestratorEvent::ServiceRegistered { replaced, .. } => assert!(replaced),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unregister_removes_all_methods() {
        let registry = registry();
        registry.register_service(ServiceEndpoint::new("files", "read"), echo_handler());
        registry.register_service(ServiceEndpoint::new("files", "write"), echo_handler());
        registry.register_service(ServiceEndpoint::new("net", "fetch"), echo_handler());

        assert!(registry.unregister_service("files"));
        assert!(!registry.is_registered("files"));
        assert!(registry.is_registered("net"));
        assert!(!registry.unregister_service("files"));
    }

    #[test]
    fn test_list_services_filter_and_order() {
        let registry = registry();
        registry.register_service(ServiceEndpoint::new("b", "z"), echo_handler());
        registry.register_service(ServiceEndpoint::new("b", "a"), echo_handler());
        registry.register_service(ServiceEndpoint::new("a", "m"), echo_handler());

        let all = registry.list_services(None);
        assert_eq!(
            all,
            vec![
                ServiceEndpoint::new("a", "m"),
                ServiceEndpoint::new("b", "a"),
                ServiceEndpoint::new("b", "z"),
            ]
        );

        let only_b = registry.list_services(Some("b"));
        assert_eq!(only_b.len(), 2);
        assert!(only_b.iter().all(|e| e.provider == "b"));
    }

    #[test]
    fn test_list_services_spans_sync_and_async() {
        use crate::messaging::types::FnAsyncHandler;

        let registry = registry();
        registry.register_service(ServiceEndpoint::new("files", "read"), echo_handler());
        registry.register_async_service(
            ServiceEndpoint::new("files", "watch"),
            Arc::new(FnAsyncHandler(|_: Request| async { Ok(json!(null)) })),
        );
        registry.register_async_service(
            ServiceEndpoint::new("net", "fetch"),
            Arc::new(FnAsyncHandler(|_: Request| async { Ok(json!(null)) })),
        );

        assert_eq!(
            registry.list_services(None),
            vec![
                ServiceEndpoint::new("files", "read"),
                ServiceEndpoint::new("files", "watch"),
                ServiceEndpoint::new("net", "fetch"),
            ]
        );
        assert_eq!(registry.list_services(Some("files")).len(), 2);
    }

    #[test]
    fn test_handler_fault_does_not_poison_registry() {
        let registry = registry();
        registry.register_service(
            ServiceEndpoint::new("files", "read"),
            Arc::new(|_: &Request| Err(ServiceFault::internal("disk gone"))),
        );
        let handler = registry.lookup_sync("files", "read").unwrap();
        assert!(handler.handle(&Request::new("t", "files", "read")).is_err());
        assert!(registry.is_registered("files"));
    }
}
