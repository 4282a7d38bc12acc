use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, Vec<Arc<dyn Any + Send + Sync>>>> =
        Mutex::new(HashMap::new());
}

/// Process-wide mapping from contract type name to registered instances.
/// Handlers are registered once at startup from the settings table and looked
/// up by name when the engine is wired together, the hot path never enters
/// the lock after initialisation.
pub fn register(type_name: &str, instance: Arc<dyn Any + Send + Sync>) {
    let mut registry = match REGISTRY.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.entry(type_name.to_string()).or_default().push(instance);
}

pub fn instances(type_name: &str) -> Vec<Arc<dyn Any + Send + Sync>> {
    let registry = match REGISTRY.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.get(type_name).cloned().unwrap_or_default()
}

/// The single registered instance of a concrete type, `None` when absent or
/// registered under a different concrete type.
pub fn single<T: Any + Send + Sync>(type_name: &str) -> Option<Arc<T>> {
    instances(type_name)
        .into_iter()
        .find_map(|instance| instance.downcast::<T>().ok())
}

/// Clears every registration. Tests and re-initialisation only.
pub fn reset() {
    let mut registry = match REGISTRY.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve_by_type_name() {
        reset();
        register("counter", Arc::new(41u32));
        register("counter", Arc::new("not a counter"));
        let resolved: Arc<u32> = single("counter").unwrap();
        assert_eq!(*resolved, 41);
        assert_eq!(instances("counter").len(), 2);
        assert!(single::<u64>("missing").is_none());
        reset();
        assert!(instances("counter").is_empty());
    }
}
