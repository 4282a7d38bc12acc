use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// RwLock wrapper whose accessors hand out scoped tokens, guaranteeing
/// release on every exit path including panics and cancellation unwinds.
/// Poisoned locks recover the inner state rather than propagating the panic
/// into unrelated workers.
#[derive(Debug, Default)]
pub struct ScopedRwLock<T> {
    inner: RwLock<T>,
}

impl<T> ScopedRwLock<T> {
    pub fn new(value: T) -> Self {
        ScopedRwLock {
            inner: RwLock::new(value),
        }
    }

    pub fn read_token(&self) -> RwLockReadGuard<'_, T> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn write_token(&self) -> RwLockWriteGuard<'_, T> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn tokens_release_on_drop() {
        let lock = ScopedRwLock::new(0u32);
        {
            let mut token = lock.write_token();
            *token = 5;
        }
        assert_eq!(*lock.read_token(), 5);
    }

    #[test]
    fn poisoned_lock_recovers() {
        let lock = Arc::new(ScopedRwLock::new(1u32));
        let panicking = lock.clone();
        let _ = thread::spawn(move || {
            let _token = panicking.inner.write().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(*lock.read_token(), 1);
    }
}
