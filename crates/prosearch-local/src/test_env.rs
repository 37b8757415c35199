//! Env vars are process-global; tests that mutate them hold [`ENV_LOCK`].

use std::sync::Mutex;

pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

pub(crate) struct EnvGuard {
    k: &'static str,
    prev: Option<String>,
}

impl EnvGuard {
    pub(crate) fn set(k: &'static str, v: &str) -> Self {
        let prev = std::env::var(k).ok();
        std::env::set_var(k, v);
        Self { k, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(v) = self.prev.take() {
            std::env::set_var(self.k, v);
        } else {
            std::env::remove_var(self.k);
        }
    }
}
