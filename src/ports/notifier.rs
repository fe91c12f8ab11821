//! Narrow interface for pushing an in-app event to every live session of
//! a user, used by the Alert Engine's `notifyOwner` action. Breaks the
//! same cyclic-coupling shape spec.md §9 calls out for `AgentSender`: the
//! Alert Engine depends on this trait, never on `Gateway`/
//! `ConnectionRegistry` directly.

pub trait ClientNotifier: Send + Sync {
    fn notify_user(&self, user_id: &str, event: serde_json::Value);
}
