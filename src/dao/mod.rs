/// Shared key layout.
pub mod keys;
/// Key-value backends and the session-scoped view.
pub mod kv_store;
/// Storage error types shared by every backend.
pub mod storage;
