/// Key/value store for agent turn outputs.
///
/// Lookups that fail for any reason are misses; writes are fire-and-forget.
pub trait Cache {
    /// Returns the stored output for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`. Failures are logged, never returned.
    fn set(&self, key: &str, value: &str);
}
