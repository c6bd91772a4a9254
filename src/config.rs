#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmOptions {
    /// Install the manual `gc()` trigger on the global object.
    pub expose_gc: bool,
}

impl RealmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expose_gc(mut self, expose: bool) -> Self {
        self.expose_gc = expose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_is_hidden_by_default() {
        assert!(!RealmOptions::default().expose_gc);
        assert!(RealmOptions::new().expose_gc(true).expose_gc);
    }
}
