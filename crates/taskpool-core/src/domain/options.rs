//! Per-submission options.

/// Options for [`TaskPool::add`](crate::TaskPool::add).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Extra attempts after the first failure. `None` uses the pool default.
    pub retries: Option<u32>,
}

impl AddOptions {
    pub fn retries(retries: u32) -> Self {
        Self {
            retries: Some(retries),
        }
    }

    pub(crate) fn resolve_retries(&self, default_retries: u32) -> u32 {
        self.retries.unwrap_or(default_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_retries_override_default() {
        assert_eq!(AddOptions::retries(2).resolve_retries(5), 2);
        assert_eq!(AddOptions::retries(0).resolve_retries(5), 0);
    }

    #[test]
    fn missing_retries_fall_back_to_default() {
        assert_eq!(AddOptions::default().resolve_retries(0), 0);
        assert_eq!(AddOptions::default().resolve_retries(3), 3);
    }
}
