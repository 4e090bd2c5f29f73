/// Effect creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectConfig {
    /// Top-level parameters that are never uploaded as shader constants.
    pub skip_constants: Vec<String>,
}

impl EffectConfig {
    /// Parses a `;`-separated skip-constant list such as `"a;b; c"`.
    pub fn with_skip_constants(list: &str) -> Self {
        Self {
            skip_constants: list
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub(crate) fn skips(&self, name: &str) -> bool {
        self.skip_constants.iter().any(|s| s == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_skip_list() {
        let config = EffectConfig::with_skip_constants(" a;b;; c ;");
        assert_eq!(config.skip_constants, vec!["a", "b", "c"]);
        assert!(config.skips("b"));
        assert!(!config.skips("d"));
    }
}
