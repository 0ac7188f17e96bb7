use glob::Pattern;

/// Compiled managed/excluded name patterns. Exclusion always wins over
/// inclusion.
#[derive(Debug, Clone)]
pub struct ManagedPatterns {
    managed: Vec<Pattern>,
    excluded: Vec<Pattern>,
}

impl ManagedPatterns {
    pub fn compile(
        managed: &[String],
        excluded: &[String],
    ) -> Result<Self, glob::PatternError> {
        Ok(Self {
            managed: managed
                .iter()
                .map(|raw| Pattern::new(raw))
                .collect::<Result<_, _>>()?,
            excluded: excluded
                .iter()
                .map(|raw| Pattern::new(raw))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.excluded.iter().any(|pattern| pattern.matches(name)) {
            return false;
        }
        self.managed.iter().any(|pattern| pattern.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(managed: &[&str], excluded: &[&str]) -> ManagedPatterns {
        ManagedPatterns::compile(
            &managed.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &excluded.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .expect("compile patterns")
    }

    #[test]
    fn name_must_match_at_least_one_managed_pattern() {
        let set = patterns(&["web-*", "worker-?"], &[]);
        assert!(set.matches("web-1"));
        assert!(set.matches("worker-a"));
        assert!(!set.matches("worker-10"));
        assert!(!set.matches("db-1"));
    }

    #[test]
    fn exclusion_wins_even_when_managed_matches() {
        let set = patterns(&["web-*"], &["web-canary"]);
        assert!(set.matches("web-1"));
        assert!(!set.matches("web-canary"));
    }

    #[test]
    fn exclusion_patterns_are_globs_too() {
        let set = patterns(&["*"], &["*-canary", "debug-*"]);
        assert!(set.matches("web-1"));
        assert!(!set.matches("web-canary"));
        assert!(!set.matches("debug-shell"));
    }

    #[test]
    fn empty_managed_set_matches_nothing() {
        let set = patterns(&[], &[]);
        assert!(!set.matches("web-1"));
    }

    #[test]
    fn invalid_pattern_is_a_compile_error() {
        let result = ManagedPatterns::compile(&["web-[".to_string()], &[]);
        assert!(result.is_err());
    }
}
