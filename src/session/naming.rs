//! Container name generation.

use uuid::Uuid;

/// Supplies the container name when the session config does not fix one.
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

impl<F> NameGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Random UUID v4 names.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidNameGenerator;

impl NameGenerator for UuidNameGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// `<prefix>-<uuid>` names, so leftovers are easy to spot in `docker ps`.
#[derive(Debug, Clone)]
pub struct PrefixedNameGenerator {
    prefix: String,
}

impl PrefixedNameGenerator {
    /// Generator producing `<prefix>-<uuid>` names.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl NameGenerator for PrefixedNameGenerator {
    fn generate(&self) -> String {
        format!("{}-{}", self.prefix, Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_names_are_unique() {
        let a = UuidNameGenerator.generate();
        let b = UuidNameGenerator.generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_prefixed_names() {
        let name = PrefixedNameGenerator::new("itest-db").generate();
        assert!(name.starts_with("itest-db-"));
        assert_eq!(name.len(), "itest-db-".len() + 32);
    }

    #[test]
    fn test_closure_generator() {
        let generator = || "fixed".to_string();
        assert_eq!(generator.generate(), "fixed");
    }
}
