use uuid::Uuid;

pub fn new_operation_id() -> String {
    format!("op-{}", Uuid::new_v4())
}

pub fn new_lock_token(owner: &str) -> String {
    format!("{owner}:{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_unique_and_prefixed() {
        let first = new_operation_id();
        let second = new_operation_id();
        assert!(first.starts_with("op-"));
        assert_ne!(first, second);
    }

    #[test]
    fn lock_tokens_carry_the_owner() {
        let token = new_lock_token("coordinator-1");
        assert!(token.starts_with("coordinator-1:"));
    }
}
