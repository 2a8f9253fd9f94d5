//! End-to-end checks against a deployed collector stack. Run with `cargo test -- --ignored`.
