use uuid::Uuid;

/// Short random hex suffix used to make branch and session names unique.
pub fn short_hex_id() -> String {
    let full = Uuid::new_v4().simple().to_string();
    full.chars().take(8).collect()
}

/// Rewrite a session or branch id into a name safe for a flat file store.
pub fn file_safe_id(id: &str) -> String {
    id.replace('/', "_")
}
