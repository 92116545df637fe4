use sha2::{Digest, Sha256};

/// Convert a storage key to a filesystem safe file stem.
///
/// Keys that slugify to nothing (e.g. only punctuation) map to `"layout"`.
pub fn slugify(key: &str) -> String {
    let slug = slug::slugify(key);
    if slug.is_empty() {
        "layout".to_string()
    } else {
        slug
    }
}

/// File name used for a key inside a store directory.
///
/// Keys that are already slugs keep a plain name. Any other key gets a
/// digest suffix so two keys never share a file.
pub fn file_name_for(key: &str) -> String {
    let slug = slugify(key);
    if slug == key {
        return format!("{slug}.json");
    }
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("{slug}-{}.json", &digest[..12])
}
