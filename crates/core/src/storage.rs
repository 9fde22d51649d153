//! Locating stored files from their public URLs.

/// Bucket plus object path inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub bucket: String,
    pub path: String,
}

/// Split a public URL into bucket and path.
///
/// Everything after `marker` is `<bucket>/<path...>`. Query strings and
/// fragments are not part of the object path.
pub fn locate_object(public_url: &str, marker: &str) -> Option<StorageObject> {
    let (_, remainder) = public_url.split_once(marker)?;
    let remainder = remainder
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let (bucket, path) = remainder.split_once('/')?;
    if bucket.is_empty() || path.is_empty() {
        return None;
    }
    Some(StorageObject {
        bucket: bucket.to_string(),
        path: path.to_string(),
    })
}
