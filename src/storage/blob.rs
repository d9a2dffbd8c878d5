//!  Blob operations for document storage.
//!
//! Each document value is stored verbatim as one blob. Identical values share
//! a blob, which is what makes rewriting an unchanged document a no-op at the
//! tree level.

use git2::Repository;

use crate::storage::error::StorageResult;
use crate::storage::types::BlobId;

/// write raw bytes as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn write_blob(repo: &Repository, content: &[u8]) -> StorageResult<BlobId> {
    let oid = repo.blob(content)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

/// read a blob as UTF-8 text
pub fn read_blob_string(repo: &Repository, blob_id: BlobId) -> StorageResult<String> {
    let bytes = read_blob(repo, blob_id)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_identical_content_shares_blob() {
        let (_dir, repo) = setup_repo();
        let a = write_blob(&repo, b"same").unwrap();
        let b = write_blob(&repo, b"same").unwrap();
        let c = write_blob(&repo, b"other").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_read_blob_string() {
        let (_dir, repo) = setup_repo();
        let id = write_blob(&repo, "héllo".as_bytes()).unwrap();
        assert_eq!(read_blob_string(&repo, id).unwrap(), "héllo");

        let empty = write_blob(&repo, b"").unwrap();
        assert_eq!(read_blob_string(&repo, empty).unwrap(), "");
    }

    #[test]
    fn test_invalid_utf8() {
        let (_dir, repo) = setup_repo();
        let id = write_blob(&repo, &[0xff, 0xfe]).unwrap();
        assert!(read_blob_string(&repo, id).is_err());
        assert_eq!(read_blob(&repo, id).unwrap(), vec![0xff, 0xfe]);
    }
}
