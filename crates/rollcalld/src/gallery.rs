//! In-memory gallery of enrolled faces.
//!
//! Built once from the store at startup and owned by the service for its
//! whole lifetime. Reads vastly outnumber writes: every recognition takes a
//! snapshot, while only a successful registration appends. Entries are
//! pushed fully formed under the write lock, so readers never observe a
//! partial triple.

use crate::store::Store;
use rollcall_core::KnownFace;
use std::sync::RwLock;

pub struct Gallery {
    faces: RwLock<Vec<KnownFace>>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self {
            faces: RwLock::new(Vec::new()),
        }
    }

    /// Build the gallery from persistent storage. A storage failure logs a
    /// warning and yields an empty gallery — the daemon still starts and
    /// recognitions report no match until faces are enrolled.
    pub async fn load(store: &Store) -> Self {
        match store.load_known_faces().await {
            Ok(faces) => {
                tracing::info!(count = faces.len(), "gallery loaded");
                Self {
                    faces: RwLock::new(faces),
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to load enrolled faces; starting with empty gallery");
                Self::empty()
            }
        }
    }

    /// Append one enrolled face so subsequent recognitions see it without a
    /// reload.
    pub fn append(&self, face: KnownFace) {
        self.write_lock().push(face);
    }

    /// Clone the current set for a matching pass.
    pub fn snapshot(&self) -> Vec<KnownFace> {
        self.read_lock().clone()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Vec<KnownFace>> {
        self.faces.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Vec<KnownFace>> {
        self.faces.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Encoding;

    fn face(student_id: &str) -> KnownFace {
        KnownFace {
            student_id: student_id.into(),
            name: "Test".into(),
            encoding: Encoding::new(vec![0.0; 4]),
        }
    }

    #[test]
    fn append_is_visible_in_snapshot() {
        let gallery = Gallery::empty();
        assert!(gallery.is_empty());

        gallery.append(face("S1"));
        gallery.append(face("S2"));

        let snapshot = gallery.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].student_id, "S1");
        assert_eq!(snapshot[1].student_id, "S2");
        assert_eq!(gallery.len(), 2);
    }

    #[tokio::test]
    async fn load_from_store_and_degrade() {
        // A fresh migrated store yields an empty (but functional) gallery.
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let gallery = Gallery::load(&store).await;
        assert!(gallery.is_empty());

        // A store without a schema fails to load; the gallery degrades to
        // empty instead of propagating the error.
        let unmigrated = Store::open_in_memory().await.unwrap();
        let gallery = Gallery::load(&unmigrated).await;
        assert!(gallery.is_empty());
    }
}
