use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A bookable space as the directory knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub id: Ulid,
    pub name: String,
    /// Price per hour; bookings are charged pro rata by duration.
    pub hourly_rate: Decimal,
    pub capacity: u32,
    pub active: bool,
}

/// Catalog of spaces the engine books against. The engine only reads it;
/// listing management lives upstream of the booking path.
#[async_trait]
pub trait SpaceDirectory: Send + Sync {
    async fn find(&self, id: Ulid) -> Option<SpaceRecord>;
    async fn list_active(&self) -> Vec<SpaceRecord>;
}

/// Directory backed by an in-process map, optionally seeded from a JSON file.
pub struct InMemoryDirectory {
    spaces: DashMap<Ulid, SpaceRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            spaces: DashMap::new(),
        }
    }

    pub fn with_spaces(records: impl IntoIterator<Item = SpaceRecord>) -> Self {
        let dir = Self::new();
        for record in records {
            dir.spaces.insert(record.id, record);
        }
        dir
    }

    /// Seed the directory from a JSON array of space records.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let records: Vec<SpaceRecord> = serde_json::from_str(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::with_spaces(records))
    }

    pub fn insert(&self, record: SpaceRecord) {
        self.spaces.insert(record.id, record);
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// Flip a listing's active flag. Returns false if the space is unknown.
    pub fn set_active(&self, id: Ulid, active: bool) -> bool {
        match self.spaces.get_mut(&id) {
            Some(mut record) => {
                record.active = active;
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpaceDirectory for InMemoryDirectory {
    async fn find(&self, id: Ulid) -> Option<SpaceRecord> {
        self.spaces.get(&id).map(|r| r.value().clone())
    }

    async fn list_active(&self) -> Vec<SpaceRecord> {
        let mut active: Vec<SpaceRecord> = self
            .spaces
            .iter()
            .filter(|r| r.value().active)
            .map(|r| r.value().clone())
            .collect();
        active.sort_by_key(|r| r.id);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn load_from_json() {
        let dir = std::env::temp_dir().join("reservd_directory_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("spaces.json");
        std::fs::write(
            &path,
            r#"[
                {"id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","name":"Atrium","hourly_rate":"12.50","capacity":8,"active":true},
                {"id":"01BX5ZZKBKACTAV9WEVGEMMVRZ","name":"Annex","hourly_rate":"9","capacity":4,"active":false}
            ]"#,
        )
        .unwrap();

        let directory = InMemoryDirectory::load(&path).unwrap();
        let id: Ulid = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
        let atrium = directory.find(id).await.unwrap();
        assert_eq!(atrium.name, "Atrium");
        assert_eq!(atrium.hourly_rate, dec!(12.50));
        assert!(atrium.active);

        let active = directory.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Atrium");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn set_active_flips_listing() {
        let id = Ulid::new();
        let directory = InMemoryDirectory::with_spaces([SpaceRecord {
            id,
            name: "Loft".into(),
            hourly_rate: dec!(20),
            capacity: 10,
            active: true,
        }]);

        assert!(directory.set_active(id, false));
        assert!(!directory.find(id).await.unwrap().active);
        assert!(directory.list_active().await.is_empty());

        assert!(!directory.set_active(Ulid::new(), false));
    }
}
