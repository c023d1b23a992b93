use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::CandidateRoom;
use crate::model::Room;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read room seed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid room seed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("room not found: {0}")]
    RoomNotFound(Ulid),
}

/// Read-only view of hotels' rooms.
#[async_trait]
pub trait RoomCatalog: Send + Sync {
    /// Every room of the hotel with its active flag. Inactive rooms are the
    /// allocator's to filter out.
    async fn list_candidate_rooms(&self, hotel_id: Ulid) -> Result<Vec<CandidateRoom>, CatalogError>;

    /// Rooms of the hotel ordered by id.
    async fn list_rooms(&self, hotel_id: Ulid) -> Result<Vec<Room>, CatalogError>;
}

/// Catalog held in memory, optionally seeded from a JSON file.
#[derive(Default)]
pub struct InMemoryCatalog {
    /// hotel id → rooms sorted by id
    hotels: DashMap<Ulid, Vec<Room>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let catalog = Self::new();
        for room in rooms {
            catalog.upsert_room(room);
        }
        catalog
    }

    /// Load `[{ "id", "hotelId", "roomType", "active" }, ...]`.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let rooms: Vec<Room> = serde_json::from_str(raw)?;
        Ok(Self::from_rooms(rooms))
    }

    pub fn upsert_room(&self, room: Room) {
        let mut rooms = self.hotels.entry(room.hotel_id).or_default();
        match rooms.binary_search_by_key(&room.id, |r| r.id) {
            Ok(pos) => rooms[pos] = room,
            Err(pos) => rooms.insert(pos, room),
        }
    }

    pub fn set_active(&self, hotel_id: Ulid, room_id: Ulid, active: bool) -> Result<(), CatalogError> {
        let mut rooms = self
            .hotels
            .get_mut(&hotel_id)
            .ok_or(CatalogError::RoomNotFound(room_id))?;
        let room = rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or(CatalogError::RoomNotFound(room_id))?;
        room.active = active;
        Ok(())
    }

    pub fn room_count(&self) -> usize {
        self.hotels.iter().map(|e| e.value().len()).sum()
    }

    fn rooms_of(&self, hotel_id: &Ulid) -> Vec<Room> {
        self.hotels
            .get(hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoomCatalog for InMemoryCatalog {
    async fn list_candidate_rooms(&self, hotel_id: Ulid) -> Result<Vec<CandidateRoom>, CatalogError> {
        Ok(self
            .rooms_of(&hotel_id)
            .into_iter()
            .map(|r| CandidateRoom {
                room_id: r.id,
                active: r.active,
            })
            .collect())
    }

    async fn list_rooms(&self, hotel_id: Ulid) -> Result<Vec<Room>, CatalogError> {
        Ok(self.rooms_of(&hotel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(hotel_id: Ulid, active: bool) -> Room {
        Room {
            id: Ulid::new(),
            hotel_id,
            room_type: "DOUBLE".into(),
            active,
        }
    }

    #[tokio::test]
    async fn rooms_listed_in_id_order() {
        let hotel = Ulid::new();
        let a = room(hotel, true);
        let b = room(hotel, false);
        let c = room(hotel, true);
        let catalog = InMemoryCatalog::from_rooms(vec![c.clone(), a.clone(), b.clone()]);

        let mut expected = vec![a, b, c];
        expected.sort_by_key(|r| r.id);
        assert_eq!(catalog.list_rooms(hotel).await.unwrap(), expected);

        let candidates = catalog.list_candidate_rooms(hotel).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates.iter().filter(|c| c.active).count(), 2);
    }

    #[tokio::test]
    async fn unknown_hotel_is_empty() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.list_rooms(Ulid::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_and_deactivate() {
        let hotel = Ulid::new();
        let mut r = room(hotel, true);
        let catalog = InMemoryCatalog::from_rooms(vec![r.clone()]);

        r.room_type = "SUITE".into();
        catalog.upsert_room(r.clone());
        assert_eq!(catalog.room_count(), 1);

        catalog.set_active(hotel, r.id, false).unwrap();
        let rooms = catalog.list_rooms(hotel).await.unwrap();
        assert_eq!(rooms[0].room_type, "SUITE");
        assert!(!rooms[0].active);

        assert!(matches!(
            catalog.set_active(hotel, Ulid::new(), true),
            Err(CatalogError::RoomNotFound(_))
        ));
    }

    #[test]
    fn seed_from_json() {
        let hotel = Ulid::new();
        let raw = format!(
            r#"[{{"id":"{}","hotelId":"{hotel}","roomType":"TWIN","active":true}}]"#,
            Ulid::new()
        );
        let catalog = InMemoryCatalog::from_json(&raw).unwrap();
        assert_eq!(catalog.room_count(), 1);

        assert!(matches!(
            InMemoryCatalog::from_json("[{\"id\":\"nope\"}]"),
            Err(CatalogError::Json(_))
        ));
    }
}
