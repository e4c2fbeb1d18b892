//! SQLite-backed [`StateStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::error::{StoreError, StoreResult};
use super::models::{CameraRecord, DeviceRecord, FamilyMemberProfile, HubRecord, Snapshot};
use super::store::StateStore;
use crate::db::Database;

#[derive(Debug, FromRow)]
struct FamilyMemberRow {
    id: String,
    name: String,
    feature_vector: String,
}

#[derive(Debug, FromRow)]
struct AssociationRow {
    camera_id: String,
    family_member_id: String,
}

/// Store backed by the `homelink` SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self) -> StoreResult<Snapshot> {
        let hubs = sqlx::query_as::<_, HubRecord>(
            r#"
            SELECT id, name, user_id, connected_at, last_heartbeat, temperature, humidity,
                   alarm_state, online
            FROM hubs
            ORDER BY connected_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let devices = sqlx::query_as::<_, DeviceRecord>(
            r#"
            SELECT id, hub_id, name, device_type, status, last_updated
            FROM devices
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let cameras = sqlx::query_as::<_, CameraRecord>(
            r#"
            SELECT id, hub_id, user_id, name, online, last_motion, last_image_url, created_at
            FROM cameras
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let members = sqlx::query_as::<_, FamilyMemberRow>(
            "SELECT id, name, feature_vector FROM family_members ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let associations = sqlx::query_as::<_, AssociationRow>(
            "SELECT camera_id, family_member_id FROM camera_family_members ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut camera_ids: HashMap<String, Vec<String>> = HashMap::new();
        for row in associations {
            camera_ids
                .entry(row.family_member_id)
                .or_default()
                .push(row.camera_id);
        }

        let mut profiles = Vec::with_capacity(members.len());
        for row in members {
            let feature_vector: Vec<f64> = serde_json::from_str(&row.feature_vector)
                .map_err(|e| StoreError::Corrupt(format!("family member {}: {e}", row.id)))?;
            profiles.push(FamilyMemberProfile {
                camera_ids: camera_ids.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                feature_vector,
            });
        }

        Ok(Snapshot {
            hubs,
            devices,
            cameras,
            profiles,
        })
    }

    async fn save_hub(&self, hub: &HubRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hubs (id, name, user_id, connected_at, last_heartbeat, temperature,
                              humidity, alarm_state, online)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                user_id = excluded.user_id,
                connected_at = excluded.connected_at,
                last_heartbeat = excluded.last_heartbeat,
                temperature = excluded.temperature,
                humidity = excluded.humidity,
                alarm_state = excluded.alarm_state,
                online = excluded.online
            "#,
        )
        .bind(&hub.id)
        .bind(&hub.name)
        .bind(&hub.user_id)
        .bind(hub.connected_at)
        .bind(hub.last_heartbeat)
        .bind(hub.temperature)
        .bind(hub.humidity)
        .bind(hub.alarm_state)
        .bind(hub.online)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_device(&self, device: &DeviceRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, hub_id, name, device_type, status, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hub_id = excluded.hub_id,
                name = excluded.name,
                device_type = excluded.device_type,
                status = excluded.status,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&device.id)
        .bind(&device.hub_id)
        .bind(&device.name)
        .bind(&device.device_type)
        .bind(&device.status)
        .bind(device.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_camera(&self, camera: &CameraRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cameras (id, hub_id, user_id, name, online, last_motion, last_image_url,
                                 created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hub_id = excluded.hub_id,
                user_id = excluded.user_id,
                name = excluded.name,
                online = excluded.online,
                last_motion = excluded.last_motion,
                last_image_url = excluded.last_image_url
            "#,
        )
        .bind(&camera.id)
        .bind(&camera.hub_id)
        .bind(&camera.user_id)
        .bind(&camera.name)
        .bind(camera.online)
        .bind(camera.last_motion)
        .bind(&camera.last_image_url)
        .bind(camera.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_profile(&self, profile: &FamilyMemberProfile) -> StoreResult<()> {
        let vector = serde_json::to_string(&profile.feature_vector)
            .map_err(|e| StoreError::Corrupt(format!("family member {}: {e}", profile.id)))?;
        let created_at: DateTime<Utc> = Utc::now();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO family_members (id, name, feature_vector, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&vector)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("family member {}", profile.id)));
        }

        for camera_id in &profile.camera_ids {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO camera_family_members (camera_id, family_member_id)
                VALUES (?, ?)
                "#,
            )
            .bind(camera_id)
            .bind(&profile.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteStore {
        let db = Database::in_memory().await.unwrap();
        SqliteStore::new(&db)
    }

    fn camera(id: &str, hub_id: &str) -> CameraRecord {
        CameraRecord {
            id: id.to_string(),
            hub_id: hub_id.to_string(),
            user_id: None,
            name: format!("Camera {id}"),
            online: true,
            last_motion: None,
            last_image_url: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_hub_upsert_overwrites() {
        let store = store().await;
        let now = Utc::now();
        let mut hub = HubRecord::new("hub-1", Some("user-1".to_string()), now);
        store.save_hub(&hub).await.unwrap();

        hub.online = false;
        hub.temperature = Some(21.5);
        hub.last_heartbeat = now + Duration::seconds(30);
        store.save_hub(&hub).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.hubs.len(), 1);
        let loaded = &snapshot.hubs[0];
        assert!(!loaded.online);
        assert_eq!(loaded.temperature, Some(21.5));
        assert_eq!(loaded.name, "Hub hub-1");
    }

    #[tokio::test]
    async fn test_devices_and_cameras_persist() {
        let store = store().await;
        let now = Utc::now();
        store
            .save_hub(&HubRecord::new("hub-1", None, now))
            .await
            .unwrap();
        store
            .save_device(&DeviceRecord {
                id: "d1".to_string(),
                hub_id: "hub-1".to_string(),
                name: "Lamp".to_string(),
                device_type: "switch".to_string(),
                status: "on".to_string(),
                last_updated: now,
            })
            .await
            .unwrap();
        let mut cam = camera("cam-1", "hub-1");
        cam.last_motion = Some(now);
        store.save_camera(&cam).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices[0].status, "on");
        assert_eq!(snapshot.cameras.len(), 1);
        assert!(snapshot.cameras[0].last_motion.is_some());
    }

    #[tokio::test]
    async fn test_profiles_keep_vector_and_associations() {
        let store = store().await;
        store
            .save_hub(&HubRecord::new("hub-1", None, Utc::now()))
            .await
            .unwrap();
        store.save_camera(&camera("cam-1", "hub-1")).await.unwrap();
        store.save_camera(&camera("cam-2", "hub-1")).await.unwrap();

        let profile = FamilyMemberProfile {
            id: "fm-1".to_string(),
            name: "Ada".to_string(),
            feature_vector: vec![0.25, -0.5, 1.0],
            camera_ids: vec!["cam-2".to_string(), "cam-1".to_string()],
        };
        store.insert_profile(&profile).await.unwrap();

        let err = store.insert_profile(&profile).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.profiles, vec![profile]);
    }
}
