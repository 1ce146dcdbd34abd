//! Persistence (§6): sqlx/SQLite schema this core owns — licenses,
//! installations, push_logs, CDRs — plus read-only snapshots of the
//! extensions/trunks tables it only ever reads, following the teacher's
//! `call-engine::database::DatabaseManager` shape.

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use tracing::info;

use pbx_registrar::types::Extension;
use pbx_trunk::{Trunk, TrunkCredentials, TrunkStatus, TrunkType};

use crate::cdr::Cdr;
use crate::error::{PbxError, Result};
use crate::invite_router::ExtensionDirectory;
use crate::outbound::TrunkDirectory;

#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!(database_url, "connecting to database");
        let pool = SqlitePool::connect(database_url).await.map_err(|e| PbxError::Database(e.to_string()))?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| PbxError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn insert_cdr(&self, cdr: &Cdr) -> Result<()> {
        let duration = cdr.duration().num_seconds();
        let billable = cdr.billable_duration().num_seconds();
        sqlx::query(
            "INSERT INTO cdrs (call_id, direction, trunk_id, caller_id_name, caller_id_number, called_number, \
             start_time, answer_time, end_time, duration_secs, billable_secs, disposition, hangup_cause, recording_path) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&cdr.call_id)
        .bind(&cdr.direction)
        .bind(cdr.trunk_id as i64)
        .bind(&cdr.caller_id_name)
        .bind(&cdr.caller_id_number)
        .bind(&cdr.called_number)
        .bind(cdr.start_time.to_rfc3339())
        .bind(cdr.answer_time.map(|t| t.to_rfc3339()))
        .bind(cdr.end_time.map(|t| t.to_rfc3339()))
        .bind(duration)
        .bind(billable)
        .bind(cdr.disposition.map(|d| d.as_str()).unwrap_or("unknown"))
        .bind(&cdr.hangup_cause)
        .bind(&cdr.recording_path)
        .execute(&self.pool)
        .await
        .map_err(|e| PbxError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_extensions(&self) -> Result<Vec<Extension>> {
        let rows = sqlx::query(
            "SELECT id, number, display_name, sip_username, sip_password, max_registrations, dnd FROM extensions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PbxError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(Extension {
                    id: row.try_get::<i64, _>("id").map_err(|e| PbxError::Database(e.to_string()))? as u64,
                    number: row.try_get("number").map_err(|e| PbxError::Database(e.to_string()))?,
                    display_name: row.try_get("display_name").map_err(|e| PbxError::Database(e.to_string()))?,
                    sip_username: row.try_get("sip_username").map_err(|e| PbxError::Database(e.to_string()))?,
                    sip_password: row.try_get("sip_password").map_err(|e| PbxError::Database(e.to_string()))?,
                    max_registrations: row.try_get::<i64, _>("max_registrations").map_err(|e| PbxError::Database(e.to_string()))? as u32,
                    dnd: row.try_get("dnd").map_err(|e| PbxError::Database(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn load_trunks(&self) -> Result<Vec<Trunk>> {
        let rows = sqlx::query(
            "SELECT id, name, trunk_type, enabled, host, port, transport, username, auth_username, password, \
             registered_expiry, remote_hosts, priority, max_channels, caller_id_name, caller_id_number, \
             prefix_strip, prefix_add FROM trunks WHERE enabled = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PbxError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let trunk_type_str: String = row.try_get("trunk_type").map_err(|e| PbxError::Database(e.to_string()))?;
                let transport_str: String = row.try_get("transport").map_err(|e| PbxError::Database(e.to_string()))?;
                let remote_hosts: String = row.try_get("remote_hosts").map_err(|e| PbxError::Database(e.to_string()))?;
                Ok(Trunk {
                    id: row.try_get::<i64, _>("id").map_err(|e| PbxError::Database(e.to_string()))? as u64,
                    name: row.try_get("name").map_err(|e| PbxError::Database(e.to_string()))?,
                    trunk_type: if trunk_type_str.eq_ignore_ascii_case("ip") { TrunkType::Ip } else { TrunkType::Register },
                    enabled: row.try_get::<i64, _>("enabled").map_err(|e| PbxError::Database(e.to_string()))? != 0,
                    host: row.try_get("host").map_err(|e| PbxError::Database(e.to_string()))?,
                    port: row.try_get::<i64, _>("port").map_err(|e| PbxError::Database(e.to_string()))? as u16,
                    transport: match transport_str.to_ascii_lowercase().as_str() {
                        "tcp" => pbx_trunk::TrunkTransport::Tcp,
                        "tls" => pbx_trunk::TrunkTransport::Tls,
                        _ => pbx_trunk::TrunkTransport::Udp,
                    },
                    credentials: TrunkCredentials {
                        username: row.try_get("username").map_err(|e| PbxError::Database(e.to_string()))?,
                        auth_username: row.try_get("auth_username").map_err(|e| PbxError::Database(e.to_string()))?,
                        password: row.try_get("password").map_err(|e| PbxError::Database(e.to_string()))?,
                    },
                    registered_expiry: row.try_get::<i64, _>("registered_expiry").map_err(|e| PbxError::Database(e.to_string()))? as u32,
                    remote_hosts: remote_hosts.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
                    priority: row.try_get::<i64, _>("priority").map_err(|e| PbxError::Database(e.to_string()))? as i32,
                    max_channels: row.try_get::<i64, _>("max_channels").map_err(|e| PbxError::Database(e.to_string()))? as u32,
                    caller_id_name: row.try_get("caller_id_name").map_err(|e| PbxError::Database(e.to_string()))?,
                    caller_id_number: row.try_get("caller_id_number").map_err(|e| PbxError::Database(e.to_string()))?,
                    prefix_strip: row.try_get::<i64, _>("prefix_strip").map_err(|e| PbxError::Database(e.to_string()))? as usize,
                    prefix_add: row.try_get("prefix_add").map_err(|e| PbxError::Database(e.to_string()))?,
                })
            })
            .collect()
    }
}

/// In-memory snapshot of `extensions`, refreshed periodically from the
/// database. Digest auth (§4.3) and number lookup (§4.10) both need a
/// synchronous, lock-free read path, so the core never awaits a query
/// mid-INVITE.
pub struct ExtensionStore {
    by_id: DashMap<u64, Extension>,
    by_username: DashMap<String, u64>,
    by_number: DashMap<String, u64>,
}

impl ExtensionStore {
    pub fn new() -> Self {
        Self { by_id: DashMap::new(), by_username: DashMap::new(), by_number: DashMap::new() }
    }

    pub async fn refresh(&self, db: &DatabaseManager) -> Result<()> {
        let extensions = db.load_extensions().await?;
        self.by_id.clear();
        self.by_username.clear();
        self.by_number.clear();
        for ext in extensions {
            self.by_username.insert(ext.sip_username.clone(), ext.id);
            self.by_number.insert(ext.number.clone(), ext.id);
            self.by_id.insert(ext.id, ext);
        }
        Ok(())
    }
}

impl Default for ExtensionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl pbx_registrar::ExtensionLookup for ExtensionStore {
    fn find_by_username(&self, username: &str) -> Option<Extension> {
        let id = *self.by_username.get(username)?;
        self.by_id.get(&id).map(|e| e.clone())
    }
}

impl ExtensionDirectory for ExtensionStore {
    fn find_by_number(&self, number: &str) -> Option<Extension> {
        let id = *self.by_number.get(number)?;
        self.by_id.get(&id).map(|e| e.clone())
    }
}

/// In-memory snapshot of the `trunks` table; runtime status (registered,
/// failed, backing off) is never persisted and comes from the live
/// `TrunkRegistrar` instead (§3: "trunk runtime state is not persisted").
pub struct TrunkStore {
    trunks: DashMap<u64, Trunk>,
    runtime: Arc<dyn Fn(u64) -> Option<TrunkStatus> + Send + Sync>,
}

impl TrunkStore {
    pub fn new(runtime: Arc<dyn Fn(u64) -> Option<TrunkStatus> + Send + Sync>) -> Self {
        Self { trunks: DashMap::new(), runtime }
    }

    pub async fn refresh(&self, db: &DatabaseManager) -> Result<()> {
        let trunks = db.load_trunks().await?;
        self.trunks.clear();
        for trunk in trunks {
            self.trunks.insert(trunk.id, trunk);
        }
        Ok(())
    }
}

impl TrunkDirectory for TrunkStore {
    fn enabled_trunks(&self) -> Vec<Trunk> {
        self.trunks.iter().map(|e| e.value().clone()).collect()
    }

    fn runtime_status(&self, trunk_id: u64) -> Option<TrunkStatus> {
        (self.runtime)(trunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extension_store_resolves_by_username_and_number() {
        let store = ExtensionStore::new();
        let ext = Extension {
            id: 1,
            number: "101".into(),
            display_name: "Alice".into(),
            sip_username: "alice".into(),
            sip_password: "secret".into(),
            max_registrations: 3,
            dnd: false,
        };
        store.by_username.insert(ext.sip_username.clone(), ext.id);
        store.by_number.insert(ext.number.clone(), ext.id);
        store.by_id.insert(ext.id, ext);

        use pbx_registrar::ExtensionLookup;
        assert_eq!(ExtensionLookup::find_by_username(&store, "alice").map(|e| e.id), Some(1));
        assert_eq!(store.find_by_number("101").map(|e| e.id), Some(1));
        assert!(store.find_by_number("missing").is_none());
    }

    #[tokio::test]
    async fn trunk_store_reports_runtime_status_from_the_supplied_closure() {
        let store = TrunkStore::new(Arc::new(|id| if id == 7 { Some(TrunkStatus::Registered) } else { None }));
        assert_eq!(store.runtime_status(7), Some(TrunkStatus::Registered));
        assert_eq!(store.runtime_status(8), None);
    }
}
