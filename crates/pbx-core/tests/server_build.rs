//! Integration tests for server wiring: build a `PbxServer` against a real
//! (temp-file) SQLite database and an ephemeral UDP port, the way the admin
//! API would hand a freshly provisioned database to the running core.

use std::net::IpAddr;

use pbx_core::config::PbxConfig;
use pbx_core::server::PbxServer;
use sqlx::SqlitePool;

/// `extensions`/`trunks` are owned by the (out-of-scope) admin API; this
/// core's own migrations never create them, so tests provision them the
/// same way that API would before the core ever starts.
async fn provision_admin_tables(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE extensions (
            id INTEGER PRIMARY KEY,
            number TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            sip_username TEXT NOT NULL UNIQUE,
            sip_password TEXT NOT NULL,
            max_registrations INTEGER NOT NULL,
            dnd INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "CREATE TABLE trunks (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            trunk_type TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            transport TEXT NOT NULL,
            username TEXT NOT NULL,
            auth_username TEXT,
            password TEXT NOT NULL,
            registered_expiry INTEGER NOT NULL,
            remote_hosts TEXT NOT NULL,
            priority INTEGER NOT NULL,
            max_channels INTEGER NOT NULL,
            caller_id_name TEXT NOT NULL,
            caller_id_number TEXT NOT NULL,
            prefix_strip INTEGER NOT NULL,
            prefix_add TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .unwrap();
}

async fn test_config(db_path: &std::path::Path) -> PbxConfig {
    let mut config = PbxConfig::default();
    config.sip.host = "127.0.0.1".parse::<IpAddr>().unwrap();
    config.sip.port = 0;
    config.database.url = format!("sqlite://{}", db_path.display());
    config
}

#[tokio::test]
async fn build_wires_every_manager_against_an_empty_database() {
    let dir = tempfile_dir();
    let db_path = dir.join("pbx.db");
    std::fs::File::create(&db_path).unwrap();

    let pool = SqlitePool::connect(&format!("sqlite://{}", db_path.display())).await.unwrap();
    provision_admin_tables(&pool).await;
    pool.close().await;

    let config = test_config(&db_path).await;
    let ring_timeout = config.sip.ring_timeout_secs;
    let server = PbxServer::build(config).await.expect("build should succeed against an empty, freshly provisioned database");

    assert_eq!(server.config().sip.ring_timeout_secs, ring_timeout);
}

#[tokio::test]
async fn build_picks_up_seeded_extensions_and_trunks() {
    let dir = tempfile_dir();
    let db_path = dir.join("pbx.db");
    std::fs::File::create(&db_path).unwrap();

    let pool = SqlitePool::connect(&format!("sqlite://{}", db_path.display())).await.unwrap();
    provision_admin_tables(&pool).await;

    sqlx::query(
        "INSERT INTO extensions (id, number, display_name, sip_username, sip_password, max_registrations, dnd) \
         VALUES (1, '101', 'Alice', 'alice', 'secret', 3, 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO trunks (id, name, trunk_type, enabled, host, port, transport, username, auth_username, password, \
         registered_expiry, remote_hosts, priority, max_channels, caller_id_name, caller_id_number, prefix_strip, prefix_add) \
         VALUES (1, 'carrier-a', 'register', 1, 'carrier.example', 5060, 'udp', 'pbxuser', NULL, 'pw', \
         300, '203.0.113.10', 10, 0, '', '', 1, '0044')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let config = test_config(&db_path).await;
    // `build` should succeed and should have loaded both rows into the
    // in-memory stores without erroring; there is no public accessor for
    // the stores themselves, so a clean build is the externally observable
    // proof that `load_extensions`/`load_trunks` and the IP-auth seeding
    // in `build` all ran against the seeded rows without failing.
    let _server = PbxServer::build(config).await.expect("build should succeed against a seeded database");
}

fn tempfile_dir() -> std::path::PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!("pbx-core-test-{nanos}-{n}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
