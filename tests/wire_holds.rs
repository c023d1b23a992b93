use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomhold::catalog::InMemoryCatalog;
use roomhold::clock::ManualClock;
use roomhold::config::HoldConfig;
use roomhold::engine::Engine;
use roomhold::model::{Ms, Room};
use roomhold::service::HoldService;
use roomhold::wire;

const NOW: Ms = 1_769_900_000_000; // 2026-01-31T22:53:20Z
const MIN: Ms = 60_000;

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    hotel_id: Ulid,
    room_ids: Vec<Ulid>,
    clock: Arc<ManualClock>,
}

async fn start_test_server(rooms: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomhold_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("holds.wal")).unwrap());

    let hotel_id = Ulid::new();
    let mut room_ids: Vec<Ulid> = (0..rooms).map(|_| Ulid::new()).collect();
    room_ids.sort();
    let catalog = InMemoryCatalog::from_rooms(room_ids.iter().map(|&id| Room {
        id,
        hotel_id,
        room_type: "KING".into(),
        active: true,
    }));

    let clock = Arc::new(ManualClock::new(NOW));
    let service = Arc::new(HoldService::new(
        engine,
        Arc::new(catalog),
        clock.clone(),
        HoldConfig::default(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let service = service.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, service, "roomhold".to_string()).await;
            });
        }
    });

    TestServer {
        addr,
        hotel_id,
        room_ids,
        clock,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roomhold")
        .user("frontdesk")
        .password("roomhold");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn affected(messages: &[SimpleQueryMessage]) -> Option<u64> {
    messages.iter().find_map(|m| match m {
        SimpleQueryMessage::CommandComplete(n) => Some(*n),
        _ => None,
    })
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|e| e.code().code().to_string())
        .unwrap_or_default()
}

fn insert_hold(key: &str, hotel_id: Ulid, guest: &str) -> String {
    format!(
        "INSERT INTO holds (idempotency_key, hotel_id, guest_name, guest_phone, check_in, check_out) \
         VALUES ('{key}', '{hotel_id}', '{guest}', '+1 555 0100', \
         '2026-02-01T12:00:00Z', '2026-02-03T10:00:00Z')"
    )
}

async fn create(client: &Client, key: &str, hotel_id: Ulid) -> SimpleQueryRow {
    let mut rs = rows(client.simple_query(&insert_hold(key, hotel_id, "Sam")).await.unwrap());
    assert_eq!(rs.len(), 1);
    rs.remove(0)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_confirm_cancel_over_the_wire() {
    let server = start_test_server(1).await;
    let client = connect(server.addr).await;

    let row = create(&client, "k1", server.hotel_id).await;
    let hold_id = row.get("hold_id").unwrap().to_string();
    assert_eq!(row.get("room_id"), Some(server.room_ids[0].to_string().as_str()));
    assert_eq!(row.get("status"), Some("HOLD_CREATED"));
    assert_eq!(row.get("expires_at"), Some("2026-01-31T23:08:20.000Z"));

    // Same dates under a new key: the only room is taken.
    let err = client
        .simple_query(&insert_hold("k2", server.hotel_id, "Sam"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    let confirm = format!("UPDATE holds SET status = 'CONFIRMED' WHERE id = '{hold_id}'");
    let rs = rows(client.simple_query(&confirm).await.unwrap());
    assert_eq!(rs[0].get("status"), Some("CONFIRMED"));

    let cancel = format!("UPDATE holds SET status = 'CANCELLED' WHERE id = '{hold_id}'");
    let rs = rows(client.simple_query(&cancel).await.unwrap());
    assert_eq!(rs[0].get("status"), Some("CANCELLED"));

    let err = client.simple_query(&confirm).await.unwrap_err();
    assert_eq!(sqlstate(&err), "55000");

    let detail = rows(
        client
            .simple_query(&format!("SELECT * FROM holds WHERE id = '{hold_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(detail.len(), 1);
    assert_eq!(detail[0].get("status"), Some("CANCELLED"));
    assert_eq!(detail[0].get("guest_name"), Some("Sam"));
    assert_eq!(detail[0].get("check_in"), Some("2026-02-01T12:00:00.000Z"));
    assert!(detail[0].get("confirmed_at").is_some());
    assert!(detail[0].get("cancelled_at").is_some());
    assert_eq!(detail[0].get("expired_at"), None);

    // Room is free again.
    let again = create(&client, "k3", server.hotel_id).await;
    assert_eq!(again.get("status"), Some("HOLD_CREATED"));
}

#[tokio::test]
async fn replay_and_key_conflict() {
    let server = start_test_server(3).await;
    let client = connect(server.addr).await;

    let first = create(&client, "same", server.hotel_id).await;
    let second = create(&client, "same", server.hotel_id).await;
    for col in ["hold_id", "room_id", "status", "expires_at"] {
        assert_eq!(first.get(col), second.get(col), "column {col}");
    }

    let err = client
        .simple_query(&insert_hold("same", server.hotel_id, "Different Guest"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23505");
}

#[tokio::test]
async fn expiry_sweep_and_lazy_expiry() {
    let server = start_test_server(2).await;
    let client = connect(server.addr).await;

    let a = create(&client, "a", server.hotel_id).await;
    let b = create(&client, "b", server.hotel_id).await;
    let a_id = a.get("hold_id").unwrap().to_string();
    let b_id = b.get("hold_id").unwrap().to_string();

    server.clock.advance(15 * MIN);

    // Lazy: the transition discovers the expiry and persists it.
    let confirm = format!("UPDATE holds SET status = 'CONFIRMED' WHERE id = '{a_id}'");
    let err = client.simple_query(&confirm).await.unwrap_err();
    assert_eq!(sqlstate(&err), "55000");

    // Sweep as of the server clock picks up the other one, then nothing.
    let msgs = client
        .simple_query("UPDATE holds SET status = 'EXPIRED'")
        .await
        .unwrap();
    assert_eq!(affected(&msgs), Some(1));
    let msgs = client
        .simple_query("UPDATE holds SET status = 'EXPIRED' WHERE expires_at <= '2030-01-01T00:00:00Z'")
        .await
        .unwrap();
    assert_eq!(affected(&msgs), Some(0));

    for id in [a_id, b_id] {
        let detail = rows(
            client
                .simple_query(&format!("SELECT * FROM holds WHERE id = '{id}'"))
                .await
                .unwrap(),
        );
        assert_eq!(detail[0].get("status"), Some("EXPIRED"));
        assert_eq!(detail[0].get("expired_at"), Some("2026-01-31T23:08:20.000Z"));
    }
}

#[tokio::test]
async fn errors_map_to_sqlstates() {
    let server = start_test_server(1).await;
    let client = connect(server.addr).await;

    let err = client.simple_query("DELETE FROM holds").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42601");

    let err = client
        .simple_query("UPDATE holds SET status = 'CONFIRMED' WHERE id = 'not-a-ulid'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    let missing = Ulid::new();
    let err = client
        .simple_query(&format!("UPDATE holds SET status = 'CANCELLED' WHERE id = '{missing}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    let err = client
        .simple_query(&format!(
            "INSERT INTO holds VALUES ('k', '{}', 'Sam', '+1', \
             '2026-02-03T10:00:00Z', '2026-02-01T12:00:00Z')",
            server.hotel_id
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    // The connection is still usable after errors.
    let row = create(&client, "k", server.hotel_id).await;
    assert_eq!(row.get("status"), Some("HOLD_CREATED"));
}

#[tokio::test]
async fn list_rooms() {
    let server = start_test_server(3).await;
    let client = connect(server.addr).await;

    let rs = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM rooms WHERE hotel_id = '{}'",
                server.hotel_id
            ))
            .await
            .unwrap(),
    );
    let ids: Vec<String> = rs
        .iter()
        .map(|r| r.get("room_id").unwrap().to_string())
        .collect();
    let expected: Vec<String> = server.room_ids.iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, expected);
    assert_eq!(rs[0].get("room_type"), Some("KING"));
    assert_eq!(rs[0].get("active"), Some("t"));
}

#[tokio::test]
async fn extended_protocol_insert_with_params() {
    let server = start_test_server(1).await;
    let client = connect(server.addr).await;
    let hotel = server.hotel_id.to_string();

    let result = client
        .query(
            "INSERT INTO holds (idempotency_key, hotel_id, guest_name, guest_phone, check_in, check_out) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &"ext-1",
                &hotel.as_str(),
                &"O'Brien",
                &"+353 1 555 0100",
                &"2026-02-01T12:00:00Z",
                &"2026-02-03T10:00:00Z",
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    let status: String = result[0].get("status");
    assert_eq!(status, "HOLD_CREATED");
    let hold_id: String = result[0].get("hold_id");

    let detail = rows(
        client
            .simple_query(&format!("SELECT * FROM holds WHERE id = '{hold_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(detail[0].get("guest_name"), Some("O'Brien"));
}
