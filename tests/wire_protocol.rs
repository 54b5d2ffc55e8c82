use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use dinespace::config::Settings;
use dinespace::engine::Engine;
use dinespace::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("dinespace_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("dinespace.wal"), Arc::new(Settings::default())).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("dinespace")
        .user("dinespace");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn affected(client: &Client, sql: &str) -> u64 {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(n),
            _ => None,
        })
        .unwrap()
}

async fn error_code(client: &Client, sql: &str) -> SqlState {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().cloned().unwrap()
}

/// Restaurant with one 2..=10 space on default hours: (restaurant id, space id).
async fn dining_room(client: &Client) -> (String, String) {
    let created = rows(
        client,
        "INSERT INTO restaurants (name, address, cuisine_type, capacity) \
         VALUES ('Chez Nous', '10 Market St', 'French', 80) RETURNING *",
    )
    .await;
    let rid = created[0].get("id").unwrap().to_string();

    let space = rows(
        client,
        &format!(
            "INSERT INTO spaces (restaurant_id, name, min_capacity, max_capacity) \
             VALUES ('{rid}', 'Salon', 2, 10) RETURNING *"
        ),
    )
    .await;
    let sid = space[0].get("id").unwrap().to_string();
    (rid, sid)
}

fn reservation_sql(rid: &str, sid: &str, start: &str, end: &str, party: u32) -> String {
    format!(
        "INSERT INTO reservations (restaurant_id, space_id, customer_email, start_time, end_time, party_size) \
         VALUES ('{rid}', '{sid}', 'guest@example.com', '{start}', '{end}', {party}) RETURNING *"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn restaurant_and_space_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    let listed = rows(&client, &format!("SELECT * FROM restaurants WHERE id = '{rid}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("name"), Some("Chez Nous"));
    assert_eq!(listed[0].get("space_count"), Some("1"));

    let spaces = rows(&client, &format!("SELECT * FROM spaces WHERE restaurant_id = '{rid}'")).await;
    assert_eq!(spaces.len(), 1);
    assert_eq!(spaces[0].get("id"), Some(sid.as_str()));
    assert_eq!(spaces[0].get("operating_start"), Some("09:00"));
    assert_eq!(spaces[0].get("operating_end"), Some("22:00"));
    assert_eq!(spaces[0].get("slot_minutes"), Some("60"));
}

#[tokio::test]
async fn reservation_is_aligned_and_counted() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    let booked = rows(
        &client,
        &reservation_sql(&rid, &sid, "01-06-2024 12:17", "01-06-2024 14:17", 4),
    )
    .await;
    assert_eq!(booked[0].get("start_time"), Some("01-06-2024 12:00"));
    assert_eq!(booked[0].get("end_time"), Some("01-06-2024 15:00"));
    assert_eq!(booked[0].get("status"), Some("CONFIRMED"));

    let occupancy = rows(
        &client,
        &format!(
            "SELECT * FROM occupancy WHERE restaurant_id = '{rid}' AND space_id = '{sid}' \
             AND start_time = '2024-06-01 13:00' AND end_time = '2024-06-01 14:00'"
        ),
    )
    .await;
    assert_eq!(occupancy[0].get("occupancy"), Some("4"));
    assert_eq!(occupancy[0].get("max_capacity"), Some("10"));
    assert_eq!(occupancy[0].get("available"), Some("6"));
}

#[tokio::test]
async fn errors_carry_their_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    rows(&client, &reservation_sql(&rid, &sid, "01-06-2024 12:00", "01-06-2024 14:00", 6)).await;
    let conflict = error_code(
        &client,
        &reservation_sql(&rid, &sid, "01-06-2024 12:00", "01-06-2024 14:00", 5),
    )
    .await;
    assert_eq!(conflict, SqlState::EXCLUSION_VIOLATION);

    let invalid = error_code(
        &client,
        &reservation_sql(&rid, &sid, "01-06-2024 12:00", "01-06-2024 14:00", 11),
    )
    .await;
    assert_eq!(invalid, SqlState::INVALID_PARAMETER_VALUE);

    let missing = error_code(
        &client,
        &reservation_sql(&Ulid::new().to_string(), &sid, "01-06-2024 12:00", "01-06-2024 14:00", 2),
    )
    .await;
    assert_eq!(missing, SqlState::NO_DATA_FOUND);

    let syntax = error_code(&client, "SELEKT * FROM restaurants").await;
    assert_eq!(syntax, SqlState::SYNTAX_ERROR);
}

#[tokio::test]
async fn deletes_report_affected_rows() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    let booked = rows(&client, &reservation_sql(&rid, &sid, "01-06-2024 18:00", "01-06-2024 20:00", 2)).await;
    let id = booked[0].get("id").unwrap().to_string();

    let delete = format!("DELETE FROM reservations WHERE id = '{id}'");
    assert_eq!(affected(&client, &delete).await, 1);
    assert_eq!(affected(&client, &delete).await, 0);
    let lookup = error_code(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(lookup, SqlState::NO_DATA_FOUND);

    let remove_space = format!("DELETE FROM spaces WHERE restaurant_id = '{rid}' AND id = '{sid}'");
    assert_eq!(affected(&client, &remove_space).await, 1);
    assert_eq!(affected(&client, &remove_space).await, 0);
    let unknown_restaurant = format!(
        "DELETE FROM spaces WHERE restaurant_id = '{}' AND id = '{sid}'",
        Ulid::new()
    );
    assert_eq!(affected(&client, &unknown_restaurant).await, 0);
    let delete_restaurant = format!("DELETE FROM restaurants WHERE id = '{rid}'");
    assert_eq!(affected(&client, &delete_restaurant).await, 1);
    assert_eq!(affected(&client, &delete_restaurant).await, 0);
    let gone = error_code(&client, &format!("SELECT * FROM restaurants WHERE id = '{rid}'")).await;
    assert_eq!(gone, SqlState::NO_DATA_FOUND);
}

#[tokio::test]
async fn occupancy_report_and_summary() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;
    rows(&client, &reservation_sql(&rid, &sid, "01-06-2024 12:00", "01-06-2024 14:00", 4)).await;
    rows(&client, &reservation_sql(&rid, &sid, "01-06-2024 13:00", "01-06-2024 15:00", 6)).await;

    let filter = format!(
        "WHERE restaurant_id = '{rid}' AND start_time = '01-06-2024 00:00' AND end_time = '02-06-2024 00:00'"
    );
    let report = rows(&client, &format!("SELECT * FROM occupancy_report {filter}")).await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].get("space_id"), Some(sid.as_str()));
    assert_eq!(report[0].get("peak_occupancy"), Some("10"));
    let breakdown: serde_json::Value =
        serde_json::from_str(report[0].get("hourly_breakdown").unwrap()).unwrap();
    assert_eq!(breakdown.as_array().unwrap().len(), 24);
    assert_eq!(breakdown[13]["occupancy"], 10);

    let summary = rows(&client, &format!("SELECT * FROM occupancy_summary {filter}")).await;
    assert_eq!(summary[0].get("total_reservations"), Some("2"));
    assert_eq!(summary[0].get("total_guests"), Some("10"));
    assert_eq!(summary[0].get("total_pages"), Some("1"));

    let too_long = format!(
        "SELECT * FROM occupancy_summary WHERE restaurant_id = '{rid}' \
         AND start_time = '01-06-2024 00:00' AND end_time = '03-07-2024 00:00'"
    );
    assert_eq!(error_code(&client, &too_long).await, SqlState::INVALID_PARAMETER_VALUE);
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    let inserted = client
        .execute(
            "INSERT INTO reservations (restaurant_id, space_id, customer_email, start_time, end_time, party_size) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&rid, &sid, &"o'neil@example.com", &"2024-06-01T19:00", &"2024-06-01T21:00", &"3"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = client
        .query("SELECT * FROM reservations WHERE restaurant_id = $1", &[&rid])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let email: String = found[0].get("customer_email");
    assert_eq!(email, "o'neil@example.com");
}

#[tokio::test]
async fn concurrent_clients_cannot_overbook() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let (rid, sid) = dining_room(&client).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let (rid, sid) = (rid.clone(), sid.clone());
        tasks.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .simple_query(&reservation_sql(&rid, &sid, "01-06-2024 19:00", "01-06-2024 21:00", 3))
                .await
                .is_ok()
        }));
    }
    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 3);

    let rid = Ulid::from_string(&rid).unwrap();
    assert_eq!(engine.reservations_for_restaurant(&rid).await.len(), 3);
}
