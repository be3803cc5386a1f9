use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Days, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use vacancy::tenant::TenantManager;
use vacancy::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("vacancy_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "vacancy".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    try_connect(addr, dbname, "vacancy").await.unwrap()
}

async fn try_connect(addr: SocketAddr, dbname: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("vacancy")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

/// `YYYY-MM-DD`, `days` from today (UTC).
fn date(days: u64) -> String {
    (Utc::now().date_naive() + Days::new(days)).format("%Y-%m-%d").to_string()
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn select(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

fn truthy(value: Option<&str>) -> bool {
    matches!(value, Some("t" | "true"))
}

struct Hotel {
    property: Ulid,
    room_type: Ulid,
    rooms: Vec<Ulid>,
}

/// One property with one room type holding `rooms` available rooms.
async fn setup_hotel(client: &Client, rooms: usize) -> Hotel {
    let property = Ulid::new();
    let room_type = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO properties (id, name) VALUES ('{property}', 'Harbour Inn')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO room_types (id, property_id, name) VALUES ('{room_type}', '{property}', 'Double')"
        ))
        .await
        .unwrap();

    let ids: Vec<Ulid> = (0..rooms).map(|_| Ulid::new()).collect();
    if !ids.is_empty() {
        let values: Vec<String> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| format!("('{id}', '{room_type}', '{}')", 101 + i))
            .collect();
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, room_type_id, number) VALUES {}",
                values.join(", ")
            ))
            .await
            .unwrap();
    }

    Hotel {
        property,
        room_type,
        rooms: ids,
    }
}

async fn reserve(client: &Client, room_type: Ulid, check_in: &str, check_out: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, room_type_id, check_in, check_out) \
             VALUES ('{id}', '{room_type}', '{check_in}', '{check_out}')"
        ))
        .await
        .unwrap();
    id
}

fn availability_sql(hotel: &Hotel, table: &str, check_in: &str, check_out: &str) -> String {
    format!(
        "SELECT * FROM {table} WHERE property_id = '{}' AND room_type_id = '{}' \
         AND check_in = '{check_in}' AND check_out = '{check_out}'",
        hotel.property, hotel.room_type
    )
}

// ── Inventory round trips ────────────────────────────────────

#[tokio::test]
async fn inventory_is_listed() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "inventory").await;
    let hotel = setup_hotel(&client, 3).await;

    let properties = select(&client, "SELECT * FROM properties").await;
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].get("id"), Some(hotel.property.to_string().as_str()));
    assert_eq!(properties[0].get("name"), Some("Harbour Inn"));
    assert!(truthy(properties[0].get("active")));

    let room_types = select(
        &client,
        &format!("SELECT * FROM room_types WHERE property_id = '{}'", hotel.property),
    )
    .await;
    assert_eq!(room_types.len(), 1);
    assert_eq!(room_types[0].get("name"), Some("Double"));

    let rooms = select(
        &client,
        &format!("SELECT * FROM rooms WHERE room_type_id = '{}'", hotel.room_type),
    )
    .await;
    assert_eq!(rooms.len(), 3);
    assert!(rooms.iter().all(|r| r.get("status") == Some("available")));
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let (addr, tm) = start_test_server().await;
    let a = connect(addr, "hotel_a").await;
    let b = connect(addr, "hotel_b").await;
    setup_hotel(&a, 1).await;

    assert_eq!(select(&a, "SELECT * FROM properties").await.len(), 1);
    assert!(select(&b, "SELECT * FROM properties").await.is_empty());
    assert_eq!(tm.tenant_count(), 2);
}

#[tokio::test]
async fn wrong_password_rejected() {
    let (addr, _tm) = start_test_server().await;
    assert!(try_connect(addr, "auth", "not-the-password").await.is_err());
}

// ── Availability ─────────────────────────────────────────────

#[tokio::test]
async fn availability_reports_each_night() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "nights").await;
    let hotel = setup_hotel(&client, 2).await;

    // night 11 is held by both reservations
    reserve(&client, hotel.room_type, &date(10), &date(12)).await;
    reserve(&client, hotel.room_type, &date(11), &date(13)).await;
    // touches the window's check-out; never counted
    reserve(&client, hotel.room_type, &date(13), &date(15)).await;

    let nights = select(&client, &availability_sql(&hotel, "availability", &date(10), &date(13))).await;
    let got: Vec<(String, String)> = nights
        .iter()
        .map(|r| {
            (
                r.get("date").unwrap().to_string(),
                r.get("available_rooms").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        got,
        vec![
            (date(10), "1".to_string()),
            (date(11), "0".to_string()),
            (date(12), "1".to_string()),
        ]
    );
    assert!(nights.iter().all(|r| r.get("total_rooms") == Some("2")));
}

#[tokio::test]
async fn availability_summary_outcomes() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "summary").await;
    let hotel = setup_hotel(&client, 1).await;
    reserve(&client, hotel.room_type, &date(5), &date(7)).await;

    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(7), &date(9))).await;
    assert_eq!(summary.len(), 1);
    let row = &summary[0];
    assert_eq!(row.get("outcome"), Some("available"));
    assert!(truthy(row.get("is_available")));
    assert_eq!(row.get("nights"), Some("2"));
    assert_eq!(row.get("min_available_rooms"), Some("1"));
    let per_night: serde_json::Value = serde_json::from_str(row.get("per_night").unwrap()).unwrap();
    assert_eq!(per_night.as_array().unwrap().len(), 2);

    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(6), &date(8))).await;
    assert_eq!(summary[0].get("outcome"), Some("fully_booked"));
    assert!(!truthy(summary[0].get("is_available")));
    assert_eq!(summary[0].get("min_available_rooms"), Some("0"));
}

#[tokio::test]
async fn room_status_and_cancellation_change_availability() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "statuses").await;
    let hotel = setup_hotel(&client, 2).await;
    let booking = reserve(&client, hotel.room_type, &date(3), &date(4)).await;

    client
        .batch_execute(&format!(
            "INSERT INTO room_status (room_id, status) VALUES ('{}', 'maintenance')",
            hotel.rooms[0]
        ))
        .await
        .unwrap();
    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(3), &date(4))).await;
    assert_eq!(summary[0].get("outcome"), Some("fully_booked"));
    assert_eq!(summary[0].get("total_rooms"), Some("1"));

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{booking}'"))
        .await
        .unwrap();
    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(3), &date(4))).await;
    assert_eq!(summary[0].get("outcome"), Some("available"));

    let reservations = select(
        &client,
        &format!("SELECT * FROM reservations WHERE room_type_id = '{}'", hotel.room_type),
    )
    .await;
    assert_eq!(reservations[0].get("status"), Some("cancelled"));

    // A cancelled reservation cannot come back.
    let err = client
        .batch_execute(&format!(
            "INSERT INTO reservation_status (reservation_id, status) VALUES ('{booking}', 'confirmed')"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0001"));
}

#[tokio::test]
async fn room_type_without_rooms_reports_no_rooms() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "empty").await;
    let hotel = setup_hotel(&client, 0).await;

    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(1), &date(4))).await;
    assert_eq!(summary[0].get("outcome"), Some("no_rooms"));
    assert_eq!(summary[0].get("total_rooms"), Some("0"));
    assert_eq!(summary[0].get("nights"), Some("3"));
    assert_eq!(summary[0].get("per_night"), Some("[]"));

    assert!(select(&client, &availability_sql(&hotel, "availability", &date(1), &date(4)))
        .await
        .is_empty());
}

#[tokio::test]
async fn batch_reservation_insert() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "batch").await;
    let hotel = setup_hotel(&client, 3).await;

    let rt = hotel.room_type;
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, room_type_id, check_in, check_out, status) VALUES \
             ('{}', '{rt}', '{}', '{}', 'confirmed'), \
             ('{}', '{rt}', '{}', '{}', 'provisional'), \
             ('{}', '{rt}', '{}', '{}', 'checked_in')",
            Ulid::new(),
            date(2),
            date(4),
            Ulid::new(),
            date(3),
            date(5),
            Ulid::new(),
            date(3),
            date(4),
        ))
        .await
        .unwrap();

    let nights = select(&client, &availability_sql(&hotel, "availability", &date(2), &date(5))).await;
    let available: Vec<&str> = nights.iter().map(|r| r.get("available_rooms").unwrap()).collect();
    assert_eq!(available, vec!["2", "0", "2"]);
}

#[tokio::test]
async fn extended_query_with_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "extended").await;
    let hotel = setup_hotel(&client, 1).await;
    reserve(&client, hotel.room_type, &date(20), &date(21)).await;

    let property = hotel.property.to_string();
    let room_type = hotel.room_type.to_string();
    let (check_in, check_out) = (date(20), date(22));
    let rows = client
        .query(
            "SELECT * FROM availability WHERE property_id = $1 AND room_type_id = $2 \
             AND check_in = $3 AND check_out = $4",
            &[&property, &room_type, &check_in, &check_out],
        )
        .await
        .unwrap();
    let dates: Vec<String> = rows.iter().map(|r| r.get::<_, String>("date")).collect();
    assert_eq!(dates, vec![date(20), date(21)]);

    let rows = client
        .query(
            "SELECT * FROM availability_summary WHERE property_id = $1 AND room_type_id = $2 \
             AND check_in = $3 AND check_out = $4",
            &[&property, &room_type, &check_in, &check_out],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get::<_, String>("outcome"), "fully_booked");
}

// ── Errors ───────────────────────────────────────────────────

#[tokio::test]
async fn invalid_requests_map_to_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "errors").await;
    let hotel = setup_hotel(&client, 1).await;

    // past check-in
    let yesterday = (Utc::now().date_naive() - Days::new(1)).format("%Y-%m-%d").to_string();
    let err = client
        .simple_query(&availability_sql(&hotel, "availability", &yesterday, &date(2)))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    // check-out before check-in
    let err = client
        .simple_query(&availability_sql(&hotel, "availability", &date(5), &date(3)))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    // malformed id
    let err = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE property_id = 'nope' AND room_type_id = '{}' \
             AND check_in = '{}' AND check_out = '{}'",
            hotel.room_type,
            date(1),
            date(2)
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    // missing filters
    let err = client.simple_query("SELECT * FROM availability").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    // unknown property
    let stranger = Hotel {
        property: Ulid::new(),
        room_type: hotel.room_type,
        rooms: Vec::new(),
    };
    let err = client
        .simple_query(&availability_sql(&stranger, "availability_summary", &date(1), &date(2)))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));

    // syntax
    let err = client.simple_query("SELEC * FROM properties").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn state_survives_reconnect() {
    let (addr, _tm) = start_test_server().await;
    let hotel = {
        let client = connect(addr, "durable").await;
        let hotel = setup_hotel(&client, 2).await;
        reserve(&client, hotel.room_type, &date(1), &date(2)).await;
        hotel
    };

    let client = connect(addr, "durable").await;
    let summary = select(&client, &availability_sql(&hotel, "availability_summary", &date(1), &date(2))).await;
    assert_eq!(summary[0].get("min_available_rooms"), Some("1"));
}
