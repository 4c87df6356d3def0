use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use fleetbook::audit::AuditHub;
use fleetbook::auth::AdminList;
use fleetbook::engine::Engine;
use fleetbook::wire;

const PASSWORD: &str = "fleetbook";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("fleetbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine =
        Arc::new(Engine::new(dir.join("fleetbook.wal"), Arc::new(AuditHub::new())).unwrap());
    let admins = Arc::new(AdminList::parse("admin"));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let admins = admins.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), admins, None)
                    .await;
            });
        }
    });

    addr
}

async fn connect_as(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("fleetbook")
        .user(user)
        .password(PASSWORD);

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

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("no SQLSTATE on {err}"))
}

async fn add_car(admin: &Client, price: u32) -> Ulid {
    let id = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, brand, model, year, category, transmission, fuel, seats, daily_price) \
             VALUES ('{id}', 'Toyota', 'Corolla', 2022, 'sedan', 'automatic', 'hybrid', 5, {price})"
        ))
        .await
        .unwrap();
    id
}

fn booking_sql(id: Ulid, car: Ulid, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO reservations (id, car_id, start_date, end_date, pickup_location, dropoff_location) \
         VALUES ('{id}', '{car}', '{start}', '{end}', 'Airport', 'Airport')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_is_priced_and_blocks_dates() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;

    let car = add_car(&admin, 50).await;
    let extra = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO extras (id, name, price_per_day) VALUES ('{extra}', 'GPS', 10)"
        ))
        .await
        .unwrap();

    let rid = Ulid::new();
    alice
        .batch_execute(&format!(
            "INSERT INTO reservations VALUES ('{rid}', '{car}', '2031-03-01', '2031-03-04', 'Airport', 'Station', '', ARRAY['{extra}'])"
        ))
        .await
        .unwrap();

    let mine = rows(&alice, "SELECT * FROM reservations").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("id"), Some(rid.to_string().as_str()));
    assert_eq!(mine[0].get("total_price"), Some("180"));
    assert_eq!(mine[0].get("status"), Some("pending"));
    assert_eq!(mine[0].get("extras"), Some("GPS"));

    let blocked = rows(&alice, &format!("SELECT * FROM availability WHERE car_id = '{car}'")).await;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].get("start_date"), Some("2031-03-01"));
    assert_eq!(blocked[0].get("end_date"), Some("2031-03-04"));

    let vehicle = rows(&alice, &format!("SELECT * FROM vehicles WHERE id = '{car}'")).await;
    assert_eq!(vehicle[0].get("status"), Some("rented"));
}

#[tokio::test]
async fn overlapping_booking_is_a_conflict() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;
    let bob = connect_as(addr, "bob").await;

    let car = add_car(&admin, 40).await;
    alice
        .batch_execute(&booking_sql(Ulid::new(), car, "2031-06-10", "2031-06-15"))
        .await
        .unwrap();

    let code = sqlstate(&bob, &booking_sql(Ulid::new(), car, "2031-06-14", "2031-06-20")).await;
    assert_eq!(code, "23P01");

    // Back-to-back is fine.
    bob.batch_execute(&booking_sql(Ulid::new(), car, "2031-06-15", "2031-06-20"))
        .await
        .unwrap();
}

#[tokio::test]
async fn error_codes_follow_failure_kind() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;
    let car = add_car(&admin, 40).await;

    let backwards = booking_sql(Ulid::new(), car, "2031-01-05", "2031-01-05");
    assert_eq!(sqlstate(&alice, &backwards).await, "22023");

    let ghost = booking_sql(Ulid::new(), Ulid::new(), "2031-01-05", "2031-01-06");
    assert_eq!(sqlstate(&alice, &ghost).await, "02000");

    let forbidden = format!("DELETE FROM vehicles WHERE id = '{car}'");
    assert_eq!(sqlstate(&alice, &forbidden).await, "42501");

    assert_eq!(sqlstate(&alice, "SELECT * FROM planets").await, "42601");
}

#[tokio::test]
async fn admin_moves_reservation_through_lifecycle() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;
    let car = add_car(&admin, 30).await;

    let rid = Ulid::new();
    alice
        .batch_execute(&booking_sql(rid, car, "2031-09-01", "2031-09-03"))
        .await
        .unwrap();

    for status in ["approved", "active", "completed"] {
        admin
            .batch_execute(&format!(
                "INSERT INTO reservation_status (reservation_id, status) VALUES ('{rid}', '{status}')"
            ))
            .await
            .unwrap();
    }

    let all = rows(&admin, "SELECT * FROM reservations").await;
    assert_eq!(all[0].get("status"), Some("completed"));

    let vehicle = rows(&admin, &format!("SELECT * FROM vehicles WHERE id = '{car}'")).await;
    assert_eq!(vehicle[0].get("status"), Some("available"));

    let dash = rows(&admin, "SELECT * FROM dashboard").await;
    assert_eq!(dash[0].get("revenue"), Some("60"));
    assert_eq!(dash[0].get("total_cars"), Some("1"));

    let back = format!(
        "INSERT INTO reservation_status (reservation_id, status) VALUES ('{rid}', 'pending')"
    );
    assert_eq!(sqlstate(&admin, &back).await, "22023");
}

#[tokio::test]
async fn customer_cancels_own_future_booking() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;
    let bob = connect_as(addr, "bob").await;
    let car = add_car(&admin, 30).await;

    let rid = Ulid::new();
    alice
        .batch_execute(&booking_sql(rid, car, "2032-01-01", "2032-01-05"))
        .await
        .unwrap();

    let cancel = format!("DELETE FROM reservations WHERE id = '{rid}'");
    assert_eq!(sqlstate(&bob, &cancel).await, "02000");
    assert!(rows(&bob, "SELECT * FROM reservations").await.is_empty());

    alice.batch_execute(&cancel).await.unwrap();
    let mine = rows(&alice, "SELECT * FROM reservations").await;
    assert_eq!(mine[0].get("status"), Some("cancelled"));

    let blocked = rows(&alice, &format!("SELECT * FROM availability WHERE car_id = '{car}'")).await;
    assert!(blocked.is_empty());
}

#[tokio::test]
async fn search_pages_and_counts() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    for price in [30, 45, 60, 75, 90] {
        add_car(&admin, price).await;
    }

    let page = rows(
        &admin,
        "SELECT * FROM vehicles WHERE q = 'toy' AND daily_price >= 40 AND \"sort\" = 'price_desc' AND \"limit\" = 2",
    )
    .await;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].get("daily_price"), Some("90"));
    assert_eq!(page[1].get("daily_price"), Some("75"));
    assert_eq!(page[0].get("total_count"), Some("4"));

    let bad = "SELECT * FROM vehicles WHERE category = 'spaceship'";
    assert_eq!(sqlstate(&admin, bad).await, "22023");
}

#[tokio::test]
async fn reviews_one_per_customer() {
    let addr = start_test_server().await;
    let admin = connect_as(addr, "admin").await;
    let alice = connect_as(addr, "alice").await;
    let bob = connect_as(addr, "bob").await;
    let car = add_car(&admin, 30).await;

    let review = |rating: u8| {
        format!(
            "INSERT INTO reviews (id, vehicle_id, rating, comment) VALUES ('{}', '{car}', {rating}, 'ok')",
            Ulid::new()
        )
    };
    alice.batch_execute(&review(5)).await.unwrap();
    bob.batch_execute(&review(2)).await.unwrap();
    assert_eq!(sqlstate(&alice, &review(4)).await, "23P01");
    assert_eq!(sqlstate(&bob, &review(9)).await, "22023");

    let all = rows(&bob, &format!("SELECT * FROM reviews WHERE vehicle_id = '{car}'")).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].get("total_count"), Some("2"));
    assert_eq!(all[0].get("average_rating"), Some("3.5"));
}
