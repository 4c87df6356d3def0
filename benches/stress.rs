use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const PASSWORD: &str = "fleetbook";

async fn connect(host: &str, port: u16, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("fleetbook")
        .user(user)
        .password(PASSWORD);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    let ms = |d: Duration| d.as_secs_f64() * 1000.0;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        ms(avg),
        ms(percentile(latencies, 50.0)),
        ms(percentile(latencies, 95.0)),
        ms(percentile(latencies, 99.0)),
        ms(latencies[latencies.len() - 1]),
    );
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2035, 1, 1).expect("valid date")
}

fn day(offset: u64) -> NaiveDate {
    base_date() + Days::new(offset)
}

async fn add_car(admin: &tokio_postgres::Client, i: usize) -> Ulid {
    let id = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, brand, model, year, category, transmission, fuel, seats, daily_price, mileage) \
             VALUES ('{id}', 'Bench', 'Car {i}', 2024, 'compact', 'manual', 'gasoline', 5, {}, 0)",
            30 + i % 50
        ))
        .await
        .unwrap();
    id
}

fn booking_sql(car: Ulid, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "INSERT INTO reservations (id, car_id, start_date, end_date, pickup_location, dropoff_location) \
         VALUES ('{}', '{car}', '{start}', '{end}', 'Depot', 'Depot')",
        Ulid::new()
    )
}

/// Back-to-back bookings on one car from one client.
async fn phase1_sequential(host: &str, port: u16, car: Ulid) {
    let client = connect(host, port, "bench_seq").await;
    let n = 300;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(car, day(i), day(i + 1)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many customers race for the same week on the same cars. Exactly one
/// booking per car and week may win.
async fn phase2_contention(host: &str, port: u16, cars: &[Ulid]) {
    let n_tasks = 20;
    let weeks = 10u64;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let host = host.to_string();
        let cars = cars.to_vec();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_race_{t}")).await;
            let mut latencies = Vec::new();
            for &car in &cars {
                for w in 0..weeks {
                    let from = day(1000 + w * 7);
                    let to = day(1000 + w * 7 + 7);
                    let begin = Instant::now();
                    match client.batch_execute(&booking_sql(car, from, to)).await {
                        Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                        Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                    };
                    latencies.push(begin.elapsed());
                }
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let expected = cars.len() * weeks as usize;
    println!(
        "  {n_tasks} customers x {} slots in {:.2}s: {won} won (expected {expected}), {} refused",
        expected,
        elapsed.as_secs_f64(),
        lost.load(Ordering::Relaxed),
    );
    print_latency("contended booking", &mut all);
}

/// Catalog searches while writers keep booking.
async fn phase3_search_under_load(host: &str, port: u16, cars: &[Ulid]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writers = Vec::new();
    for (w, &car) in cars.iter().enumerate().take(5) {
        let host = host.to_string();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_writer_{w}")).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let from = day(5000 + i);
                let _ = client.batch_execute(&booking_sql(car, from, day(5001 + i))).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads = 200;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        readers.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_reader_{r}")).await;
            let mut latencies = Vec::with_capacity(reads);
            for i in 0..reads {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM vehicles WHERE q = 'bench' AND daily_price >= {} AND \"sort\" = 'price_asc' AND page = {}",
                        i % 40,
                        1 + i % 3
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("search", &mut all);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("FLEETBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FLEETBOOK_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid FLEETBOOK_PORT");
    let admin_user = std::env::var("FLEETBOOK_BENCH_ADMIN").unwrap_or_else(|_| "admin".into());

    println!("=== fleetbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let admin = connect(&host, port, &admin_user).await;
    let mut cars = Vec::new();
    for i in 0..20 {
        cars.push(add_car(&admin, i).await);
    }
    println!("  created {} cars", cars.len());

    println!("\n[phase 1] sequential bookings");
    phase1_sequential(&host, port, cars[0]).await;

    println!("\n[phase 2] overlapping bookings under contention");
    phase2_contention(&host, port, &cars[1..11]).await;

    println!("\n[phase 3] search latency under write load");
    phase3_search_under_load(&host, port, &cars[11..]).await;

    println!("\n=== done ===");
}
