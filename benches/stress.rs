use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

/// Reservations are spread over this many days from today.
const HORIZON_DAYS: u64 = 365;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("vacancy")
        .password("vacancy");

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
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn day(offset: u64) -> NaiveDate {
    Utc::now().date_naive() + Days::new(1 + offset % HORIZON_DAYS)
}

struct Hotel {
    property: Ulid,
    room_type: Ulid,
}

/// Property, room type and `rooms` rooms in the client's tenant.
async fn setup_hotel(client: &tokio_postgres::Client, rooms: usize) -> Hotel {
    let property = Ulid::new();
    let room_type = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO properties (id, name) VALUES ('{property}', 'bench')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO room_types (id, property_id, name) VALUES ('{room_type}', '{property}', 'standard')"
        ))
        .await
        .unwrap();
    let values: Vec<String> = (0..rooms)
        .map(|n| format!("('{}', '{room_type}', '{n}')", Ulid::new()))
        .collect();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, room_type_id, number) VALUES {}",
            values.join(", ")
        ))
        .await
        .unwrap();
    Hotel { property, room_type }
}

fn reservation_sql(room_type: Ulid, i: u64) -> String {
    let check_in = day(i);
    let check_out = check_in + Days::new(1 + i % 3);
    format!(
        "INSERT INTO reservations (id, room_type_id, check_in, check_out) VALUES ('{}', '{room_type}', '{check_in}', '{check_out}')",
        Ulid::new()
    )
}

fn availability_sql(hotel: &Hotel, i: u64) -> String {
    let check_in = day(i);
    let check_out = check_in + Days::new(1 + i % 14);
    format!(
        "SELECT * FROM availability_summary WHERE property_id = '{}' AND room_type_id = '{}' AND check_in = '{check_in}' AND check_out = '{check_out}'",
        hotel.property, hotel.room_type
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let hotel = setup_hotel(&client, 50).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        client.batch_execute(&reservation_sql(hotel.room_type, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task uses its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            let hotel = setup_hotel(&client, 20).await;
            for j in 0..n_per_task {
                client.batch_execute(&reservation_sql(hotel.room_type, j)).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously record reservations in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let hotel = setup_hotel(&client, 10).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&reservation_sql(hotel.room_type, i)).await;
                i += 1;
            }
        }));
    }

    // Reader tasks: each seeds its own tenant, then measures availability checks
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let hotel = setup_hotel(&client, 10).await;
            for i in 0..500 {
                client.batch_execute(&reservation_sql(hotel.room_type, i)).await.unwrap();
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader as u64 {
                let t = Instant::now();
                client.simple_query(&availability_sql(&hotel, i * 7)).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability check", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let hotel = setup_hotel(&client, 5).await;
            for i in 0..ops_per_conn {
                client.batch_execute(&reservation_sql(hotel.room_type, i)).await.unwrap();
                client.simple_query(&availability_sql(&hotel, i)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} write+check pairs each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("VACANCY_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("VACANCY_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid VACANCY_PORT");

    println!("=== vacancy stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenants (unique dbname) to avoid interference

    println!("[phase 1] sequential reservation writes");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent reservation writes");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
