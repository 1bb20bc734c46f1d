use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, Local, NaiveDate, NaiveTime};

use bookd::engine::{ConflictPolicy, Engine};
use bookd::model::{NewCarReservation, NewRoomReservation, NewUser};

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

fn bench_wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join("bookd_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("stress.wal");
    let _ = std::fs::remove_file(&path);
    path
}

fn t(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
}

fn day(offset: u64) -> NaiveDate {
    Local::now()
        .date_naive()
        .checked_add_days(Days::new(offset))
        .unwrap()
}

async fn setup(engine: &Engine) -> (u32, u32, Vec<u32>) {
    let user = engine
        .create_user(NewUser {
            name: "Bench".into(),
            email: "bench@example.com".into(),
            password: "pw".into(),
            is_admin: false,
            driver_license: None,
            license_expiry: None,
        })
        .await
        .unwrap();
    let room = engine
        .add_room("Bench Room".into(), "8 people".into())
        .await
        .unwrap();

    let mut cars = Vec::new();
    for i in 0..10 {
        let car = engine
            .add_car(format!("Car {i}"), format!("BNC-{i:04}"), 100, 0)
            .await
            .unwrap();
        cars.push(car.id);
    }
    println!("  created 1 room + {} cars", cars.len());
    (user.id, room.id, cars)
}

/// Sequential room bookings with full conflict checking against a growing
/// ledger — the worst case for the detector's linear scan.
async fn phase1_sequential(engine: &Engine, user_id: u32, room_id: u32) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let hour = (i % 22) as u32; // [hour, hour+1) — 22 disjoint slots per day
        let req = NewRoomReservation {
            room_id,
            date: day((i / 22) as u64),
            start_time: t(hour),
            end_time: t(hour + 1),
            user_id,
        };
        let op = Instant::now();
        engine.create_room_reservation(req).await.unwrap();
        latencies.push(op.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} bookings in {:.2}s ({:.0} ops/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("room booking (sequential)", &mut latencies);
}

/// Concurrent car checkouts + returns across the fleet, one task per car —
/// exercises group commit across independent per-car critical sections.
async fn phase2_concurrent(engine: Arc<Engine>, user_id: u32, cars: &[u32]) {
    let per_car = 200u64;
    let start = Instant::now();

    let mut handles = Vec::new();
    for &car_id in cars {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_car as usize);
            for i in 0..per_car {
                let req = NewCarReservation {
                    car_id,
                    date: day(i),
                    start_time: t(8),
                    end_time: None,
                    destination: None,
                    purpose: None,
                    user_id,
                };
                let op = Instant::now();
                engine.create_car_reservation(req).await.unwrap();
                latencies.push(op.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for handle in handles {
        latencies.extend(handle.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = per_car * cars.len() as u64;
    println!(
        "  {total} bookings in {:.2}s ({:.0} ops/s)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("car booking (concurrent)", &mut latencies);
}

/// Contended bookings: every attempt targets the same car and date, so all
/// but one must be rejected by the conflict detector.
async fn phase3_contention(engine: Arc<Engine>, user_id: u32, car_id: u32) {
    let n = 100;
    let date = day(10_000); // untouched by earlier phases

    let attempts: Vec<_> = (0..n)
        .map(|_| {
            engine.create_car_reservation(NewCarReservation {
                car_id,
                date,
                start_time: t(8),
                end_time: None,
                destination: None,
                purpose: None,
                user_id,
            })
        })
        .collect();
    let results = futures::future::join_all(attempts).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = n - ok;
    println!("  {n} contended attempts: {ok} committed, {rejected} rejected");
    assert_eq!(ok, 1, "conflict detector must admit exactly one");
}

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        // AllDates makes every booking pay for a conflict check, which is
        // the interesting cost; the WAL still syncs every commit.
        let engine = Arc::new(
            Engine::open(bench_wal_path(), ConflictPolicy::AllDates, 0).unwrap(),
        );

        println!("setup:");
        let (user_id, room_id, cars) = setup(&engine).await;

        println!("phase 1: sequential room bookings");
        phase1_sequential(&engine, user_id, room_id).await;

        println!("phase 2: concurrent car bookings");
        phase2_concurrent(engine.clone(), user_id, &cars).await;

        println!("phase 3: contended bookings");
        phase3_contention(engine.clone(), user_id, cars[0]).await;
    });
}
