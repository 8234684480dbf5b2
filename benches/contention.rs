use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const SLOT: i64 = 1_800_000;

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    next_id: u64,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let socket = TcpStream::connect((host, port)).await.expect("connect failed");
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            next_id: 1,
        }
    }

    /// Send a request and wait for its reply, discarding pushed events.
    async fn call(&mut self, mut req: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        req["id"] = json!(id);
        self.framed.send(req.to_string()).await.unwrap();
        loop {
            let line = self.framed.next().await.expect("connection closed").unwrap();
            let msg: Value = serde_json::from_str(&line).unwrap();
            if msg["type"] == "Event" {
                continue;
            }
            return msg;
        }
    }

    async fn register_resource(&mut self, name: &str) -> String {
        let rid = Ulid::new().to_string();
        let reply = self
            .call(json!({
                "type": "RegisterResource",
                "resource_id": rid,
                "name": name,
                "kind": "MeetingRoom"
            }))
            .await;
        assert_eq!(reply["type"], "Ok", "register failed: {reply}");
        rid
    }
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

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// A far-future base instant, slot-aligned, so commits never hit the
/// past-start check and runs don't collide with earlier runs' bookings.
fn fresh_base() -> i64 {
    let offset = (Ulid::new().0 % 10_000) as i64;
    (now_ms() + (24 + offset) * HOUR).div_euclid(SLOT) * SLOT
}

async fn phase1_sequential_commits(host: &str, port: u16) {
    let mut client = Client::connect(host, port).await;
    let rid = client.register_resource("bench seq").await;
    let base = fresh_base();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = base + (i as i64) * HOUR;
        let t = Instant::now();
        let reply = client
            .call(json!({
                "type": "Commit",
                "resource_id": rid,
                "owner": "bench",
                "start": s,
                "end": s + HOUR
            }))
            .await;
        assert_eq!(reply["type"], "Ok", "commit failed: {reply}");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} commits in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

async fn phase2_concurrent_disjoint(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let rid = client.register_resource("bench conc").await;
            let base = fresh_base();
            for j in 0..n_per_task {
                let s = base + (j as i64) * HOUR;
                let reply = client
                    .call(json!({
                        "type": "Commit",
                        "resource_id": rid,
                        "owner": "bench",
                        "start": s,
                        "end": s + HOUR
                    }))
                    .await;
                assert_eq!(reply["type"], "Ok");
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
        "  {n_tasks} tasks x {n_per_task} commits = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_commits(host: &str, port: u16) {
    // Every task fights for the same hour on the same resource; exactly
    // one commit per hour should win.
    let mut setup = Client::connect(host, port).await;
    let rid = setup.register_resource("bench contended").await;
    let base = fresh_base();

    let n_tasks = 10;
    let n_rounds = 100;
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let rid = rid.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut wins = 0usize;
            for round in 0..n_rounds {
                let s = base + (round as i64) * HOUR;
                let reply = client
                    .call(json!({
                        "type": "Commit",
                        "resource_id": rid,
                        "owner": "bench",
                        "start": s,
                        "end": s + HOUR
                    }))
                    .await;
                if reply["type"] == "Ok" {
                    wins += 1;
                } else {
                    assert_eq!(reply["error"]["kind"], "Overlap", "unexpected: {reply}");
                }
            }
            wins
        }));
    }

    let mut total_wins = 0;
    for h in handles {
        total_wins += h.await.unwrap();
    }

    let elapsed = start.elapsed();
    assert_eq!(total_wins, n_rounds, "each round must have exactly one winner");
    println!(
        "  {n_tasks} tasks x {n_rounds} contended rounds in {:.2}s, {total_wins} wins (one per round)",
        elapsed.as_secs_f64()
    );
}

async fn phase4_lock_churn(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let rid = setup.register_resource("bench locks").await;
    let base = fresh_base();

    let n_tasks = 10;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let rid = rid.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut latencies = Vec::with_capacity(n_per_task);
            // Each task churns its own slot range; no conflicts, pure
            // acquire/release throughput plus broadcast fan-out.
            let abs_base = (base + (i as i64) * 1000 * HOUR).div_euclid(SLOT);
            let per_day = 24 * HOUR / SLOT;
            for j in 0..n_per_task {
                let abs = abs_base + j as i64;
                let slot = json!({ "day": abs.div_euclid(per_day), "slot": abs.rem_euclid(per_day) });
                let t = Instant::now();
                let reply = client
                    .call(json!({ "type": "AcquireLock", "resource_id": rid, "slot": slot }))
                    .await;
                assert_eq!(reply["type"], "Ok");
                let reply = client
                    .call(json!({ "type": "ReleaseLock", "resource_id": rid, "slot": slot }))
                    .await;
                assert_eq!(reply["type"], "Ok");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task * 2;
    println!(
        "  {total} lock ops in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("acquire+release latency", &mut all);
}

async fn phase5_availability_under_load(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let rid = setup.register_resource("bench reads").await;
    let base = fresh_base();

    // Pre-fill a busy calendar
    for i in 0..200 {
        let s = base + i * 2 * HOUR;
        let reply = setup
            .call(json!({
                "type": "Commit",
                "resource_id": rid,
                "owner": "bench",
                "start": s,
                "end": s + HOUR
            }))
            .await;
        assert_eq!(reply["type"], "Ok");
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        let rid = rid.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let s = base + (i as i64 % 400) * HOUR;
                let t = Instant::now();
                let reply = client
                    .call(json!({
                        "type": "Availability",
                        "resource_id": rid,
                        "start": s,
                        "end": s + HOUR
                    }))
                    .await;
                assert_eq!(reply["type"], "Ok");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    print_latency("availability query", &mut all);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTD_PORT")
        .unwrap_or_else(|_| "7460".into())
        .parse()
        .expect("invalid SLOTD_PORT");

    println!("=== slotd contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential commit throughput");
    phase1_sequential_commits(&host, port).await;

    println!("\n[phase 2] concurrent commits on disjoint resources");
    phase2_concurrent_disjoint(&host, port).await;

    println!("\n[phase 3] contended commits on one resource");
    phase3_contended_commits(&host, port).await;

    println!("\n[phase 4] soft-lock churn");
    phase4_lock_churn(&host, port).await;

    println!("\n[phase 5] availability reads on a busy calendar");
    phase5_availability_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
