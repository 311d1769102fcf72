use redis::Commands;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

fn start_server(port: u16, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let config = replis::config::Config {
        port,
        dbfilename: "bench-absent.rdb".to_string(),
        ..Default::default()
    };
    tokio::spawn(async move {
        let _ = replis::server::run_server(config, shutdown).await;
    })
}

fn get_client(port: u16) -> redis::Connection {
    let client = redis::Client::open(format!("redis://127.0.0.1:{port}/")).unwrap();
    for i in 0..50 {
        match client.get_connection() {
            Ok(conn) => return conn,
            Err(_) if i < 49 => {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => panic!("Failed to connect: {e}"),
        }
    }
    unreachable!()
}

fn bench_set_get(conn: &mut redis::Connection, iterations: usize) -> (f64, f64) {
    let start = Instant::now();
    for i in 0..iterations {
        let _: () = conn
            .set(format!("bench_key_{i}"), format!("value_{i}"))
            .unwrap();
    }
    let set_ops = iterations as f64 / start.elapsed().as_secs_f64();

    let start = Instant::now();
    for i in 0..iterations {
        let _: String = conn.get(format!("bench_key_{i}")).unwrap();
    }
    let get_ops = iterations as f64 / start.elapsed().as_secs_f64();

    (set_ops, get_ops)
}

fn bench_incr(conn: &mut redis::Connection, iterations: usize) -> f64 {
    let _: () = conn.set("bench_counter", "0").unwrap();
    let start = Instant::now();
    for _ in 0..iterations {
        let _: i64 = redis::cmd("INCR").arg("bench_counter").query(conn).unwrap();
    }
    iterations as f64 / start.elapsed().as_secs_f64()
}

fn bench_xadd_xrange(conn: &mut redis::Connection, iterations: usize) -> (f64, f64) {
    let start = Instant::now();
    for i in 0..iterations {
        let _: String = redis::cmd("XADD")
            .arg("bench_stream")
            .arg("*")
            .arg("seq")
            .arg(i)
            .query(conn)
            .unwrap();
    }
    let xadd_ops = iterations as f64 / start.elapsed().as_secs_f64();

    let reads = iterations / 10;
    let start = Instant::now();
    for _ in 0..reads {
        let _: redis::Value = redis::cmd("XRANGE")
            .arg("bench_stream")
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(10)
            .query(conn)
            .unwrap();
    }
    let xrange_ops = reads as f64 / start.elapsed().as_secs_f64();

    (xadd_ops, xrange_ops)
}

fn bench_pipeline(conn: &mut redis::Connection, iterations: usize) -> f64 {
    let start = Instant::now();
    let batch_size = 100;
    for batch in 0..(iterations / batch_size) {
        let mut pipe = redis::pipe();
        for i in 0..batch_size {
            let key = format!("pipe_key_{batch}_{i}");
            pipe.set(&key, "value").ignore();
        }
        let _: () = pipe.query(conn).unwrap();
    }
    iterations as f64 / start.elapsed().as_secs_f64()
}

#[tokio::main]
async fn main() {
    let port = 17000;
    let shutdown = CancellationToken::new();
    let server = start_server(port, shutdown.clone());
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);
        let iterations = 10_000;

        println!("=== Replis Benchmark ({iterations} operations) ===\n");

        let (set_ops, get_ops) = bench_set_get(&mut conn, iterations);
        println!("SET:    {set_ops:>10.0} ops/sec");
        println!("GET:    {get_ops:>10.0} ops/sec");

        let incr_ops = bench_incr(&mut conn, iterations);
        println!("INCR:   {incr_ops:>10.0} ops/sec");

        let (xadd_ops, xrange_ops) = bench_xadd_xrange(&mut conn, iterations);
        println!("XADD:   {xadd_ops:>10.0} ops/sec");
        println!("XRANGE: {xrange_ops:>10.0} ops/sec (COUNT 10)");

        let pipe_ops = bench_pipeline(&mut conn, iterations);
        println!("PIPE:   {pipe_ops:>10.0} ops/sec (100-cmd pipeline batches)");

        println!("\n=== Done ===");
    })
    .await
    .unwrap();

    shutdown.cancel();
    let _ = server.await;
}
