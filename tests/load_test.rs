//! Load testing through the mesh.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshwire::{Coordinator, MeshConfig, MeshRequest};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_performance() {
    let mut config = MeshConfig::default();
    config.queue.max_per_turn = 4;
    let coordinator = Coordinator::new(config.clone());

    let mut ports = Vec::new();
    let mut units = Vec::new();
    for _ in 0..4 {
        let (port, unit) = common::spawn_echo_unit(config.clone());
        ports.push(port);
        units.push(unit);
    }
    coordinator.add_route("echo", ports, None).await.unwrap();

    let total_requests = 2000;
    let concurrency = 64;
    let start = Instant::now();

    let results: Vec<_> = stream::iter(0..total_requests)
        .map(|i| {
            let coordinator = coordinator.clone();
            async move {
                let response = coordinator
                    .dispatch("echo", MeshRequest::get(format!("/{i}")))
                    .await?;
                Ok::<_, meshwire::MeshError>(response.body.collect().await?)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let duration = start.elapsed();
    let mut per_unit: HashMap<String, usize> = HashMap::new();
    let mut failures = 0;
    for result in results {
        match result {
            Ok(body) => {
                *per_unit
                    .entry(String::from_utf8_lossy(&body).into_owned())
                    .or_default() += 1
            }
            Err(_) => failures += 1,
        }
    }

    let rps = total_requests as f64 / duration.as_secs_f64();
    println!("Load test results:");
    println!("  Total requests: {}", total_requests);
    println!("  Duration: {:?}", duration);
    println!("  Requests per second: {:.2}", rps);
    println!("  Per unit: {:?}", per_unit);

    assert_eq!(failures, 0);
    assert_eq!(per_unit.len(), units.len());
    for unit in &units {
        assert_eq!(per_unit.get(&unit.id.to_string()), Some(&(total_requests / units.len())));
    }
    assert!(duration < Duration::from_secs(30));

    coordinator.close().await.unwrap();
}
