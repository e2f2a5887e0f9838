use std::collections::BTreeMap;
use std::time::{Duration, UNIX_EPOCH};

use datapoint_writer::{hash_identifier, Config, Context};
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().unwrap_or_else(|_| {
        Config::new("nats://localhost:4222", Duration::from_millis(100), "smoke_test")
    });
    let context = Context::dial(config).expect("failed to dial broker");

    let tags = BTreeMap::from_iter([
        ("host".to_string(), "dev".to_string()),
        ("address".to_string(), hash_identifier("dev/requests").to_string()),
    ]);

    info!("Context open. Writing datapoints for 5s...");

    for i in 0..50_i32 {
        let now = u64::try_from(UNIX_EPOCH.elapsed().unwrap().as_nanos()).unwrap();

        context.write_int(&tags, i64::from(i), now).expect("write int");
        context.write_real(&tags, 60.0 + f64::from(i) * 0.5, now).expect("write real");
        context.write_text(&tags, &format!("tick {i}"), now).expect("write text");
        context.write_binary(&tags, &i.to_be_bytes(), now).expect("write binary");
        context.write_counter(&tags, now).expect("write counter");

        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Done writing. Shutting down...");
    context.shutdown();
}
