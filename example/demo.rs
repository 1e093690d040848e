use memoize_rs::{
    MemoHost, MemoSlots, MemoizeConfig, MemoizeError, memoize, memoize_clear, memoize_decorator,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CACHE_DURATION_MS: i64 = 200;
const LOAD_DELAY_MS: u64 = 100;

struct Repository {
    name: String,
    slots: MemoSlots,
}

impl MemoHost for Repository {
    fn memo_slots(&self) -> &MemoSlots {
        &self.slots
    }
}

#[tokio::main]
async fn main() -> Result<(), MemoizeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memoize_rs=debug")),
        )
        .init();

    let load = memoize(
        |(key,): (i32,)| {
            std::thread::sleep(Duration::from_millis(LOAD_DELAY_MS));
            format!("Value for key: {}", key)
        },
        MemoizeConfig::new()
            .max_age_ms(CACHE_DURATION_MS)
            .name("load"),
    )?;

    println!("Loading value for key 1...");
    println!("Got: {}", load.call((1,)));

    println!("Loading value for key 1 again (should be cached)...");
    println!("Got: {}", load.call((1,)));
    println!("Pending evictions: {}", load.pending_evictions());

    tokio::time::sleep(Duration::from_millis(CACHE_DURATION_MS as u64 + 50)).await;
    println!("After expiry, pending evictions: {}", load.pending_evictions());

    println!("Testing multiple keys:");
    for key in [10, 20, 30] {
        load.call((key,));
    }
    println!("Pending evictions with multiple keys: {}", load.pending_evictions());

    memoize_clear(&load)?;
    println!("Pending evictions after clear: {}", load.pending_evictions());

    let decorator = memoize_decorator(MemoizeConfig::<(u32,), u32, String>::new())?;
    let describe = decorator.method("describe", |repo: &Repository, (id,): (u32,)| {
        std::thread::sleep(Duration::from_millis(LOAD_DELAY_MS));
        format!("{}#{}", repo.name, id)
    });

    let users = Repository {
        name: "users".to_string(),
        slots: MemoSlots::new(),
    };
    let orders = Repository {
        name: "orders".to_string(),
        slots: MemoSlots::new(),
    };
    println!("{}", describe.call(&users, (7,)));
    println!("{}", describe.call(&users, (7,)));
    println!("{}", describe.call(&orders, (7,)));

    Ok(())
}
