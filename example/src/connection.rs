use std::time::Duration;

use colonna::{Client, Config, HealthCheck};

pub async fn main() -> colonna::Result<()> {
    // Ping

    let client = Client::connect_env()?;

    assert!(client.ping(Duration::from_secs(3)).await);

    let config = Config::from_env().health_check(HealthCheck::Ping);
    let client = Client::new(config)?;

    assert!(client.try_ping(Duration::from_secs(3)).await?);

    // Execute

    let summary = client
        .execute("create table if not exists colonna_demo(id UInt32, name String) engine=Memory")
        .await?;
    assert_eq!(summary.written_rows(), 0);

    let summary = client
        .execute("insert into colonna_demo select number, toString(number) from numbers(10)")
        .await?;
    assert_eq!(summary.written_rows(), 10);

    client.execute("drop table colonna_demo").await?;

    Ok(())
}
