use colonna::{Client, ExternalTable, Format, compress::Method};

pub async fn main() -> colonna::Result<()> {
    let client = Client::connect_env()?;

    // Queries

    let mut resp = client.request("select 420, 'Foo'").execute().await?;
    let record = resp.first_record().await?;

    assert_eq!(record.try_get::<_, i32>(0)?, 420);
    assert_eq!(record.try_get::<_, String>(1)?.as_str(), "Foo");

    // Named parameters

    let mut resp = client
        .request("select number n from numbers({count:UInt64})")
        .param("count", 14)
        .set("send_progress_in_http_headers", 1)
        .execute()
        .await?;

    let mut total = 0;
    while let Some(record) = resp.next_record().await? {
        let _n: u64 = record.try_get("n")?;
        total += 1;
    }
    assert_eq!(total, 14);
    assert_eq!(resp.summary().read_rows(), 14);

    // Compression in both directions

    let mut resp = client
        .request("select number n, toString(number+1) s from numbers(10)")
        .compress_request(Method::Lz4, 3)
        .compress_response(Method::Zstd)
        .execute()
        .await?;

    let mut i = 0u64;
    while let Some(record) = resp.next_record().await? {
        assert_eq!(record.try_get::<_, u64>(0)?, i);
        i += 1;
        assert_eq!(record.try_get::<_, u64>(1)?, i);
    }
    assert_eq!(i, 10);

    // External tables joined server side

    let mut resp = client
        .request("select x.* from x inner join y on x.i = y.i")
        .external(
            ExternalTable::builder()
                .name("x")
                .columns("i Int32, s String")
                .format(Format::Csv)
                .content("1,23\n4,56")
                .build()?,
        )
        .external(
            ExternalTable::builder()
                .name("y")
                .column("s", "String")
                .column("i", "Int32")
                .content("32\t1\n43\t2\n54\t3\n65\t4")
                .build()?,
        )
        .execute()
        .await?;

    let mut rows = 0;
    while let Some(record) = resp.next_record().await? {
        rows += 1;
        let _i: i32 = record.try_get("i")?;
    }
    assert_eq!(rows, 2);

    Ok(())
}
