use colonna::{Client, Manager};

pub async fn main() -> colonna::Result<()> {
    let client = Client::connect_env()?;

    // Server side session shared across independent requests

    let session = Manager::global().create_session_id();

    let req = client
        .request("create temporary table colonna_session(a String) engine=Memory as select '1'")
        .session(&session, true)
        .set("session_check", 0);

    req.clone().execute().await?.finish().await?;

    let mut resp = req
        .clone()
        .query("select * from colonna_session")
        .execute()
        .await?;
    assert_eq!(resp.first_record().await?.try_get::<_, i32>(0)?, 1);

    // Explicit transaction joined by every request until terminal

    let tx = Manager::global().begin_transaction(None);

    client
        .request("select number from numbers(3)")
        .transaction(Some(&tx))
        .execute()
        .await?
        .finish()
        .await?;

    tx.commit()?;

    // a terminal transaction cannot be attached again
    let err = client
        .request("select 1")
        .transaction(Some(&tx))
        .execute()
        .await;
    assert!(err.is_err());

    Ok(())
}
