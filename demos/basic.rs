use preq::{Preq, PreqError, RequestOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://en.wikipedia.org/wiki/Main_Page".to_owned());

    let preq = Preq::from_env().map_err(anyhow::Error::msg)?;

    match preq
        .get((uri.as_str(), RequestOptions::new().retries(2).timeout_ms(10_000)))
        .await
    {
        Ok(res) => {
            println!("status: {}", res.status);
            if let Some(location) = res.header("content-location") {
                println!("redirected to: {location}");
            }
            for (name, value) in &res.headers {
                println!("{name}: {value}");
            }
        }
        Err(PreqError::Http(err)) => {
            println!("request failed with {err} ({:?})", err.error_type());
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
