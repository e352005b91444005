use http::{header::COOKIE, HeaderMap, HeaderValue};

#[tokio::main(flavor = "current_thread")]
async fn main() -> abtest::Result<()> {
    env_logger::init();
    abtest::metrics_defs::describe_metrics();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/datafile.json".to_owned());
    let service = abtest::ServiceConfig::new(url)
        .experiments(["checkout-button"])
        .debug(true)
        .to_service()?;

    // Until this returns true, handlers should serve the default experience.
    if !service.fetch_safely().await {
        println!("Datafile unavailable, serving defaults");
        return Ok(());
    }
    if let Some(activated_at) = service.activated_at() {
        println!("Datafile active since {}", activated_at.to_rfc3339());
    }

    // A returning visitor.
    let mut request = HeaderMap::new();
    request.insert(COOKIE, HeaderValue::from_static("abtest_user_id=returning-visitor"));
    let mut response = HeaderMap::new();
    let variants = service.get_variants(&request, &mut response)?;
    println!("Returning visitor: {}", serde_json::to_string(&variants).unwrap_or_default());

    // A first-time visitor gets a cookie.
    let mut response = HeaderMap::new();
    let variants = service.get_variants(&HeaderMap::new(), &mut response)?;
    println!("New visitor: {}", serde_json::to_string(&variants).unwrap_or_default());
    println!("Set-Cookie: {:?}", response.get(http::header::SET_COOKIE));

    Ok(())
}
