//! Basic example demonstrating ad-hoc requests and a declarative endpoint.
//!
//! Run with: `cargo run --example basic_adapter`

use adapterkit::extensions::Deduplicator;
use adapterkit::{Adapter, EndpointConfig, RequestConfig, RequestError, Validator};
use http::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), RequestError> {
    tracing_subscriber::fmt()
        .with_env_filter("adapterkit=debug,basic_adapter=info")
        .init();

    let adapter = Adapter::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .default_timeout(Duration::from_secs(10))
        .default_auto_retry(2)
        .default_retry_delay(Duration::from_millis(250))
        .build()?;

    println!("=== GET Request Example ===");
    let response = adapter.get("/posts/1", None).await?;
    let post = response.json::<Post>()?;

    println!("Post ID: {}", post.id);
    println!("Title: {}", post.title);
    println!("Request latency: {:?}", response.latency);
    println!("Status code: {}", response.status());
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };
    let response = adapter
        .post("/posts", RequestConfig::new().with_json_body(&new_post)?)
        .await?;
    println!("Created: {}", response.data);
    println!("Content-Type: {:?}", response.header("content-type"));
    println!();

    println!("=== Endpoint Example ===");
    let posts = adapter.endpoint(
        EndpointConfig::new("/posts/{id}")
            .validate(Method::GET, Validator::deserializes::<Post>())
            .accepts([Method::GET]),
    )?;
    println!("Link: {}", posts.url([("id", "2")])?);

    let dedup = Deduplicator::new();
    dedup.register(&adapter);
    let (a, b) = tokio::join!(posts.get([("id", "2")]), posts.get([("id", "2")]));
    let (a, b) = (a?, b?);
    println!("Shared response: {}", std::sync::Arc::ptr_eq(&a, &b));
    println!("Was retried: {}", a.was_retried());

    Ok(())
}
