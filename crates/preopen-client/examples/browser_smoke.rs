/// Smoke-test for `ChromeSessionProvider`.
///
/// Launches a headless Chromium, opens <https://example.com>, checks that the
/// heading text is visible, and writes a full-page screenshot.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use std::time::Duration;

use preopen_client::{ChromeOptions, ChromeSessionProvider};
use preopen_core::traits::{PageSession, SessionProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let scratch = tempfile::tempdir()?;
    let options = ChromeOptions {
        scratch_dir: scratch.path().to_path_buf(),
        ..ChromeOptions::default()
    };

    println!("Launching headless browser…");
    let provider = ChromeSessionProvider::with_options(options).await?;
    let session = provider.open().await?;

    let url = "https://example.com";
    println!("Navigating to {url} …");
    session.navigate(url).await?;

    assert!(
        session.wait_for_element("h1", Duration::from_secs(10)).await?,
        "Expected <h1> never appeared"
    );
    assert!(
        session.is_text_visible("Example Domain").await?,
        "Heading text not visible"
    );

    let png = session.screenshot().await?;
    let shot = scratch.path().join("example.png");
    std::fs::write(&shot, &png)?;
    println!("OK: {} byte screenshot at {}", png.len(), shot.display());

    println!("Current URL: {:?}", session.current_url().await?);

    session.close().await?;
    provider.shutdown().await?;
    Ok(())
}
